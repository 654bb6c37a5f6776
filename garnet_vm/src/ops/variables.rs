//! Constants, instance variables, blocks, and primitive invocation.

use crate::constant_cache::ConstantCache;
use crate::frame::CallFrame;
use crate::interpreter::Signal;
use crate::state::State;
use garnet_core::{Symbol, Value, VmError, VmResult};
use garnet_runtime::{Arguments, BlockEnvironment};
use std::sync::Arc;

fn constant_cache_at(state: &State, stream: &[u64], pos: usize) -> VmResult<Arc<ConstantCache>> {
    state
        .runtime
        .heap
        .native_as::<ConstantCache>(Value::from_raw(stream[pos]))
        .ok_or_else(|| VmError::internal("constant cache missing from stream"))
}

fn symbol_operand(stream: &[u64], pos: usize) -> VmResult<Symbol> {
    Value::from_raw(stream[pos])
        .as_symbol()
        .ok_or_else(|| VmError::internal("symbol operand missing from stream"))
}

/// Constant lookup in the frame's lexical scope, through the cache.
#[inline(always)]
pub fn push_const(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let cache = constant_cache_at(state, stream, frame.ip + 1)?;
    let value = cache.retrieve(state, Some(frame.module))?;
    frame.push(value)?;
    frame.ip += 2;
    Ok(Signal::Continue)
}

/// Constant lookup under the module popped from the stack.
#[inline(always)]
pub fn find_const(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let cache = constant_cache_at(state, stream, frame.ip + 1)?;
    let scope_value = frame.pop()?;
    let scope = state.runtime.class_of(scope_value);
    let value = cache.retrieve(state, Some(scope))?;
    frame.push(value)?;
    frame.ip += 2;
    Ok(Signal::Continue)
}

/// Bind a top-level constant to the top of stack; the value remains as the
/// expression result.
#[inline(always)]
pub fn set_const(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let name = symbol_operand(stream, frame.ip + 1)?;
    let value = frame.top()?;
    state.runtime.set_constant(name, value);
    frame.ip += 2;
    Ok(Signal::Continue)
}

/// Bind a constant under the module popped from the stack.
#[inline(always)]
pub fn set_const_at(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let name = symbol_operand(stream, frame.ip + 1)?;
    let scope_value = frame.pop()?;
    let scope = state.runtime.class_of(scope_value);
    let value = frame.top()?;
    state.runtime.set_constant_at(scope, name, value);
    frame.ip += 2;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn set_ivar(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let name = symbol_operand(stream, frame.ip + 1)?;
    let value = frame.top()?;
    let target = frame.self_value;
    if !state.runtime.heap.ivar_set(target, name, value) {
        return Err(VmError::type_error(
            "Object",
            target,
            "self cannot hold instance variables",
        ));
    }
    frame.ip += 2;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn push_ivar(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let name = symbol_operand(stream, frame.ip + 1)?;
    let value = state
        .runtime
        .heap
        .ivar_get(frame.self_value, name)
        .unwrap_or(Value::nil());
    frame.push(value)?;
    frame.ip += 2;
    Ok(Signal::Continue)
}

/// The operand holds either a compiled-code literal (close it over the
/// current self) or a string literal (pushed for deferred compilation).
#[inline(always)]
pub fn create_block(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let literal = Value::from_raw(stream[frame.ip + 1]);
    let value = match state.runtime.heap.code_at(literal) {
        Some(code) => {
            let class = state.runtime.classes.well_known().block_environment;
            let env = BlockEnvironment::new(code, frame.self_value);
            state.runtime.heap.alloc_block_env(class, env)
        }
        None => literal,
    };
    frame.push(value)?;
    frame.ip += 2;
    Ok(Signal::Continue)
}

/// The operand holds the invoker index resolved at preparation.
#[inline(always)]
pub fn invoke_primitive(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let invoker_index = stream[frame.ip + 1] as usize;
    let argc = stream[frame.ip + 2] as usize;

    let mut list = Vec::with_capacity(argc);
    for index in 0..argc {
        list.push(frame.peek(argc - 1 - index)?);
    }
    frame.drop_values(argc)?;

    let mut args = Arguments::with_args(Symbol::intern("invoke_primitive"), frame.self_value, list);
    args.block = frame.block;

    let invoker = state.runtime.primitives.invoker(invoker_index);
    let result = invoker(&mut state.runtime, &args)?;
    frame.push(result)?;
    frame.ip += 3;
    Ok(Signal::Continue)
}
