//! Stack manipulation and immediate pushes.

use crate::frame::CallFrame;
use crate::interpreter::Signal;
use crate::state::State;
use garnet_core::{Value, VmResult};

#[inline(always)]
pub fn noop(_state: &mut State, frame: &mut CallFrame, _stream: &[u64]) -> VmResult<Signal> {
    frame.ip += 1;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn pop(_state: &mut State, frame: &mut CallFrame, _stream: &[u64]) -> VmResult<Signal> {
    frame.pop()?;
    frame.ip += 1;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn dup_top(_state: &mut State, frame: &mut CallFrame, _stream: &[u64]) -> VmResult<Signal> {
    let value = frame.top()?;
    frame.push(value)?;
    frame.ip += 1;
    Ok(Signal::Continue)
}

/// End of method: return the top of stack.
#[inline(always)]
pub fn ret(_state: &mut State, frame: &mut CallFrame, _stream: &[u64]) -> VmResult<Signal> {
    let value = frame.pop()?;
    Ok(Signal::Return(value))
}

#[inline(always)]
pub fn push_nil(_state: &mut State, frame: &mut CallFrame, _stream: &[u64]) -> VmResult<Signal> {
    frame.push(Value::nil())?;
    frame.ip += 1;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn push_true(_state: &mut State, frame: &mut CallFrame, _stream: &[u64]) -> VmResult<Signal> {
    frame.push(Value::truthy())?;
    frame.ip += 1;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn push_false(_state: &mut State, frame: &mut CallFrame, _stream: &[u64]) -> VmResult<Signal> {
    frame.push(Value::falsy())?;
    frame.ip += 1;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn push_self(_state: &mut State, frame: &mut CallFrame, _stream: &[u64]) -> VmResult<Signal> {
    let value = frame.self_value;
    frame.push(value)?;
    frame.ip += 1;
    Ok(Signal::Continue)
}

/// The operand was boxed to a fixnum at preparation; push it verbatim.
#[inline(always)]
pub fn push_int(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    frame.push(Value::from_raw(stream[frame.ip + 1]))?;
    frame.ip += 2;
    Ok(Signal::Continue)
}

/// The operand holds this site's tagged nil.
#[inline(always)]
pub fn push_tagged_nil(
    _state: &mut State,
    frame: &mut CallFrame,
    stream: &[u64],
) -> VmResult<Signal> {
    frame.push(Value::from_raw(stream[frame.ip + 1]))?;
    frame.ip += 2;
    Ok(Signal::Continue)
}

/// The operand holds the literal reference itself after preparation.
#[inline(always)]
pub fn push_literal(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    frame.push(Value::from_raw(stream[frame.ip + 1]))?;
    frame.ip += 2;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn push_memo(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    push_literal(state, frame, stream)
}

#[inline(always)]
pub fn push_local(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let index = stream[frame.ip + 1] as usize;
    let value = frame.local(index)?;
    frame.push(value)?;
    frame.ip += 2;
    Ok(Signal::Continue)
}

/// Store the top of stack into a local; the value stays on the stack as the
/// expression result.
#[inline(always)]
pub fn set_local(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let index = stream[frame.ip + 1] as usize;
    let value = frame.top()?;
    frame.set_local(index, value)?;
    frame.ip += 2;
    Ok(Signal::Continue)
}
