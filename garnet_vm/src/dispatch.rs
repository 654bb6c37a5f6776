//! Method invocation: the seam between cache executors and method bodies.

use crate::frame::CallFrame;
use crate::interpreter;
use crate::state::State;
use garnet_compiler::CompiledCode;
use garnet_core::{Symbol, Value, VmError, VmResult};
use garnet_runtime::exception::{make_interpreter_error, make_no_method_error};
use garnet_runtime::{Arguments, Executable, LookupMode, MethodMissingReason};
use std::sync::Arc;

/// Invoke a resolved executable.
pub fn invoke(state: &mut State, method: &Arc<Executable>, args: &mut Arguments) -> VmResult<Value> {
    match &**method {
        Executable::Primitive { func, .. } => func(&mut state.runtime, args),
        Executable::Compiled(code) => invoke_compiled(state, code, args),
    }
}

/// Invoke a bytecode method: prepare (memoized), build the callee frame,
/// interpret. Host failures propagate as `VmError` to the one outer
/// `execute` boundary.
pub fn invoke_compiled(
    state: &mut State,
    code: &Arc<CompiledCode>,
    args: &mut Arguments,
) -> VmResult<Value> {
    if args.arity() < code.required_args as usize {
        let message = format!(
            "wrong number of arguments (given {}, expected {})",
            args.arity(),
            code.required_args
        );
        let exception = make_interpreter_error(&mut state.runtime, message);
        return Err(VmError::raised(exception));
    }

    let machine_code = state
        .prepare(code)
        .map_err(|error| VmError::internal(error.to_string()))?;

    let module = state.runtime.class_of(args.recv);
    let mut frame = CallFrame::new(&machine_code, args.recv, module);
    frame.block = args.block;
    for (index, arg) in args.args.iter().enumerate() {
        if index >= machine_code.local_count {
            break;
        }
        frame.set_local(index, *arg)?;
    }

    state.enter_call(code.name, code.file)?;
    let result = interpreter::run(state, &machine_code, &mut frame);
    state.leave_call();
    result
}

/// The method-missing path: record the reason, forward to the receiver's
/// `method_missing` with the name prepended, or raise the default
/// no-method error.
pub fn method_missing(
    state: &mut State,
    args: &mut Arguments,
    reason: MethodMissingReason,
) -> VmResult<Value> {
    state.set_method_missing_reason(reason);

    let klass = state.runtime.class_of(args.recv);
    let name = Symbol::intern("method_missing");
    let dispatch = state.runtime.classes.lookup_method(
        klass,
        name,
        LookupMode {
            allow_private: true,
            is_super: false,
            is_vcall: false,
            self_class: klass,
        },
    );

    match dispatch.method {
        Some(method) => {
            let mut forwarded = args.for_method_missing();
            invoke(state, &method, &mut forwarded)
        }
        None => {
            let private = reason == MethodMissingReason::Private;
            let exception = make_no_method_error(&mut state.runtime, args.name, args.recv, private);
            Err(VmError::raised(exception))
        }
    }
}
