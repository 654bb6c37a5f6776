//! Control flow and exception machinery.

use crate::frame::{CallFrame, UnwindEntry};
use crate::interpreter::Signal;
use crate::state::State;
use crate::unwind::UnwindSite;
use garnet_core::{Value, VmError, VmResult};
use std::sync::Arc;

#[inline(always)]
fn jump(state: &State, frame: &mut CallFrame, target: usize) {
    // Back-branches are safepoints.
    if target <= frame.ip {
        state.safepoint_poll();
    }
    frame.ip = target;
}

#[inline(always)]
pub fn goto(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let target = stream[frame.ip + 1] as usize;
    jump(state, frame, target);
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn goto_if_true(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let value = frame.pop()?;
    if value.is_truthy() {
        let target = stream[frame.ip + 1] as usize;
        jump(state, frame, target);
    } else {
        frame.ip += 2;
    }
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn goto_if_false(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let value = frame.pop()?;
    if !value.is_truthy() {
        let target = stream[frame.ip + 1] as usize;
        jump(state, frame, target);
    } else {
        frame.ip += 2;
    }
    Ok(Signal::Continue)
}

/// Arm an unwind site: push it with the current stack depth.
#[inline(always)]
pub fn setup_unwind(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let site = unwind_site_at(state, stream, frame.ip + 1)?;
    let entry = UnwindEntry {
        site,
        sp: frame.sp(),
    };
    frame.unwinds.push(entry);
    frame.ip += 3;
    Ok(Signal::Continue)
}

/// Disarm the innermost unwind site.
#[inline(always)]
pub fn unwind(_state: &mut State, frame: &mut CallFrame, _stream: &[u64]) -> VmResult<Signal> {
    frame.unwinds.pop();
    frame.ip += 2;
    Ok(Signal::Continue)
}

/// Raise the exception on top of the stack.
#[inline(always)]
pub fn raise_exc(_state: &mut State, frame: &mut CallFrame, _stream: &[u64]) -> VmResult<Signal> {
    let exception = frame.pop()?;
    Err(VmError::raised(exception))
}

/// Re-raise after an `ensure` body, or the current rescue exception.
#[inline(always)]
pub fn reraise(state: &mut State, frame: &mut CallFrame, _stream: &[u64]) -> VmResult<Signal> {
    if let Some(exception) = frame.pending_raise.take() {
        return Err(VmError::raised(exception));
    }
    let current = state.current_exception();
    if !current.is_nil() {
        return Err(VmError::raised(current));
    }
    Err(VmError::internal("reraise without an exception in flight"))
}

/// Push the exception a rescue handler is handling.
#[inline(always)]
pub fn push_exception(state: &mut State, frame: &mut CallFrame, _stream: &[u64]) -> VmResult<Signal> {
    frame.push(state.current_exception())?;
    frame.ip += 1;
    Ok(Signal::Continue)
}

fn unwind_site_at(state: &State, stream: &[u64], pos: usize) -> VmResult<Arc<UnwindSite>> {
    state
        .runtime
        .heap
        .native_as::<UnwindSite>(Value::from_raw(stream[pos]))
        .ok_or_else(|| VmError::internal("unwind site missing from stream"))
}
