//! Register-form loads, stores, branches, and integer arithmetic.
//!
//! Register operands in the prepared stream are already biased by the
//! method's stack size, so they index the frame's slot array directly.

use crate::frame::CallFrame;
use crate::interpreter::Signal;
use crate::state::State;
use garnet_core::{Value, VmError, VmResult};
use garnet_runtime::exception::make_interpreter_error;

#[inline(always)]
pub fn r_load_literal(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let reg = stream[frame.ip + 1] as usize;
    frame.set_slot(reg, Value::from_raw(stream[frame.ip + 2]))?;
    frame.ip += 3;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn r_load_local(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let reg = stream[frame.ip + 1] as usize;
    let index = stream[frame.ip + 2] as usize;
    let value = frame.local(index)?;
    frame.set_slot(reg, value)?;
    frame.ip += 3;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn r_store_local(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let reg = stream[frame.ip + 1] as usize;
    let index = stream[frame.ip + 2] as usize;
    let value = frame.slot(reg)?;
    frame.set_local(index, value)?;
    frame.ip += 3;
    Ok(Signal::Continue)
}

/// Copy the top of stack into a register without popping.
#[inline(always)]
pub fn r_load_stack(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let reg = stream[frame.ip + 1] as usize;
    let value = frame.top()?;
    frame.set_slot(reg, value)?;
    frame.ip += 2;
    Ok(Signal::Continue)
}

/// Push a register onto the operand stack.
#[inline(always)]
pub fn r_store_stack(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let value = frame.slot(stream[frame.ip + 1] as usize)?;
    frame.push(value)?;
    frame.ip += 2;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn r_load_self(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let value = frame.self_value;
    frame.set_slot(stream[frame.ip + 1] as usize, value)?;
    frame.ip += 2;
    Ok(Signal::Continue)
}

macro_rules! r_load_const {
    ($name:ident, $value:expr) => {
        #[inline(always)]
        pub fn $name(
            _state: &mut State,
            frame: &mut CallFrame,
            stream: &[u64],
        ) -> VmResult<Signal> {
            frame.set_slot(stream[frame.ip + 1] as usize, $value)?;
            frame.ip += 2;
            Ok(Signal::Continue)
        }
    };
}

r_load_const!(r_load_neg1, Value::fixnum(-1));
r_load_const!(r_load_0, Value::fixnum(0));
r_load_const!(r_load_1, Value::fixnum(1));
r_load_const!(r_load_2, Value::fixnum(2));
r_load_const!(r_load_true, Value::truthy());
r_load_const!(r_load_false, Value::falsy());

/// The second operand holds this site's tagged nil.
#[inline(always)]
pub fn r_load_nil(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let reg = stream[frame.ip + 1] as usize;
    frame.set_slot(reg, Value::from_raw(stream[frame.ip + 2]))?;
    frame.ip += 3;
    Ok(Signal::Continue)
}

/// Return a register's value.
#[inline(always)]
pub fn r_ret(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let value = frame.slot(stream[frame.ip + 1] as usize)?;
    Ok(Signal::Return(value))
}

#[inline(always)]
pub fn b_if(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let value = frame.slot(stream[frame.ip + 1] as usize)?;
    if value.is_truthy() {
        let target = stream[frame.ip + 2] as usize;
        if target <= frame.ip {
            state.safepoint_poll();
        }
        frame.ip = target;
    } else {
        frame.ip += 3;
    }
    Ok(Signal::Continue)
}

// =============================================================================
// Integer arithmetic
// =============================================================================

#[inline(always)]
fn fixnum_at(frame: &CallFrame, slot: usize) -> VmResult<i64> {
    let value = frame.slot(slot)?;
    value.as_fixnum().ok_or_else(|| {
        VmError::type_error("Integer", value, "no implicit conversion into Integer")
    })
}

macro_rules! int_binary {
    ($name:ident, $op:expr) => {
        #[inline(always)]
        pub fn $name(
            _state: &mut State,
            frame: &mut CallFrame,
            stream: &[u64],
        ) -> VmResult<Signal> {
            let a = fixnum_at(frame, stream[frame.ip + 2] as usize)?;
            let b = fixnum_at(frame, stream[frame.ip + 3] as usize)?;
            let result: Value = $op(a, b)?;
            frame.set_slot(stream[frame.ip + 1] as usize, result)?;
            frame.ip += 4;
            Ok(Signal::Continue)
        }
    };
}

int_binary!(int_add, |a: i64, b: i64| -> VmResult<Value> {
    Ok(Value::fixnum(a.wrapping_add(b)))
});
int_binary!(int_sub, |a: i64, b: i64| -> VmResult<Value> {
    Ok(Value::fixnum(a.wrapping_sub(b)))
});
int_binary!(int_mul, |a: i64, b: i64| -> VmResult<Value> {
    Ok(Value::fixnum(a.wrapping_mul(b)))
});
int_binary!(int_eq, |a: i64, b: i64| -> VmResult<Value> {
    Ok(Value::boolean(a == b))
});
int_binary!(int_lt, |a: i64, b: i64| -> VmResult<Value> {
    Ok(Value::boolean(a < b))
});
int_binary!(int_le, |a: i64, b: i64| -> VmResult<Value> {
    Ok(Value::boolean(a <= b))
});

#[inline(always)]
pub fn int_div(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let a = fixnum_at(frame, stream[frame.ip + 2] as usize)?;
    let b = fixnum_at(frame, stream[frame.ip + 3] as usize)?;
    if b == 0 {
        let exception = make_interpreter_error(&mut state.runtime, "divided by 0");
        return Err(VmError::raised(exception));
    }
    frame.set_slot(stream[frame.ip + 1] as usize, Value::fixnum(a.wrapping_div(b)))?;
    frame.ip += 4;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn int_neg(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let value = fixnum_at(frame, stream[frame.ip + 2] as usize)?;
    frame.set_slot(stream[frame.ip + 1] as usize, Value::fixnum(value.wrapping_neg()))?;
    frame.ip += 3;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn int_not(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let value = fixnum_at(frame, stream[frame.ip + 2] as usize)?;
    frame.set_slot(stream[frame.ip + 1] as usize, Value::fixnum(!value))?;
    frame.ip += 3;
    Ok(Signal::Continue)
}
