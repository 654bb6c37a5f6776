//! Measurement opcodes.

use crate::frame::CallFrame;
use crate::interpreter::Signal;
use crate::state::State;
use garnet_core::VmResult;

/// Bump the measurement counter installed at preparation.
#[inline(always)]
pub fn m_counter(_state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let index = stream[frame.ip + 1] as usize;
    let machine_code = frame.machine_code.clone();
    if let Some(measurement) = machine_code.measurement(index) {
        measurement.increment();
    }
    frame.ip += 2;
    Ok(Signal::Continue)
}

/// Record a register's value in the diagnostics log.
#[inline(always)]
pub fn m_log(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let value = frame.slot(stream[frame.ip + 1] as usize)?;
    state.log(format!("{value:?}"));
    frame.ip += 2;
    Ok(Signal::Continue)
}
