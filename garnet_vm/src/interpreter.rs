//! The dispatcher.
//!
//! `execute` performs the first dispatch into a prepared stream; each handler
//! advances the instruction pointer and yields back to the trampoline, which
//! indexes the handler table with the stream's handler token. (The token is
//! the opcode id — Rust has no guaranteed tail calls, so the threaded
//! dispatch of the design is rendered as a central loop; dispatch cost is
//! still one table index plus immediate operand reads.)
//!
//! Host failures are trapped at exactly this boundary and surfaced as
//! language exceptions with a call-stack location snapshot, the frame's
//! variable scope flushed to heap, and the sentinel zero returned; callers
//! detect failure via the state's raised-exception slot. Language exceptions
//! propagate by unwind-stack cooperation: `rescue` sites recover, `ensure`
//! sites run and re-raise.

use crate::frame::CallFrame;
use crate::machine_code::MachineCode;
use crate::ops::{control, diagnostics, registers, sends, stack, variables};
use crate::state::State;
use crate::unwind::UnwindType;
use garnet_compiler::bytecode::OPCODE_COUNT;
use garnet_core::{Value, VmError, VmResult};
use garnet_runtime::exception::{
    attach_locations, exception_locations, make_interpreter_error, make_type_error,
};
use std::sync::Arc;

/// What a handler tells the trampoline.
pub enum Signal {
    Continue,
    Return(Value),
}

/// A handler: reads operands at `frame.ip + 1..`, advances `ip` by its
/// width, and continues, returns, or raises.
pub type OpHandler = fn(&mut State, &mut CallFrame, &[u64]) -> VmResult<Signal>;

/// Handler table, indexed by the handler token the preparer installs in
/// every header word (the opcode id).
static HANDLERS: [OpHandler; OPCODE_COUNT] = [
    stack::noop,                        // 0
    stack::pop,                         // 1
    stack::dup_top,                     // 2
    stack::ret,                         // 3
    stack::push_nil,                    // 4
    stack::push_true,                   // 5
    stack::push_false,                  // 6
    stack::push_self,                   // 7
    stack::push_int,                    // 8
    stack::push_tagged_nil,             // 9
    stack::push_literal,                // 10
    stack::push_memo,                   // 11
    stack::push_local,                  // 12
    stack::set_local,                   // 13
    control::goto,                      // 14
    control::goto_if_true,              // 15
    control::goto_if_false,             // 16
    sends::allow_private,               // 17
    sends::send_method,                 // 18
    sends::send_stack,                  // 19
    sends::send_stack_with_block,       // 20
    sends::send_stack_with_splat,       // 21
    sends::send_super_stack_with_block, // 22
    sends::send_super_stack_with_splat, // 23
    sends::zsuper,                      // 24
    sends::send_vcall,                  // 25
    sends::object_to_s,                 // 26
    sends::check_serial,                // 27
    sends::check_serial_private,        // 28
    variables::push_const,              // 29
    variables::find_const,              // 30
    variables::set_const,               // 31
    variables::set_const_at,            // 32
    variables::set_ivar,                // 33
    variables::push_ivar,               // 34
    variables::create_block,            // 35
    variables::invoke_primitive,        // 36
    control::setup_unwind,              // 37
    control::unwind,                    // 38
    control::raise_exc,                 // 39
    control::reraise,                   // 40
    control::push_exception,            // 41
    diagnostics::m_counter,             // 42
    diagnostics::m_log,                 // 43
    registers::r_load_literal,          // 44
    registers::r_load_local,            // 45
    registers::r_store_local,           // 46
    registers::r_load_stack,            // 47
    registers::r_store_stack,           // 48
    registers::r_load_self,             // 49
    registers::r_load_neg1,             // 50
    registers::r_load_0,                // 51
    registers::r_load_1,                // 52
    registers::r_load_2,                // 53
    registers::r_load_true,             // 54
    registers::r_load_false,            // 55
    registers::r_load_nil,              // 56
    registers::r_ret,                   // 57
    registers::b_if,                    // 58
    sends::b_if_serial,                 // 59
    registers::int_neg,                 // 60
    registers::int_not,                 // 61
    registers::int_add,                 // 62
    registers::int_sub,                 // 63
    registers::int_mul,                 // 64
    registers::int_div,                 // 65
    registers::int_eq,                  // 66
    registers::int_lt,                  // 67
    registers::int_le,                  // 68
];

/// Interpret a prepared stream in `frame` until it returns. Language
/// exceptions walk the unwind stack here; everything unhandled propagates to
/// the `execute` boundary.
pub fn run(
    state: &mut State,
    machine_code: &Arc<MachineCode>,
    frame: &mut CallFrame,
) -> VmResult<Value> {
    // Method entry is a safepoint.
    state.safepoint_poll();

    let machine_code = machine_code.clone();
    let stream = &machine_code.stream;

    loop {
        let token = *stream
            .get(frame.ip)
            .ok_or_else(|| VmError::internal("instruction pointer ran off the stream"))?
            as usize;
        let handler = HANDLERS
            .get(token)
            .ok_or_else(|| VmError::internal("invalid handler token in stream"))?;

        state.stats.record_dispatch();
        match handler(state, frame, stream) {
            Ok(Signal::Continue) => {}
            Ok(Signal::Return(value)) => return Ok(value),
            Err(error) => begin_unwind(state, frame, error)?,
        }
    }
}

/// Walk the frame's unwind stack for a language exception: `rescue` recovers
/// at its handler ip, `ensure` runs its handler and re-raises via the
/// frame's pending slot. Host failures pass straight through to the
/// `execute` boundary.
fn begin_unwind(state: &mut State, frame: &mut CallFrame, error: VmError) -> VmResult<()> {
    let VmError::Raised(exception) = error else {
        return Err(error);
    };

    while let Some(entry) = frame.unwinds.pop() {
        match entry.site.unwind_type {
            UnwindType::Rescue => {
                frame.set_sp(entry.sp);
                frame.ip = entry.site.ip as usize;
                state.set_current_exception(exception);
                return Ok(());
            }
            UnwindType::Ensure => {
                frame.set_sp(entry.sp);
                frame.ip = entry.site.ip as usize;
                frame.pending_raise = Some(exception);
                return Ok(());
            }
            UnwindType::None => {}
        }
    }

    Err(VmError::Raised(exception))
}

/// The dispatch boundary: bind the frame, run, translate any failure into a
/// language exception raised on `state`.
///
/// Returns the sentinel zero on failure.
pub fn execute(state: &mut State, machine_code: &Arc<MachineCode>, frame: &mut CallFrame) -> Value {
    frame.bind(machine_code);

    match run(state, machine_code, frame) {
        Ok(value) => value,
        Err(error) => {
            let exception = translate_failure(state, frame, error);
            state.runtime.raise_exception(exception);
            Value::sentinel()
        }
    }
}

fn translate_failure(state: &mut State, frame: &mut CallFrame, error: VmError) -> Value {
    let locations = state.location_snapshot(frame);

    match error {
        VmError::Type {
            expected,
            object,
            reason,
        } => {
            let exception = make_type_error(&mut state.runtime, expected, object, reason);
            attach_locations(&mut state.runtime, exception, locations);
            frame.flush_scope(&mut state.runtime);
            exception
        }

        VmError::Raised(exception) => {
            let missing_locations = exception_locations(&state.runtime, exception)
                .map(|recorded| recorded.is_empty())
                .unwrap_or(false);
            if missing_locations {
                attach_locations(&mut state.runtime, exception, locations);
            }
            exception
        }

        VmError::Internal(message) => {
            let exception = make_interpreter_error(&mut state.runtime, message);
            attach_locations(&mut state.runtime, exception, locations);
            frame.flush_scope(&mut state.runtime);
            exception
        }
    }
}
