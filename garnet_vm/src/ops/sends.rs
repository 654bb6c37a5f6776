//! Send handlers: every variant loads its call site from the prepared stream
//! and dispatches through the site's cache executor.

use crate::call_site::{CacheState, CallSite};
use crate::frame::CallFrame;
use crate::inline_cache::MonoInlineCache;
use crate::interpreter::Signal;
use crate::state::State;
use garnet_core::{Value, VmError, VmResult};
use garnet_runtime::{Arguments, Executable};
use std::sync::Arc;

/// Mark the next send privileged.
#[inline(always)]
pub fn allow_private(_state: &mut State, frame: &mut CallFrame, _stream: &[u64]) -> VmResult<Signal> {
    frame.is.set_allow_private();
    frame.ip += 1;
    Ok(Signal::Continue)
}

fn site_at(state: &State, stream: &[u64], pos: usize) -> VmResult<Arc<CallSite>> {
    state
        .runtime
        .heap
        .native_as::<CallSite>(Value::from_raw(stream[pos]))
        .ok_or_else(|| VmError::internal("call site missing from stream"))
}

/// Pop `argc` arguments and the receiver beneath them.
fn stack_arguments(
    frame: &mut CallFrame,
    site: &CallSite,
    argc: usize,
    block: Value,
) -> VmResult<Arguments> {
    let mut list = Vec::with_capacity(argc);
    for index in 0..argc {
        list.push(frame.peek(argc - 1 - index)?);
    }
    let recv = frame.peek(argc)?;
    frame.drop_values(argc + 1)?;
    let mut args = Arguments::with_args(site.name, recv, list);
    args.block = block;
    Ok(args)
}

/// Pop `argc` arguments for a super send; the receiver is the frame's self.
fn super_arguments(
    frame: &mut CallFrame,
    site: &CallSite,
    argc: usize,
    block: Value,
) -> VmResult<Arguments> {
    let mut list = Vec::with_capacity(argc);
    for index in 0..argc {
        list.push(frame.peek(argc - 1 - index)?);
    }
    frame.drop_values(argc)?;
    let mut args = Arguments::with_args(site.name, frame.self_value, list);
    args.block = block;
    Ok(args)
}

/// Append a splat array's items to the argument list.
fn apply_splat(state: &State, args: &mut Arguments, splat: Value) -> VmResult<()> {
    if splat.is_nil() {
        return Ok(());
    }
    match state.runtime.heap.array_at(splat) {
        Some(items) => {
            args.args.extend(items.iter().copied());
            Ok(())
        }
        None => Err(VmError::type_error(
            "Array",
            splat,
            "no implicit conversion into Array",
        )),
    }
}

/// Dispatch through the site and push the result.
fn complete_send(
    state: &mut State,
    frame: &mut CallFrame,
    site: Arc<CallSite>,
    mut args: Arguments,
    width: usize,
) -> VmResult<Signal> {
    state.stats.record_send();
    let result = CallSite::execute(state, &site, frame, &mut args);
    frame.is.clear_call_flags();
    let value = result?;
    frame.push(value)?;
    frame.ip += width;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn send_method(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let site = site_at(state, stream, frame.ip + 1)?;
    let recv = frame.pop()?;
    let args = Arguments::new(site.name, recv);
    complete_send(state, frame, site, args, 2)
}

#[inline(always)]
pub fn send_stack(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let site = site_at(state, stream, frame.ip + 1)?;
    let argc = stream[frame.ip + 2] as usize;
    let args = stack_arguments(frame, &site, argc, Value::nil())?;
    complete_send(state, frame, site, args, 3)
}

#[inline(always)]
pub fn send_stack_with_block(
    state: &mut State,
    frame: &mut CallFrame,
    stream: &[u64],
) -> VmResult<Signal> {
    let site = site_at(state, stream, frame.ip + 1)?;
    let argc = stream[frame.ip + 2] as usize;
    let block = frame.pop()?;
    let args = stack_arguments(frame, &site, argc, block)?;
    complete_send(state, frame, site, args, 3)
}

#[inline(always)]
pub fn send_stack_with_splat(
    state: &mut State,
    frame: &mut CallFrame,
    stream: &[u64],
) -> VmResult<Signal> {
    let site = site_at(state, stream, frame.ip + 1)?;
    let argc = stream[frame.ip + 2] as usize;
    let block = frame.pop()?;
    let splat = frame.pop()?;
    let mut args = stack_arguments(frame, &site, argc, block)?;
    apply_splat(state, &mut args, splat)?;
    complete_send(state, frame, site, args, 3)
}

#[inline(always)]
pub fn send_super_stack_with_block(
    state: &mut State,
    frame: &mut CallFrame,
    stream: &[u64],
) -> VmResult<Signal> {
    let site = site_at(state, stream, frame.ip + 1)?;
    let argc = stream[frame.ip + 2] as usize;
    let block = frame.pop()?;
    let args = super_arguments(frame, &site, argc, block)?;
    complete_send(state, frame, site, args, 3)
}

#[inline(always)]
pub fn send_super_stack_with_splat(
    state: &mut State,
    frame: &mut CallFrame,
    stream: &[u64],
) -> VmResult<Signal> {
    let site = site_at(state, stream, frame.ip + 1)?;
    let argc = stream[frame.ip + 2] as usize;
    let block = frame.pop()?;
    let splat = frame.pop()?;
    let mut args = super_arguments(frame, &site, argc, block)?;
    apply_splat(state, &mut args, splat)?;
    complete_send(state, frame, site, args, 3)
}

/// Bare super: current self, current block, no explicit arguments.
#[inline(always)]
pub fn zsuper(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let site = site_at(state, stream, frame.ip + 1)?;
    let mut args = Arguments::new(site.name, frame.self_value);
    args.block = frame.block;
    complete_send(state, frame, site, args, 2)
}

/// Implicit-self send with no arguments.
#[inline(always)]
pub fn send_vcall(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let site = site_at(state, stream, frame.ip + 1)?;
    let args = Arguments::new(site.name, frame.self_value);
    complete_send(state, frame, site, args, 2)
}

/// Coerce the top of stack to a string via its `to_s`, unless it already is
/// one.
#[inline(always)]
pub fn object_to_s(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let site = site_at(state, stream, frame.ip + 1)?;
    let recv = frame.pop()?;
    if state.runtime.heap.string_at(recv).is_some() {
        frame.push(recv)?;
        frame.ip += 2;
        return Ok(Signal::Continue);
    }
    let args = Arguments::new(site.name, recv);
    complete_send(state, frame, site, args, 2)
}

/// True when the resolved method's body serial matches the operand.
fn serial_matches(state: &mut State, frame: &CallFrame, site: &Arc<CallSite>, recv: Value, serial: u64) -> bool {
    let klass = state.runtime.class_of(recv);
    let mode = garnet_runtime::LookupMode {
        allow_private: site.is_private() || frame.is.allow_private(),
        is_super: site.is_super(),
        is_vcall: site.is_vcall(),
        self_class: state.runtime.class_of(frame.self_value),
    };
    state.stats.record_full_lookup();
    let dispatch = state.runtime.classes.lookup_method(klass, site.name, mode);
    match dispatch.method.as_deref() {
        Some(Executable::Compiled(code)) => code.serial == serial,
        Some(Executable::Primitive { .. }) => serial == 0,
        None => false,
    }
}

#[inline(always)]
pub fn check_serial(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let site = site_at(state, stream, frame.ip + 1)?;
    let serial = stream[frame.ip + 2];
    let recv = frame.pop()?;
    let matches = serial_matches(state, frame, &site, recv, serial);
    frame.is.clear_call_flags();
    frame.push(Value::boolean(matches))?;
    frame.ip += 3;
    Ok(Signal::Continue)
}

#[inline(always)]
pub fn check_serial_private(
    state: &mut State,
    frame: &mut CallFrame,
    stream: &[u64],
) -> VmResult<Signal> {
    check_serial(state, frame, stream)
}

/// Serial guard over a register: branch while the site's cache is still
/// valid for the receiver, refresh the cache and fall through otherwise.
#[inline(always)]
pub fn b_if_serial(state: &mut State, frame: &mut CallFrame, stream: &[u64]) -> VmResult<Signal> {
    let site = site_at(state, stream, frame.ip + 1)?;
    let recv = frame.slot(stream[frame.ip + 2] as usize)?;
    let target = stream[frame.ip + 3] as usize;

    let receiver_data = state.runtime.class_data_of(recv);
    let matches = match site.cache() {
        CacheState::Mono(cache) if cache.receiver_data.raw() == receiver_data.raw() => {
            state.stats.record_cache_hit();
            cache.record_hit();
            true
        }
        current => {
            state.stats.record_cache_miss();
            refresh_guard(state, frame, &site, recv, current);
            false
        }
    };
    frame.is.clear_call_flags();

    if matches {
        if target <= frame.ip {
            state.safepoint_poll();
        }
        frame.ip = target;
    } else {
        frame.ip += 4;
    }
    Ok(Signal::Continue)
}

/// Re-resolve a guard site after a miss: an empty site gets a monomorphic
/// cache for the receiver, a populated one collapses to megamorphic.
fn refresh_guard(
    state: &mut State,
    frame: &CallFrame,
    site: &Arc<CallSite>,
    recv: Value,
    current: CacheState,
) {
    state.stats.record_full_lookup();
    let klass = state.runtime.class_of(recv);
    let mode = garnet_runtime::LookupMode {
        allow_private: site.is_private() || frame.is.allow_private(),
        is_super: site.is_super(),
        is_vcall: site.is_vcall(),
        self_class: state.runtime.class_of(frame.self_value),
    };
    let dispatch = state.runtime.classes.lookup_method(klass, site.name, mode);

    match current {
        CacheState::Empty => {
            let receiver_data = state.runtime.classes.class_data(klass);
            let cache = Arc::new(MonoInlineCache::new(receiver_data, &dispatch));
            cache.record_hit();
            let execute = if dispatch.found() {
                crate::inline_cache::check_cache
            } else {
                crate::inline_cache::check_cache_mm
            };
            site.rewrite(execute, CacheState::Mono(cache));
        }
        CacheState::Mono(_) => {
            site.rewrite(crate::inline_cache::megamorphic_execute, CacheState::Mega);
        }
        CacheState::Mega => {}
    }
}
