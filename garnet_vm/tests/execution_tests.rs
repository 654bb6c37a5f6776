//! Dispatch: end-to-end execution of prepared streams, exception
//! translation, unwinding, constants, and diagnostics.

use garnet_compiler::bytecode::Opcode;
use garnet_compiler::BytecodeBuilder;
use garnet_core::{Symbol, Value};
use garnet_runtime::exception::{exception_locations, exception_message};
use garnet_vm::{interpreter, CallFrame, State};
use std::sync::Arc;

fn run(state: &mut State, b: BytecodeBuilder) -> Value {
    let code = Arc::new(b.finish());
    state.run_code(&code, Value::nil()).expect("prepares cleanly")
}

#[test]
fn push_literal_round_trip() {
    let mut state = State::new();
    let string_class = state.runtime.classes.well_known().string;
    let hello = state.runtime.heap.alloc_string(string_class, "hello");

    let mut b = BytecodeBuilder::new("literal").stack_size(1);
    b.push_literal(hello);
    b.ret();

    let result = run(&mut state, b);
    assert_eq!(result, hello);
    assert_eq!(state.runtime.heap.string_at(result), Some("hello"));
    assert!(!state.runtime.has_raised_exception());
}

#[test]
fn register_arithmetic_loop() {
    // Sum 1..=5 with register ops and a backward b_if.
    let mut state = State::new();
    let mut b = BytecodeBuilder::new("sum_loop").stack_size(1).local_count(4);
    let bound = b.literal(Value::fixnum(5)) as u64;
    // r0 = total, r1 = i, r2 = scratch, r3 = 1.
    b.op1(Opcode::RLoad0, 0);
    b.op1(Opcode::RLoad0, 1);
    b.op1(Opcode::RLoad1, 3);
    let loop_top = b.here() as u64;
    b.op3(Opcode::IntAdd, 1, 1, 3); // i += 1
    b.op3(Opcode::IntAdd, 0, 0, 1); // total += i
    b.op2(Opcode::RLoadLiteral, 2, bound);
    b.op3(Opcode::IntLt, 2, 1, 2); // scratch = i < 5
    b.op2(Opcode::BIf, 2, loop_top);
    b.op1(Opcode::RRet, 0);

    let result = run(&mut state, b);
    assert_eq!(result.as_fixnum(), Some(15));
}

#[test]
fn send_through_integer_plus() {
    let mut state = State::new();
    let mut b = BytecodeBuilder::new("plus").stack_size(2);
    b.push_int(3);
    b.push_int(4);
    b.send_stack("+", 1);
    b.ret();

    let result = run(&mut state, b);
    assert_eq!(result.as_fixnum(), Some(7));
}

#[test]
fn compiled_method_invocation() {
    let mut state = State::new();

    // Widget#doubled(n) = n + n, as bytecode.
    let mut method = BytecodeBuilder::new("doubled").stack_size(2).local_count(1).args(1, 1);
    method.op1(Opcode::PushLocal, 0);
    method.op1(Opcode::PushLocal, 0);
    method.send_stack("+", 1);
    method.ret();
    let method_code = Arc::new(method.finish());

    let known = *state.runtime.classes.well_known();
    let widget = state.runtime.classes.define_class("Widget", known.object);
    state.runtime.classes.define_method(
        widget,
        Symbol::intern("doubled"),
        garnet_runtime::Visibility::Public,
        Arc::new(garnet_runtime::Executable::Compiled(method_code)),
    );
    let receiver = state.runtime.heap.alloc_instance(widget);

    let mut b = BytecodeBuilder::new("caller").stack_size(3);
    let recv_index = b.literal(receiver) as u64;
    b.op1(Opcode::PushLiteral, recv_index);
    b.push_int(21);
    b.send_stack("doubled", 1);
    b.ret();

    let result = run(&mut state, b);
    assert_eq!(result.as_fixnum(), Some(42));
}

#[test]
fn object_to_s_coerces_and_passes_strings_through() {
    let mut state = State::new();

    let mut b = BytecodeBuilder::new("to_s").stack_size(1);
    b.push_int(42);
    let to_s = b.literal(Value::symbol(Symbol::intern("to_s"))) as u64;
    b.op1(Opcode::ObjectToS, to_s);
    b.ret();
    let result = run(&mut state, b);
    assert_eq!(state.runtime.heap.string_at(result), Some("42"));

    // A string flows through untouched.
    let string_class = state.runtime.classes.well_known().string;
    let original = state.runtime.heap.alloc_string(string_class, "already");
    let mut b = BytecodeBuilder::new("to_s_identity").stack_size(1);
    b.push_literal(original);
    let to_s = b.literal(Value::symbol(Symbol::intern("to_s"))) as u64;
    b.op1(Opcode::ObjectToS, to_s);
    b.ret();
    let result = run(&mut state, b);
    assert_eq!(result, original);
}

#[test]
fn instance_variables_round_trip() {
    let mut state = State::new();
    let known = *state.runtime.classes.well_known();
    let widget = state.runtime.classes.define_class("IvarWidget", known.object);
    let receiver = state.runtime.heap.alloc_instance(widget);

    let mut b = BytecodeBuilder::new("ivars").stack_size(2);
    let name = b.literal(Value::symbol(Symbol::intern("@size"))) as u64;
    b.push_int(9);
    b.op1(Opcode::SetIvar, name);
    b.op0(Opcode::Pop);
    b.op1(Opcode::PushIvar, name);
    b.ret();
    let code = Arc::new(b.finish());

    let result = state.run_code(&code, receiver).unwrap();
    assert_eq!(result.as_fixnum(), Some(9));
}

#[test]
fn invoke_primitive_executes_resolved_invoker() {
    let mut state = State::new();
    let mut b = BytecodeBuilder::new("prim").stack_size(3);
    b.push_int(20);
    b.push_int(22);
    b.invoke_primitive("fixnum_add", 2);
    b.ret();

    let result = run(&mut state, b);
    assert_eq!(result.as_fixnum(), Some(42));
}

#[test]
fn create_block_closes_over_self() {
    let mut state = State::new();

    let mut body = BytecodeBuilder::new("block_body").stack_size(1);
    body.op0(Opcode::PushNil);
    body.ret();
    let block_code = Arc::new(body.block_body().finish());

    let code_class = state.runtime.classes.well_known().compiled_code;
    let code_literal = state.runtime.heap.alloc_code(code_class, block_code);

    let mut b = BytecodeBuilder::new("maker").stack_size(1);
    let index = b.literal(code_literal) as u64;
    b.op1(Opcode::CreateBlock, index);
    b.ret();

    let result = run(&mut state, b);
    let object = state.runtime.heap.get(result).expect("block env allocated");
    assert!(matches!(object.kind, garnet_runtime::ObjectKind::BlockEnv(_)));
}

#[test]
fn type_error_translates_with_locations_and_flushed_scope() {
    let mut state = State::new();
    let string_class = state.runtime.classes.well_known().string;
    let not_an_int = state.runtime.heap.alloc_string(string_class, "nope");

    let mut b = BytecodeBuilder::new("type_error").stack_size(1).local_count(3);
    let index = b.literal(not_an_int) as u64;
    b.op2(Opcode::RLoadLiteral, 0, index);
    b.op1(Opcode::RLoad1, 1);
    b.op3(Opcode::IntAdd, 2, 0, 1);
    b.op1(Opcode::RRet, 2);
    let code = Arc::new(b.finish());

    let machine_code = state.prepare(&code).unwrap();
    let module = state.runtime.classes.well_known().object;
    let mut frame = CallFrame::new(&machine_code, Value::nil(), module);
    let result = interpreter::execute(&mut state, &machine_code, &mut frame);

    // Sentinel zero; failure is observed through the state.
    assert!(result.is_sentinel());
    assert!(state.runtime.has_raised_exception());

    let exception = state.runtime.raised_exception().unwrap();
    let known = *state.runtime.classes.well_known();
    assert_eq!(state.runtime.class_of(exception), known.type_error);

    let locations = exception_locations(&state.runtime, exception).unwrap();
    assert!(!locations.is_empty());
    assert_eq!(&*locations[0].method.as_str(), "type_error");

    assert!(frame.scope.flushed());
}

#[test]
fn rescue_site_recovers_from_raise() {
    let mut state = State::new();
    let exc_class = state.runtime.classes.well_known().exception;
    let exception = state.runtime.heap.alloc_exception(
        exc_class,
        garnet_runtime::ExceptionBody::new("deliberate"),
    );

    let mut b = BytecodeBuilder::new("rescued").stack_size(2);
    let handler = b.new_label();
    b.setup_unwind_to(handler, 1);
    b.push_literal(exception);
    b.op0(Opcode::RaiseExc);
    // Unreachable fallthrough.
    b.op0(Opcode::PushNil);
    b.ret();
    b.bind(handler);
    b.op0(Opcode::PushException);
    b.ret();

    let result = run(&mut state, b);
    assert_eq!(result, exception);
    assert!(!state.runtime.has_raised_exception());
}

#[test]
fn ensure_site_runs_and_reraises() {
    let mut state = State::new();
    let exc_class = state.runtime.classes.well_known().exception;
    let exception = state.runtime.heap.alloc_exception(
        exc_class,
        garnet_runtime::ExceptionBody::new("ensure me"),
    );

    let mut b = BytecodeBuilder::new("ensured").stack_size(2);
    let handler = b.new_label();
    b.setup_unwind_to(handler, 2);
    b.push_literal(exception);
    b.op0(Opcode::RaiseExc);
    b.bind(handler);
    // The ensure body runs, then re-raises the pending exception.
    b.op0(Opcode::Reraise);

    let code = Arc::new(b.finish());
    let result = state.run_code(&code, Value::nil()).unwrap();

    assert!(result.is_sentinel());
    assert!(state.runtime.has_raised_exception());
    assert_eq!(state.runtime.raised_exception(), Some(exception));
    // The re-raised exception got a location snapshot at the boundary.
    let locations = exception_locations(&state.runtime, exception).unwrap();
    assert!(!locations.is_empty());
}

#[test]
fn unwind_pops_protection() {
    let mut state = State::new();
    let exc_class = state.runtime.classes.well_known().exception;
    let exception = state
        .runtime
        .heap
        .alloc_exception(exc_class, garnet_runtime::ExceptionBody::new("late"));

    // The rescue region is exited (unwind) before the raise, so the raise
    // propagates out.
    let mut b = BytecodeBuilder::new("popped").stack_size(2);
    let handler = b.new_label();
    b.setup_unwind_to(handler, 1);
    b.op1(Opcode::Unwind, 0);
    b.push_literal(exception);
    b.op0(Opcode::RaiseExc);
    b.bind(handler);
    b.op0(Opcode::PushNil);
    b.ret();

    let code = Arc::new(b.finish());
    let result = state.run_code(&code, Value::nil()).unwrap();
    assert!(result.is_sentinel());
    assert_eq!(state.runtime.raised_exception(), Some(exception));
}

#[test]
fn constants_resolve_through_cache_and_invalidate() {
    let mut state = State::new();
    let name = Symbol::intern("LIMIT");
    state.runtime.set_constant(name, Value::fixnum(10));

    let mut b = BytecodeBuilder::new("const_read").stack_size(1);
    b.push_const("LIMIT");
    b.ret();
    let code = Arc::new(b.finish());

    assert_eq!(state.run_code(&code, Value::nil()).unwrap().as_fixnum(), Some(10));
    let misses = state.stats.constant_misses.load(std::sync::atomic::Ordering::Relaxed);

    // Second run hits the cache.
    assert_eq!(state.run_code(&code, Value::nil()).unwrap().as_fixnum(), Some(10));
    assert_eq!(
        state.stats.constant_misses.load(std::sync::atomic::Ordering::Relaxed),
        misses
    );

    // Any constant mutation bumps the generation; the cache lazily refills.
    state.runtime.set_constant(name, Value::fixnum(99));
    assert_eq!(state.run_code(&code, Value::nil()).unwrap().as_fixnum(), Some(99));
}

#[test]
fn missing_constant_raises_name_error() {
    let mut state = State::new();
    let mut b = BytecodeBuilder::new("missing_const").stack_size(1);
    b.push_const("NOWHERE");
    b.ret();
    let code = Arc::new(b.finish());

    let result = state.run_code(&code, Value::nil()).unwrap();
    assert!(result.is_sentinel());
    let exception = state.runtime.raised_exception().unwrap();
    let known = *state.runtime.classes.well_known();
    assert_eq!(state.runtime.class_of(exception), known.name_error);
    assert!(exception_message(&state.runtime, exception)
        .unwrap()
        .contains("NOWHERE"));
}

#[test]
fn check_serial_compares_method_body_serial() {
    let mut state = State::new();

    let mut method = BytecodeBuilder::new("stable").stack_size(1);
    method.op0(Opcode::PushNil);
    method.ret();
    let method_code = Arc::new(method.finish());
    let serial = method_code.serial;

    let known = *state.runtime.classes.well_known();
    let holder = state.runtime.classes.define_class("SerialHolder", known.object);
    state.runtime.classes.define_method(
        holder,
        Symbol::intern("stable"),
        garnet_runtime::Visibility::Public,
        Arc::new(garnet_runtime::Executable::Compiled(method_code)),
    );
    let receiver = state.runtime.heap.alloc_instance(holder);

    let build = |expected: u64, state: &mut State| {
        let mut b = BytecodeBuilder::new("serial_check").stack_size(1);
        let recv = b.literal(receiver) as u64;
        b.op1(Opcode::PushLiteral, recv);
        let name = b.literal(Value::symbol(Symbol::intern("stable"))) as u64;
        b.op2(Opcode::CheckSerial, name, expected);
        b.ret();
        let code = Arc::new(b.finish());
        state.run_code(&code, Value::nil()).unwrap()
    };

    assert!(build(serial, &mut state).is_true());
    assert!(build(serial + 1, &mut state).is_false());
}

#[test]
fn measurement_counter_counts_executions() {
    let mut state = State::new();
    let mut b = BytecodeBuilder::new("measured").stack_size(1);
    b.op1(Opcode::MCounter, 0);
    b.op0(Opcode::PushNil);
    b.ret();
    let code = Arc::new(b.finish());

    let machine_code = state.prepare(&code).unwrap();
    for _ in 0..3 {
        state.run_code(&code, Value::nil()).unwrap();
    }
    assert_eq!(machine_code.measurement(0).unwrap().count(), 3);
}

#[test]
fn m_log_records_register_contents() {
    let mut state = State::new();
    let mut b = BytecodeBuilder::new("logged").stack_size(1).local_count(1);
    b.op1(Opcode::RLoad2, 0);
    b.op1(Opcode::MLog, 0);
    b.op0(Opcode::PushNil);
    b.ret();
    let code = Arc::new(b.finish());

    state.run_code(&code, Value::nil()).unwrap();
    assert_eq!(state.diagnostics_log.len(), 1);
    assert!(state.diagnostics_log[0].contains('2'));
}
