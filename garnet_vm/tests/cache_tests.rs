//! Inline-cache protocol: install, hit acceleration, method-missing
//! memoization, serial invalidation, and JIT promotion.

use garnet_compiler::BytecodeBuilder;
use garnet_core::{Symbol, Value, VmConfig};
use garnet_runtime::exception::exception_message;
use garnet_runtime::MethodMissingReason;
use garnet_vm::{CacheState, State};
use std::sync::Arc;

fn plus_code() -> Arc<garnet_compiler::CompiledCode> {
    let mut b = BytecodeBuilder::new("adder").stack_size(2);
    b.push_int(3);
    b.push_int(4);
    b.send_stack("+", 1);
    b.ret();
    Arc::new(b.finish())
}

#[test]
fn first_send_populates_monomorphic_cache() {
    let mut state = State::new();
    let code = plus_code();
    let machine_code = state.prepare(&code).unwrap();

    let site = machine_code.call_site(4).expect("send site").clone();
    assert_eq!(site.kind(), "empty");
    assert_eq!(machine_code.call_site_count, 1);

    let result = state.run_code(&code, Value::nil()).unwrap();
    assert_eq!(result.as_fixnum(), Some(7));

    assert_eq!(site.kind(), "monomorphic");
    let CacheState::Mono(cache) = site.cache() else {
        panic!("expected a monomorphic cache");
    };
    let integer = state.runtime.classes.well_known().integer;
    assert_eq!(cache.receiver_data.raw(), state.runtime.classes.class_data(integer).raw());
    assert_eq!(cache.stored_module, integer);
    assert!(cache.method.is_some());
    assert_eq!(cache.method_missing, MethodMissingReason::None);
    assert_eq!(cache.hits(), 1);
}

#[test]
fn repeated_sends_hit_without_further_lookup() {
    let mut state = State::new();
    let code = plus_code();
    let machine_code = state.prepare(&code).unwrap();
    let site = machine_code.call_site(4).expect("send site").clone();

    for _ in 0..1_000 {
        state.run_code(&code, Value::nil()).unwrap();
    }

    let CacheState::Mono(cache) = site.cache() else {
        panic!("expected a monomorphic cache");
    };
    assert_eq!(cache.hits(), 1_000);

    // One full lookup installed the cache; none after.
    let lookups_after_warmup = state.stats.full_lookups();
    assert_eq!(lookups_after_warmup, 1);
}

#[test]
fn method_missing_installs_mm_cache_and_raises() {
    let mut state = State::new();
    let known = *state.runtime.classes.well_known();
    let blank = state.runtime.classes.define_class("Blank", known.object);
    let receiver = state.runtime.heap.alloc_instance(blank);

    let mut b = BytecodeBuilder::new("missing").stack_size(1);
    let recv = b.literal(receiver) as u64;
    b.op1(garnet_compiler::bytecode::Opcode::PushLiteral, recv);
    b.send_method("frobnicate");
    b.ret();
    let code = Arc::new(b.finish());
    let machine_code = state.prepare(&code).unwrap();
    let site = machine_code.call_site(2).expect("send site").clone();

    let result = state.run_code(&code, receiver).unwrap();
    assert!(result.is_sentinel());

    // The site memoized the miss.
    let CacheState::Mono(cache) = site.cache() else {
        panic!("expected the method-missing cache shape");
    };
    assert!(cache.method.is_none());
    assert_eq!(cache.method_missing, MethodMissingReason::Normal);
    assert_eq!(state.method_missing_reason(), MethodMissingReason::Normal);

    // The default method_missing raised NoMethodError.
    let exception = state.runtime.raised_exception().unwrap();
    assert_eq!(state.runtime.class_of(exception), known.no_method_error);
    assert!(exception_message(&state.runtime, exception)
        .unwrap()
        .contains("frobnicate"));

    // A second send repeats through the memoized shape without new lookups.
    let lookups = state.stats.full_lookups();
    state.runtime.clear_raised_exception();
    state.run_code(&code, receiver).unwrap();
    assert_eq!(state.stats.full_lookups(), lookups);
}

#[test]
fn private_method_misses_with_private_reason() {
    let mut state = State::new();
    let known = *state.runtime.classes.well_known();
    let guarded = state.runtime.classes.define_class("Guarded", known.object);
    state.runtime.classes.define_method(
        guarded,
        Symbol::intern("hidden"),
        garnet_runtime::Visibility::Private,
        Arc::new(garnet_runtime::Executable::Primitive {
            name: Symbol::intern("hidden"),
            func: |_runtime, _args| Ok(Value::fixnum(1)),
        }),
    );
    let receiver = state.runtime.heap.alloc_instance(guarded);

    let mut b = BytecodeBuilder::new("private_send").stack_size(1);
    let recv = b.literal(receiver) as u64;
    b.op1(garnet_compiler::bytecode::Opcode::PushLiteral, recv);
    b.send_method("hidden");
    b.ret();
    let code = Arc::new(b.finish());

    let result = state.run_code(&code, Value::nil()).unwrap();
    assert!(result.is_sentinel());
    assert_eq!(state.method_missing_reason(), MethodMissingReason::Private);

    let exception = state.runtime.raised_exception().unwrap();
    assert!(exception_message(&state.runtime, exception)
        .unwrap()
        .contains("private method"));
}

#[test]
fn vcall_miss_records_vcall_reason() {
    let mut state = State::new();
    let mut b = BytecodeBuilder::new("vcall_miss").stack_size(1);
    b.send_vcall("no_such_thing");
    b.ret();
    let code = Arc::new(b.finish());

    let result = state.run_code(&code, Value::nil()).unwrap();
    assert!(result.is_sentinel());
    assert_eq!(state.method_missing_reason(), MethodMissingReason::Vcall);
}

#[test]
fn method_table_mutation_invalidates_cache() {
    let mut state = State::new();
    let code = plus_code();
    let machine_code = state.prepare(&code).unwrap();
    let site = machine_code.call_site(4).expect("send site").clone();

    state.run_code(&code, Value::nil()).unwrap();
    assert_eq!(site.kind(), "monomorphic");
    let misses_before = state
        .stats
        .cache_misses
        .load(std::sync::atomic::Ordering::Relaxed);

    // Redefining any Integer method advances the class's method generation;
    // the cached receiver descriptor no longer compares equal.
    let integer = state.runtime.classes.well_known().integer;
    state.runtime.classes.define_method(
        integer,
        Symbol::intern("spin"),
        garnet_runtime::Visibility::Public,
        Arc::new(garnet_runtime::Executable::Primitive {
            name: Symbol::intern("spin"),
            func: |_runtime, _args| Ok(Value::nil()),
        }),
    );

    let result = state.run_code(&code, Value::nil()).unwrap();
    assert_eq!(result.as_fixnum(), Some(7));
    assert!(
        state
            .stats
            .cache_misses
            .load(std::sync::atomic::Ordering::Relaxed)
            > misses_before
    );
}

#[test]
fn hot_site_enqueues_one_jit_request() {
    let config = VmConfig {
        jit_threshold: 5,
        ..VmConfig::default()
    };
    let mut state = State::with_config(config);

    // A compiled (bytecode) method is JIT-promotable.
    let mut method = BytecodeBuilder::new("hot_method").stack_size(1);
    method.push_int(11);
    method.ret();
    let method_code = Arc::new(method.finish());

    let known = *state.runtime.classes.well_known();
    let hot = state.runtime.classes.define_class("Hot", known.object);
    state.runtime.classes.define_method(
        hot,
        Symbol::intern("warm"),
        garnet_runtime::Visibility::Public,
        Arc::new(garnet_runtime::Executable::Compiled(method_code.clone())),
    );
    let receiver = state.runtime.heap.alloc_instance(hot);

    let mut b = BytecodeBuilder::new("hot_caller").stack_size(1);
    let recv = b.literal(receiver) as u64;
    b.op1(garnet_compiler::bytecode::Opcode::PushLiteral, recv);
    b.send_method("warm");
    b.ret();
    let code = Arc::new(b.finish());

    for _ in 0..20 {
        assert_eq!(
            state.run_code(&code, Value::nil()).unwrap().as_fixnum(),
            Some(11)
        );
    }

    // Exactly one request, despite crossing the threshold repeatedly.
    assert_eq!(state.jit.pending_count(), 1);
}
