//! Cross-thread guarantees: call-site publication, JIT queue ordering and
//! coalescing, constant-generation invalidation.

use garnet_compiler::BytecodeBuilder;
use garnet_core::{Symbol, Value};
use garnet_runtime::{ClassId, Dispatch, MethodMissingReason};
use garnet_vm::{inline_cache, CacheState, CallSite, CallSiteFlags, Jit, MonoInlineCache};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn mono_cache(class: ClassId, serial: u32) -> Arc<MonoInlineCache> {
    let dispatch = Dispatch {
        module: class,
        method: None,
        method_missing: MethodMissingReason::Normal,
    };
    Arc::new(MonoInlineCache::new(
        garnet_runtime::ClassData::new(class, serial),
        &dispatch,
    ))
}

/// Readers racing in-place rewrites must always observe a consistent
/// executor/cache pair: either the prior stable shape or the fully built new
/// one.
#[test]
fn call_site_rewrites_publish_whole_states() {
    let site = CallSite::empty(Symbol::intern("race"), 1, 0, CallSiteFlags::default());
    let klass = ClassId::from_index(7);
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let site = site.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut serial = 0u32;
            while !stop.load(Ordering::Relaxed) {
                serial = serial.wrapping_add(1);
                site.rewrite(
                    inline_cache::check_cache,
                    CacheState::Mono(mono_cache(klass, serial)),
                );
                site.rewrite(inline_cache::megamorphic_execute, CacheState::Mega);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let site = site.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut observed_mono = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    match site.cache() {
                        CacheState::Mono(cache) => {
                            // A published cache is always complete: the
                            // descriptor names the class the writer built it
                            // for.
                            assert_eq!(cache.receiver_data.class_id(), klass);
                            observed_mono += 1;
                        }
                        CacheState::Empty | CacheState::Mega => {}
                    }
                }
                observed_mono
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(100));
    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();
    let observed: u64 = readers.into_iter().map(|r| r.join().unwrap()).sum();
    assert!(observed > 0, "readers never saw a monomorphic state");
}

#[test]
fn jit_queue_accepts_concurrent_producers_without_loss() {
    let jit = Jit::new(100);

    let producers: Vec<_> = (0..4)
        .map(|worker| {
            let jit = jit.clone();
            thread::spawn(move || {
                for index in 0..25 {
                    let mut b =
                        BytecodeBuilder::new(&format!("hot_{worker}_{index}")).stack_size(1);
                    b.ret();
                    jit.compile_soon(Arc::new(b.finish()), None, Value::nil(), false, index);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(jit.pending_count(), 100);
}

#[test]
fn duplicate_requests_coalesce_across_threads() {
    let jit = Jit::new(100);
    let mut b = BytecodeBuilder::new("shared_hot").stack_size(1);
    b.ret();
    let code = Arc::new(b.finish());
    let klass = Some(ClassId::from_index(3));

    let requests: Vec<_> = (0..8)
        .map(|_| {
            let jit = jit.clone();
            let code = code.clone();
            thread::spawn(move || jit.compile_soon(code, klass, Value::nil(), false, 1))
        })
        .map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(jit.pending_count(), 1);
    for window in requests.windows(2) {
        assert!(Arc::ptr_eq(&window[0], &window[1]));
    }
}

#[test]
fn constant_generation_bump_is_visible_across_threads() {
    let mut state = garnet_vm::State::new();
    let name = Symbol::intern("SHARED_LIMIT");
    state.runtime.set_constant(name, Value::fixnum(1));

    let before = state.runtime.constant_serial();
    // The runtime's generation counter is the cross-thread invalidation
    // channel; bump it from another thread and observe.
    thread::scope(|scope| {
        scope.spawn(|| {
            state.runtime.bump_constant_serial();
        });
    });
    assert!(state.runtime.constant_serial() > before);
}
