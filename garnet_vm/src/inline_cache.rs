//! The monomorphic inline-cache protocol.
//!
//! Every send flows through one of the executors here:
//!
//! - [`empty_cache_execute`] — a fresh site's first send: full lookup, then
//!   the updater installs a monomorphic cache.
//! - [`check_cache`] — the hot path: one word compare of the receiver
//!   descriptor against the cached one, then a direct invoke. The descriptor
//!   packs the class's method generation, so a redefined method table makes
//!   the compare fail and the send falls through to update.
//! - [`check_cache_mm`] — the memoized method-missing path, so repeated
//!   misses on the same receiver shape never repeat lookup.
//! - [`megamorphic_execute`] — a site that has seen multiple receiver
//!   shapes; full lookup on every send.
//!
//! Hot caches hand their method to the JIT queue once the hit counter
//! crosses the compile threshold.

use crate::call_site::{CacheState, CallSite};
use crate::dispatch;
use crate::frame::CallFrame;
use crate::state::State;
use garnet_core::{Value, VmResult};
use garnet_runtime::{
    Arguments, ClassData, ClassId, Dispatch, Executable, LookupMode, MethodMissingReason,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A populated monomorphic cache: one `(receiver class, method)` pair.
///
/// Immutable once published, except the counters; the site swaps whole cache
/// bodies when it reshapes.
pub struct MonoInlineCache {
    /// Single-word receiver descriptor: class id plus method generation.
    pub receiver_data: ClassData,

    /// Module whose method table produced the method.
    pub stored_module: ClassId,

    /// The resolved executable; `None` on the method-missing shape.
    pub method: Option<Arc<Executable>>,

    pub method_missing: MethodMissingReason,

    hits: AtomicU64,
    jit_requested: AtomicBool,
}

impl MonoInlineCache {
    pub fn new(receiver_data: ClassData, dispatch: &Dispatch) -> MonoInlineCache {
        MonoInlineCache {
            receiver_data,
            stored_module: dispatch.module,
            method: dispatch.method.clone(),
            method_missing: dispatch.method_missing,
            hits: AtomicU64::new(0),
            jit_requested: AtomicBool::new(false),
        }
    }

    /// Record a hit, returning the new count.
    #[inline(always)]
    pub fn record_hit(&self) -> u64 {
        self.hits.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Report held heap references. Classes and modules are registry ids and
    /// the method is `Arc`-owned, so there is nothing to trace today; the
    /// hook is the collector's seam regardless.
    pub fn mark(&self, _tracer: &mut dyn FnMut(Value)) {}
}

/// Lookup mode for a send through `site` from `frame`.
fn lookup_mode(state: &State, site: &CallSite, frame: &CallFrame) -> LookupMode {
    LookupMode {
        allow_private: site.is_private() || frame.is.allow_private(),
        is_super: site.is_super(),
        is_vcall: site.is_vcall(),
        self_class: state.runtime.class_of(frame.self_value),
    }
}

/// Executor of a fresh site: full lookup, then install.
pub fn empty_cache_execute(
    state: &mut State,
    site: &Arc<CallSite>,
    frame: &mut CallFrame,
    args: &mut Arguments,
) -> VmResult<Value> {
    update_call_site(state, site, frame, args)
}

/// The update function: full method lookup, then reshape the site in place.
fn update_call_site(
    state: &mut State,
    site: &Arc<CallSite>,
    frame: &mut CallFrame,
    args: &mut Arguments,
) -> VmResult<Value> {
    state.stats.record_full_lookup();
    let klass = state.runtime.class_of(args.recv);
    let mode = lookup_mode(state, site, frame);
    let dispatch = state.runtime.classes.lookup_method(klass, site.name, mode);
    mono_cache_updater(state, site, frame, args, klass, dispatch)
}

/// Install the lookup result and complete the send.
///
/// An empty site gets a monomorphic cache (hit count 1 — the installing send
/// counts). A site already carrying one has seen a second receiver shape and
/// collapses to megamorphic; polymorphic promotion is out of the dispatch
/// core's scope.
pub fn mono_cache_updater(
    state: &mut State,
    site: &Arc<CallSite>,
    frame: &mut CallFrame,
    args: &mut Arguments,
    klass: ClassId,
    dispatch: Dispatch,
) -> VmResult<Value> {
    match site.cache() {
        CacheState::Empty => {
            let receiver_data = state.runtime.classes.class_data(klass);
            let cache = Arc::new(MonoInlineCache::new(receiver_data, &dispatch));
            cache.record_hit();
            let execute = if dispatch.found() {
                check_cache
            } else {
                check_cache_mm
            };
            site.rewrite(execute, CacheState::Mono(cache));
        }
        CacheState::Mono(_) => {
            site.rewrite(megamorphic_execute, CacheState::Mega);
        }
        CacheState::Mega => {}
    }

    finish_dispatch(state, args, &dispatch)
}

/// The monomorphic hot path.
pub fn check_cache(
    state: &mut State,
    site: &Arc<CallSite>,
    frame: &mut CallFrame,
    args: &mut Arguments,
) -> VmResult<Value> {
    let cache = match site.cache() {
        CacheState::Mono(cache) => cache,
        CacheState::Empty => return empty_cache_execute(state, site, frame, args),
        CacheState::Mega => return megamorphic_execute(state, site, frame, args),
    };

    let receiver_data = state.runtime.class_data_of(args.recv);
    if receiver_data.raw() == cache.receiver_data.raw() {
        if let Some(method) = cache.method.clone() {
            state.stats.record_cache_hit();
            let hits = cache.record_hit();
            if hits >= state.jit.compile_threshold() {
                maybe_compile(state, &cache, hits);
            }
            return dispatch::invoke(state, &method, args);
        }
    }

    state.stats.record_cache_miss();
    update_call_site(state, site, frame, args)
}

/// The memoized method-missing path.
pub fn check_cache_mm(
    state: &mut State,
    site: &Arc<CallSite>,
    frame: &mut CallFrame,
    args: &mut Arguments,
) -> VmResult<Value> {
    let cache = match site.cache() {
        CacheState::Mono(cache) => cache,
        CacheState::Empty => return empty_cache_execute(state, site, frame, args),
        CacheState::Mega => return megamorphic_execute(state, site, frame, args),
    };

    let receiver_data = state.runtime.class_data_of(args.recv);
    if receiver_data.raw() == cache.receiver_data.raw() {
        state.stats.record_cache_hit();
        cache.record_hit();
        return dispatch::method_missing(state, args, cache.method_missing);
    }

    state.stats.record_cache_miss();
    update_call_site(state, site, frame, args)
}

/// Executor of a site that has seen too many receiver shapes.
pub fn megamorphic_execute(
    state: &mut State,
    site: &Arc<CallSite>,
    frame: &mut CallFrame,
    args: &mut Arguments,
) -> VmResult<Value> {
    state.stats.record_full_lookup();
    let klass = state.runtime.class_of(args.recv);
    let mode = lookup_mode(state, site, frame);
    let dispatch = state.runtime.classes.lookup_method(klass, site.name, mode);
    finish_dispatch(state, args, &dispatch)
}

fn finish_dispatch(
    state: &mut State,
    args: &mut Arguments,
    dispatch: &Dispatch,
) -> VmResult<Value> {
    match (&dispatch.method, dispatch.method_missing) {
        (Some(method), MethodMissingReason::None) => {
            let method = method.clone();
            dispatch::invoke(state, &method, args)
        }
        (_, reason) => dispatch::method_missing(state, args, reason),
    }
}

/// Promote a hot method to the JIT queue. At most one request per cache.
fn maybe_compile(state: &mut State, cache: &Arc<MonoInlineCache>, hits: u64) {
    if cache
        .jit_requested
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }
    let Some(method) = &cache.method else { return };
    let Some(code) = method.compiled() else { return };
    state.jit.compile_soon(
        code.clone(),
        Some(cache.receiver_data.class_id()),
        Value::nil(),
        code.is_block(),
        hits,
    );
}
