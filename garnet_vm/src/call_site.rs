//! Call sites: the per-send-location cache objects installed into prepared
//! streams.
//!
//! A site is consulted on every send through its *execute* function pointer;
//! misses go through its *update* path, which rewrites the site in place.
//! The executor and the cache body swap together under one lock, and the
//! cache body itself is immutable once published (its hit counter is an
//! atomic), so a concurrent reader observes either the prior stable state or
//! the fully built new one — never a torn cache.

use crate::frame::CallFrame;
use crate::state::State;
use bitflags::bitflags;
use garnet_core::{Symbol, Value, VmResult};
use garnet_runtime::{Arguments, NativeObject};
use parking_lot::RwLock;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::inline_cache::MonoInlineCache;

/// A cache executor: consulted on every send through this site.
pub type CacheExecuteFn =
    fn(&mut State, &Arc<CallSite>, &mut CallFrame, &mut Arguments) -> VmResult<Value>;

bitflags! {
    /// Send flags fixed at preparation time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CallSiteFlags: u8 {
        /// Privileged send: private methods are callable.
        const PRIVATE = 1 << 0;
        /// Variable-or-call send.
        const VCALL = 1 << 1;
        /// Super send: lookup starts above the receiver's class.
        const SUPER = 1 << 2;
    }
}

/// Cache shape of a site.
#[derive(Clone, Default)]
pub enum CacheState {
    /// Fresh site; first send performs a full lookup.
    #[default]
    Empty,
    /// One `(receiver class, method)` pair memoized.
    Mono(Arc<MonoInlineCache>),
    /// Too many receiver shapes; every send does a full lookup.
    Mega,
}

impl CacheState {
    /// Reflection tag.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheState::Empty => "empty",
            CacheState::Mono(_) => "monomorphic",
            CacheState::Mega => "megamorphic",
        }
    }
}

struct CacheCell {
    execute: CacheExecuteFn,
    cache: CacheState,
}

/// A call site bound to `(method name, compiled-code serial, ip)`.
pub struct CallSite {
    pub name: Symbol,

    /// Serial of the compiled code this site was installed into.
    pub serial: u64,

    /// Ip of the installing instruction.
    pub ip: u32,

    flags: CallSiteFlags,

    cell: RwLock<CacheCell>,

    /// Total sends through this site.
    invokes: AtomicU64,
}

impl CallSite {
    /// A fresh empty site. The initial executor performs the full lookup and
    /// installs the first cache.
    pub fn empty(name: Symbol, serial: u64, ip: u32, flags: CallSiteFlags) -> Arc<CallSite> {
        Arc::new(CallSite {
            name,
            serial,
            ip,
            flags,
            cell: RwLock::new(CacheCell {
                execute: crate::inline_cache::empty_cache_execute,
                cache: CacheState::Empty,
            }),
            invokes: AtomicU64::new(0),
        })
    }

    #[inline(always)]
    pub fn is_private(&self) -> bool {
        self.flags.contains(CallSiteFlags::PRIVATE)
    }

    #[inline(always)]
    pub fn is_vcall(&self) -> bool {
        self.flags.contains(CallSiteFlags::VCALL)
    }

    #[inline(always)]
    pub fn is_super(&self) -> bool {
        self.flags.contains(CallSiteFlags::SUPER)
    }

    #[inline]
    pub fn flags(&self) -> CallSiteFlags {
        self.flags
    }

    /// Current cache shape (a consistent snapshot).
    pub fn cache(&self) -> CacheState {
        self.cell.read().cache.clone()
    }

    /// Reflection tag of the current shape.
    pub fn kind(&self) -> &'static str {
        self.cell.read().cache.kind()
    }

    #[inline]
    pub fn invokes(&self) -> u64 {
        self.invokes.load(Ordering::Relaxed)
    }

    /// Rewrite the site in place: executor and cache publish together.
    pub fn rewrite(&self, execute: CacheExecuteFn, cache: CacheState) {
        let mut cell = self.cell.write();
        cell.cache = cache;
        cell.execute = execute;
    }

    /// Dispatch one send through this site.
    pub fn execute(
        state: &mut State,
        site: &Arc<CallSite>,
        frame: &mut CallFrame,
        args: &mut Arguments,
    ) -> VmResult<Value> {
        site.invokes.fetch_add(1, Ordering::Relaxed);
        let execute = site.cell.read().execute;
        execute(state, site, frame, args)
    }
}

impl NativeObject for CallSite {
    fn type_name(&self) -> &'static str {
        "CallSite"
    }

    fn mark(&self, tracer: &mut dyn FnMut(Value)) {
        // Receiver descriptors and modules are registry ids and the method is
        // owned by Arc; only genuine heap values get reported.
        if let CacheState::Mono(cache) = &self.cell.read().cache {
            cache.mark(tracer);
        }
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl std::fmt::Debug for CallSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSite")
            .field("name", &self.name)
            .field("serial", &self.serial)
            .field("ip", &self.ip)
            .field("flags", &self.flags)
            .field("kind", &self.kind())
            .finish()
    }
}
