//! Per-site constant caches.
//!
//! `push_const` and `find_const` sites each own one of these. A populated
//! entry is valid while its stamp matches the process-wide constant-lookup
//! generation; any constant mutation anywhere bumps the generation and every
//! cache lazily invalidates.

use crate::state::State;
use garnet_core::{Symbol, Value, VmError, VmResult};
use garnet_runtime::exception::make_name_error;
use garnet_runtime::{ClassId, NativeObject};
use parking_lot::RwLock;
use std::any::Any;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct ConstantEntry {
    value: Value,
    /// Constant-lookup generation at population time.
    serial: u64,
}

/// A constant-lookup site bound to `(name, compiled-code serial, ip)`.
pub struct ConstantCache {
    pub name: Symbol,

    /// Serial of the compiled code this cache was installed into.
    pub code_serial: u64,

    /// Ip of the installing instruction.
    pub ip: u32,

    entry: RwLock<Option<ConstantEntry>>,
}

impl ConstantCache {
    pub fn empty(name: Symbol, code_serial: u64, ip: u32) -> Arc<ConstantCache> {
        Arc::new(ConstantCache {
            name,
            code_serial,
            ip,
            entry: RwLock::new(None),
        })
    }

    #[inline]
    pub fn is_populated(&self) -> bool {
        self.entry.read().is_some()
    }

    /// The cached value, ignoring validity. For reflection and tests.
    pub fn cached_value(&self) -> Option<Value> {
        (*self.entry.read()).map(|entry| entry.value)
    }

    /// Resolve through the cache: a stamped hit returns without
    /// recomputation; otherwise the resolver runs against `scope` and the
    /// entry is restamped with the current generation.
    pub fn retrieve(&self, state: &mut State, scope: Option<ClassId>) -> VmResult<Value> {
        let serial = state.runtime.constant_serial();
        if let Some(entry) = *self.entry.read() {
            if entry.serial == serial {
                state.stats.record_constant_hit();
                return Ok(entry.value);
            }
        }

        state.stats.record_constant_miss();
        match state.runtime.resolve_constant(scope, self.name) {
            Some(value) => {
                *self.entry.write() = Some(ConstantEntry { value, serial });
                Ok(value)
            }
            None => {
                let exception = make_name_error(&mut state.runtime, self.name);
                Err(VmError::raised(exception))
            }
        }
    }
}

impl NativeObject for ConstantCache {
    fn type_name(&self) -> &'static str {
        "ConstantCache"
    }

    fn mark(&self, tracer: &mut dyn FnMut(Value)) {
        if let Some(entry) = *self.entry.read() {
            tracer(entry.value);
        }
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl std::fmt::Debug for ConstantCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstantCache")
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("populated", &self.is_populated())
            .finish()
    }
}
