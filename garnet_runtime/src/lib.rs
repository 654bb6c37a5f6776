//! Runtime object model for the Garnet VM.
//!
//! The dispatch core treats the object model as an external collaborator: it
//! needs classes with method tables and generations, a heap to hold literals
//! and exceptions, primitive invokers, and exception constructors. This crate
//! provides that surface and nothing more — no garbage collector (only the
//! mark-visitor seams) and no instruction semantics.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod call;
pub mod class;
pub mod exception;
pub mod executable;
pub mod heap;
pub mod primitives;

pub use call::{Arguments, Dispatch, MethodMissingReason};
pub use class::{ClassData, ClassId, ClassRegistry, LookupMode, Visibility, WellKnown};
pub use exception::{ExceptionBody, Location};
pub use executable::{BlockEnvironment, Executable, InvokePrimitive};
pub use heap::{Heap, HeapObject, NativeObject, ObjectKind};
pub use primitives::PrimitiveRegistry;

use garnet_core::{Symbol, Value, VmConfig};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// The mutable runtime a mutator thread owns: heap, classes, primitives,
/// configuration, top-level constants, and the raised-exception slot.
pub struct Runtime {
    pub heap: Heap,
    pub classes: ClassRegistry,
    pub primitives: PrimitiveRegistry,
    pub config: VmConfig,

    /// Top-level constant scope.
    toplevel_constants: FxHashMap<Symbol, Value>,

    /// Global constant-lookup generation. Bumped on any constant mutation;
    /// constant caches stamp it and lazily invalidate.
    constant_serial: AtomicU64,

    /// The exception currently raised on this runtime, if any.
    raised_exception: Option<Value>,
}

impl Runtime {
    /// A runtime with the bootstrap class hierarchy and default config.
    pub fn bootstrap() -> Runtime {
        Runtime::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Runtime {
        Runtime {
            heap: Heap::new(),
            classes: ClassRegistry::bootstrap(),
            primitives: PrimitiveRegistry::new(),
            config,
            toplevel_constants: FxHashMap::default(),
            constant_serial: AtomicU64::new(1),
            raised_exception: None,
        }
    }

    // =========================================================================
    // Value classification
    // =========================================================================

    /// The class of any value.
    pub fn class_of(&self, value: Value) -> ClassId {
        let known = self.classes.well_known();
        if value.is_fixnum() {
            known.integer
        } else if value.is_symbol() {
            known.symbol
        } else if value.is_nil() {
            known.nil_class
        } else if value.is_true() {
            known.true_class
        } else if value.is_false() {
            known.false_class
        } else if let Some(class) = self.heap.class_of(value) {
            class
        } else {
            known.object
        }
    }

    /// The single-word receiver descriptor for a value's class right now.
    #[inline]
    pub fn class_data_of(&self, value: Value) -> ClassData {
        self.classes.class_data(self.class_of(value))
    }

    // =========================================================================
    // Constants
    // =========================================================================

    /// Current constant-lookup generation.
    #[inline]
    pub fn constant_serial(&self) -> u64 {
        self.constant_serial.load(Ordering::Acquire)
    }

    /// Invalidate every constant cache in the process.
    pub fn bump_constant_serial(&self) {
        self.constant_serial.fetch_add(1, Ordering::Release);
    }

    /// Resolve a constant: lexical class chain first, then top level.
    pub fn resolve_constant(&self, scope: Option<ClassId>, name: Symbol) -> Option<Value> {
        if let Some(scope) = scope {
            if let Some(value) = self.classes.constant_get(scope, name) {
                return Some(value);
            }
        }
        self.toplevel_constants.get(&name).copied()
    }

    /// Bind a top-level constant. Any mutation bumps the generation.
    pub fn set_constant(&mut self, name: Symbol, value: Value) {
        self.toplevel_constants.insert(name, value);
        self.bump_constant_serial();
    }

    /// Bind a constant under a class. Any mutation bumps the generation.
    pub fn set_constant_at(&mut self, scope: ClassId, name: Symbol, value: Value) {
        self.classes.constant_set(scope, name, value);
        self.bump_constant_serial();
    }

    // =========================================================================
    // Raised exceptions
    // =========================================================================

    pub fn raise_exception(&mut self, exception: Value) {
        self.raised_exception = Some(exception);
    }

    #[inline]
    pub fn has_raised_exception(&self) -> bool {
        self.raised_exception.is_some()
    }

    #[inline]
    pub fn raised_exception(&self) -> Option<Value> {
        self.raised_exception
    }

    pub fn clear_raised_exception(&mut self) -> Option<Value> {
        self.raised_exception.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_of_immediates() {
        let runtime = Runtime::bootstrap();
        let known = runtime.classes.well_known();
        assert_eq!(runtime.class_of(Value::fixnum(1)), known.integer);
        assert_eq!(runtime.class_of(Value::nil()), known.nil_class);
        assert_eq!(runtime.class_of(Value::truthy()), known.true_class);
        assert_eq!(runtime.class_of(Value::falsy()), known.false_class);
        assert_eq!(
            runtime.class_of(Value::symbol(Symbol::intern("sym"))),
            known.symbol
        );
    }

    #[test]
    fn test_class_of_heap_object() {
        let mut runtime = Runtime::bootstrap();
        let string_class = runtime.classes.well_known().string;
        let value = runtime.heap.alloc_string(string_class, "hi");
        assert_eq!(runtime.class_of(value), string_class);
    }

    #[test]
    fn test_constant_mutation_bumps_serial() {
        let mut runtime = Runtime::bootstrap();
        let name = Symbol::intern("MAX");
        let before = runtime.constant_serial();
        runtime.set_constant(name, Value::fixnum(9));
        assert!(runtime.constant_serial() > before);
        assert_eq!(runtime.resolve_constant(None, name), Some(Value::fixnum(9)));
    }

    #[test]
    fn test_scoped_constant_resolution() {
        let mut runtime = Runtime::bootstrap();
        let scope = runtime.classes.well_known().integer;
        let name = Symbol::intern("BITS");
        runtime.set_constant_at(scope, name, Value::fixnum(64));

        assert_eq!(
            runtime.resolve_constant(Some(scope), name),
            Some(Value::fixnum(64))
        );
        assert_eq!(runtime.resolve_constant(None, name), None);
    }

    #[test]
    fn test_raised_exception_slot() {
        let mut runtime = Runtime::bootstrap();
        assert!(!runtime.has_raised_exception());

        let exc = exception::make_interpreter_error(&mut runtime, "boom");
        runtime.raise_exception(exc);
        assert!(runtime.has_raised_exception());
        assert_eq!(runtime.raised_exception(), Some(exc));

        assert_eq!(runtime.clear_raised_exception(), Some(exc));
        assert!(!runtime.has_raised_exception());
    }
}
