//! The managed object table.
//!
//! Heap objects are addressed by the handle packed into a [`Value`]; handle
//! equality is reference equality. Collection itself is an external
//! collaborator — the VM core only *registers* references for marking, so
//! the table here never reclaims and exposes a mark-visitor seam instead.
//!
//! Objects the dispatch core installs into prepared streams (call sites,
//! constant caches, unwind sites) are foreign to this crate; they enter the
//! heap through the [`NativeObject`] trait and come back out via `Any`
//! downcasts.

use crate::class::ClassId;
use garnet_core::Value;
use garnet_compiler::CompiledCode;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::Arc;

/// A heap-resident object foreign to the runtime crate.
pub trait NativeObject: Any + Send + Sync {
    /// Reflection name, used in diagnostics.
    fn type_name(&self) -> &'static str;

    /// Report internally held heap references to the collector.
    fn mark(&self, _tracer: &mut dyn FnMut(Value)) {}

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Payload of a heap object.
pub enum ObjectKind {
    Str(String),
    Array(Vec<Value>),
    Code(Arc<CompiledCode>),
    Instance { ivars: FxHashMap<garnet_core::Symbol, Value> },
    Exception(crate::exception::ExceptionBody),
    BlockEnv(crate::executable::BlockEnvironment),
    Native(Arc<dyn NativeObject>),
}

impl std::fmt::Debug for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Str(s) => write!(f, "Str({s:?})"),
            ObjectKind::Array(items) => write!(f, "Array(len {})", items.len()),
            ObjectKind::Code(code) => write!(f, "Code({})", code.name),
            ObjectKind::Instance { ivars } => write!(f, "Instance({} ivars)", ivars.len()),
            ObjectKind::Exception(body) => write!(f, "Exception({:?})", body.message),
            ObjectKind::BlockEnv(_) => write!(f, "BlockEnv"),
            ObjectKind::Native(native) => write!(f, "Native({})", native.type_name()),
        }
    }
}

/// One entry in the object table.
#[derive(Debug)]
pub struct HeapObject {
    pub class: ClassId,
    pub kind: ObjectKind,
}

/// The object table.
#[derive(Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, class: ClassId, kind: ObjectKind) -> Value {
        let index = self.objects.len();
        self.objects.push(HeapObject { class, kind });
        Value::reference(index)
    }

    pub fn alloc_string(&mut self, class: ClassId, text: impl Into<String>) -> Value {
        self.alloc(class, ObjectKind::Str(text.into()))
    }

    pub fn alloc_array(&mut self, class: ClassId, items: Vec<Value>) -> Value {
        self.alloc(class, ObjectKind::Array(items))
    }

    pub fn alloc_code(&mut self, class: ClassId, code: Arc<CompiledCode>) -> Value {
        self.alloc(class, ObjectKind::Code(code))
    }

    pub fn alloc_instance(&mut self, class: ClassId) -> Value {
        self.alloc(
            class,
            ObjectKind::Instance {
                ivars: FxHashMap::default(),
            },
        )
    }

    pub fn alloc_exception(&mut self, class: ClassId, body: crate::exception::ExceptionBody) -> Value {
        self.alloc(class, ObjectKind::Exception(body))
    }

    pub fn alloc_block_env(
        &mut self,
        class: ClassId,
        env: crate::executable::BlockEnvironment,
    ) -> Value {
        self.alloc(class, ObjectKind::BlockEnv(env))
    }

    pub fn alloc_native(&mut self, class: ClassId, native: Arc<dyn NativeObject>) -> Value {
        self.alloc(class, ObjectKind::Native(native))
    }

    // =========================================================================
    // Access
    // =========================================================================

    #[inline]
    pub fn get(&self, value: Value) -> Option<&HeapObject> {
        self.objects.get(value.as_reference()?)
    }

    #[inline]
    pub fn get_mut(&mut self, value: Value) -> Option<&mut HeapObject> {
        let index = value.as_reference()?;
        self.objects.get_mut(index)
    }

    /// Class of a heap value, if it is one.
    #[inline]
    pub fn class_of(&self, value: Value) -> Option<ClassId> {
        self.get(value).map(|object| object.class)
    }

    pub fn string_at(&self, value: Value) -> Option<&str> {
        match &self.get(value)?.kind {
            ObjectKind::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn array_at(&self, value: Value) -> Option<&[Value]> {
        match &self.get(value)?.kind {
            ObjectKind::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn code_at(&self, value: Value) -> Option<Arc<CompiledCode>> {
        match &self.get(value)?.kind {
            ObjectKind::Code(code) => Some(code.clone()),
            _ => None,
        }
    }

    pub fn native_at(&self, value: Value) -> Option<Arc<dyn NativeObject>> {
        match &self.get(value)?.kind {
            ObjectKind::Native(native) => Some(native.clone()),
            _ => None,
        }
    }

    /// Downcast a native heap object to its concrete type.
    pub fn native_as<T: NativeObject>(&self, value: Value) -> Option<Arc<T>> {
        self.native_at(value)?.as_any().downcast::<T>().ok()
    }

    pub fn ivar_get(&self, value: Value, name: garnet_core::Symbol) -> Option<Value> {
        match &self.get(value)?.kind {
            ObjectKind::Instance { ivars } => ivars.get(&name).copied(),
            _ => None,
        }
    }

    pub fn ivar_set(&mut self, value: Value, name: garnet_core::Symbol, ivar: Value) -> bool {
        match self.get_mut(value).map(|object| &mut object.kind) {
            Some(ObjectKind::Instance { ivars }) => {
                ivars.insert(name, ivar);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Visit the references held by one object (the collector's trace step).
    pub fn mark_object(&self, value: Value, tracer: &mut dyn FnMut(Value)) {
        let Some(object) = self.get(value) else { return };
        match &object.kind {
            ObjectKind::Array(items) => {
                for item in items {
                    tracer(*item);
                }
            }
            ObjectKind::Instance { ivars } => {
                for ivar in ivars.values() {
                    tracer(*ivar);
                }
            }
            ObjectKind::Exception(body) => body.mark(tracer),
            ObjectKind::BlockEnv(env) => env.mark(tracer),
            ObjectKind::Native(native) => native.mark(tracer),
            ObjectKind::Str(_) | ObjectKind::Code(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_round_trip() {
        let mut heap = Heap::new();
        let class = ClassId::from_index(3);
        let value = heap.alloc_string(class, "hello");
        assert!(value.is_reference());
        assert_eq!(heap.string_at(value), Some("hello"));
        assert_eq!(heap.class_of(value), Some(class));
    }

    #[test]
    fn test_handle_identity() {
        let mut heap = Heap::new();
        let class = ClassId::from_index(0);
        let a = heap.alloc_string(class, "x");
        let b = heap.alloc_string(class, "x");
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn test_ivars() {
        let mut heap = Heap::new();
        let class = ClassId::from_index(0);
        let object = heap.alloc_instance(class);
        let name = garnet_core::Symbol::intern("@size");

        assert_eq!(heap.ivar_get(object, name), None);
        assert!(heap.ivar_set(object, name, Value::fixnum(4)));
        assert_eq!(heap.ivar_get(object, name), Some(Value::fixnum(4)));
    }

    #[test]
    fn test_mark_array_visits_items() {
        let mut heap = Heap::new();
        let class = ClassId::from_index(0);
        let inner = heap.alloc_string(class, "inner");
        let array = heap.alloc_array(class, vec![inner, Value::fixnum(1)]);

        let mut seen = Vec::new();
        heap.mark_object(array, &mut |v| seen.push(v));
        assert_eq!(seen, vec![inner, Value::fixnum(1)]);
    }
}
