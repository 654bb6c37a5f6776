//! The primitive-invoker registry.
//!
//! `invoke_primitive` sites resolve their symbol to a native function pointer
//! exactly once, during preparation; the prepared stream stores the invoker's
//! registry index and dispatch never looks the name up again. Unknown names
//! resolve to a stub that fails at call time, so a stale primitive name is an
//! execution error, not a load error.

use crate::call::Arguments;
use crate::Runtime;
use crate::executable::InvokePrimitive;
use dashmap::DashMap;
use garnet_core::{Symbol, Value, VmError, VmResult};
use parking_lot::RwLock;

fn unknown_primitive(_runtime: &mut Runtime, args: &Arguments) -> VmResult<Value> {
    Err(VmError::internal(format!(
        "unknown primitive '{}'",
        args.name
    )))
}

/// Concurrent name → invoker table with dense invoker indexing for prepared
/// streams.
pub struct PrimitiveRegistry {
    by_name: DashMap<Symbol, usize, rustc_hash::FxBuildHasher>,
    invokers: RwLock<Vec<InvokePrimitive>>,
}

impl Default for PrimitiveRegistry {
    fn default() -> Self {
        let registry = PrimitiveRegistry {
            by_name: DashMap::default(),
            invokers: RwLock::new(Vec::new()),
        };
        // Index 0 is the unknown-primitive stub.
        registry.invokers.write().push(unknown_primitive);
        registry
    }
}

impl PrimitiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an invoker under `name`, returning its dense index.
    pub fn register(&self, name: Symbol, func: InvokePrimitive) -> usize {
        let mut invokers = self.invokers.write();
        let index = invokers.len();
        invokers.push(func);
        self.by_name.insert(name, index);
        index
    }

    /// Resolve a name to an invoker index. Unknown names get the stub at
    /// index 0.
    pub fn get_invoke_stub(&self, name: Symbol) -> usize {
        self.by_name.get(&name).map(|entry| *entry).unwrap_or(0)
    }

    /// The invoker at a prepared index.
    #[inline]
    pub fn invoker(&self, index: usize) -> InvokePrimitive {
        let invokers = self.invokers.read();
        invokers.get(index).copied().unwrap_or(unknown_primitive)
    }

    pub fn len(&self) -> usize {
        self.invokers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(_runtime: &mut Runtime, _args: &Arguments) -> VmResult<Value> {
        Ok(Value::fixnum(42))
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = PrimitiveRegistry::new();
        let name = Symbol::intern("prim_answer");
        let index = registry.register(name, answer);
        assert_eq!(registry.get_invoke_stub(name), index);
        assert_ne!(index, 0);
    }

    #[test]
    fn test_unknown_name_gets_stub() {
        let registry = PrimitiveRegistry::new();
        let index = registry.get_invoke_stub(Symbol::intern("prim_nope"));
        assert_eq!(index, 0);

        let mut runtime = Runtime::bootstrap();
        let args = Arguments::new(Symbol::intern("prim_nope"), Value::nil());
        let err = registry.invoker(index)(&mut runtime, &args).unwrap_err();
        assert!(err.to_string().contains("unknown primitive"));
    }
}
