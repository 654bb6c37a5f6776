//! Executables: what a method table entry runs when invoked.

use crate::call::Arguments;
use crate::Runtime;
use garnet_core::{Symbol, Value, VmResult};
use garnet_compiler::CompiledCode;
use std::fmt;
use std::sync::Arc;

/// A primitive invoker: the native function behind a primitive method or an
/// `invoke_primitive` site. Resolved once (at preparation or method
/// definition) and called directly afterwards.
pub type InvokePrimitive = fn(&mut Runtime, &Arguments) -> VmResult<Value>;

/// The callable body of a method.
pub enum Executable {
    /// A native primitive.
    Primitive { name: Symbol, func: InvokePrimitive },

    /// A bytecode body; the VM prepares and interprets it.
    Compiled(Arc<CompiledCode>),
}

impl Executable {
    #[inline]
    pub fn compiled(&self) -> Option<&Arc<CompiledCode>> {
        match self {
            Executable::Compiled(code) => Some(code),
            Executable::Primitive { .. } => None,
        }
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Executable::Primitive { name, .. } => write!(f, "Primitive({name})"),
            Executable::Compiled(code) => write!(f, "Compiled({})", code.name),
        }
    }
}

/// A block closed over its creation site: the block body plus the `self` it
/// captured.
#[derive(Debug, Clone)]
pub struct BlockEnvironment {
    pub code: Arc<CompiledCode>,
    pub self_value: Value,
}

impl BlockEnvironment {
    pub fn new(code: Arc<CompiledCode>, self_value: Value) -> BlockEnvironment {
        BlockEnvironment { code, self_value }
    }

    /// Report held heap references to the collector.
    pub fn mark(&self, tracer: &mut dyn FnMut(Value)) {
        tracer(self.self_value);
    }
}
