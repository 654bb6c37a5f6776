//! Call arguments and method-resolution records.

use crate::class::ClassId;
use crate::executable::Executable;
use garnet_core::{Symbol, Value};
use smallvec::SmallVec;
use std::sync::Arc;

/// Why a lookup failed to produce a callable method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MethodMissingReason {
    /// Lookup succeeded; nothing is missing.
    None = 0,
    /// Method exists but is private and the send was not privileged.
    Private = 1,
    /// Method exists but is protected and the caller is not kindred.
    Protected = 2,
    /// A variable-or-call send found nothing.
    Vcall = 3,
    /// A super send found nothing above the receiver.
    Super = 4,
    /// Plain miss.
    Normal = 5,
}

impl MethodMissingReason {
    /// Symbolic form, used when handing the reason to `method_missing`.
    pub fn as_symbol(self) -> Symbol {
        Symbol::intern(match self {
            MethodMissingReason::None => "none",
            MethodMissingReason::Private => "private",
            MethodMissingReason::Protected => "protected",
            MethodMissingReason::Vcall => "vcall",
            MethodMissingReason::Super => "super",
            MethodMissingReason::Normal => "normal",
        })
    }
}

/// Result of a full method lookup.
#[derive(Clone)]
pub struct Dispatch {
    /// Module whose method table produced the result (the receiver's class
    /// on a miss).
    pub module: ClassId,
    /// The resolved executable; `None` when `method_missing` is set.
    pub method: Option<Arc<Executable>>,
    pub method_missing: MethodMissingReason,
}

impl Dispatch {
    #[inline]
    pub fn found(&self) -> bool {
        self.method_missing == MethodMissingReason::None
    }
}

/// Arguments to one send: receiver, positional arguments, optional block.
#[derive(Debug, Clone)]
pub struct Arguments {
    /// The name being sent, for `method_missing` forwarding.
    pub name: Symbol,
    pub recv: Value,
    pub block: Value,
    pub args: SmallVec<[Value; 4]>,
}

impl Arguments {
    pub fn new(name: Symbol, recv: Value) -> Arguments {
        Arguments {
            name,
            recv,
            block: Value::nil(),
            args: SmallVec::new(),
        }
    }

    pub fn with_args(name: Symbol, recv: Value, args: impl IntoIterator<Item = Value>) -> Arguments {
        Arguments {
            name,
            recv,
            block: Value::nil(),
            args: args.into_iter().collect(),
        }
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Prepend the send name, producing `method_missing`-shaped arguments.
    pub fn for_method_missing(&self) -> Arguments {
        let mut args = SmallVec::with_capacity(self.args.len() + 1);
        args.push(Value::symbol(self.name));
        args.extend(self.args.iter().copied());
        Arguments {
            name: Symbol::intern("method_missing"),
            recv: self.recv,
            block: self.block,
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_missing_forwarding() {
        let name = Symbol::intern("frobnicate");
        let args = Arguments::with_args(name, Value::fixnum(1), [Value::fixnum(2)]);
        let forwarded = args.for_method_missing();

        assert_eq!(&*forwarded.name.as_str(), "method_missing");
        assert_eq!(forwarded.args.len(), 2);
        assert_eq!(forwarded.args[0], Value::symbol(name));
        assert_eq!(forwarded.args[1], Value::fixnum(2));
        assert_eq!(forwarded.recv, Value::fixnum(1));
    }

    #[test]
    fn test_reason_symbols() {
        assert_eq!(
            &*MethodMissingReason::Private.as_symbol().as_str(),
            "private"
        );
        assert_eq!(&*MethodMissingReason::Normal.as_symbol().as_str(), "normal");
    }
}
