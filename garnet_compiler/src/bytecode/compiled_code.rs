//! The immutable, symbolic form of a method body.

use bitflags::bitflags;
use garnet_core::{Symbol, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing serial source. Every compiled code gets a fresh
/// serial identifying this version of the method body; inline caches snapshot
/// it at install time.
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

bitflags! {
    /// Properties of a compiled code object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CodeFlags: u32 {
        /// This body is a block, not a method.
        const IS_BLOCK = 1 << 0;
        /// Body was assembled by the bootstrap loader.
        const BOOTSTRAP = 1 << 1;
    }
}

/// A parsed method body: an integer-encoded instruction stream plus its
/// literals pool. Immutable after load; the preparer rewrites a *copy* of the
/// stream into machine code and never touches this object.
#[derive(Debug)]
pub struct CompiledCode {
    /// Method name.
    pub name: Symbol,

    /// Source file, for location snapshots.
    pub file: Symbol,

    /// Version serial for this body.
    pub serial: u64,

    /// Opcode words: each instruction is a header word (opcode id) followed
    /// by its operand words.
    pub opcodes: Box<[u64]>,

    /// Literals pool, addressed by index from literal-bearing operands.
    pub literals: Box<[Value]>,

    /// Maximum operand-stack depth. Doubles as the register-index bias in
    /// prepared streams: registers live above the operand stack in one
    /// contiguous index space.
    pub stack_size: usize,

    /// Number of local registers the method declares.
    pub local_count: usize,

    /// Required positional arguments.
    pub required_args: u32,

    /// Total accepted arguments.
    pub total_args: u32,

    pub flags: CodeFlags,
}

impl CompiledCode {
    /// Allocate the next body serial.
    pub fn next_serial() -> u64 {
        NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
    }

    /// Literal at `index`, if in range.
    #[inline]
    pub fn literal(&self, index: usize) -> Option<Value> {
        self.literals.get(index).copied()
    }

    /// Total frame slot count: operand stack plus registers.
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.stack_size + self.local_count
    }

    #[inline]
    pub fn is_block(&self) -> bool {
        self.flags.contains(CodeFlags::IS_BLOCK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serials_increase() {
        let a = CompiledCode::next_serial();
        let b = CompiledCode::next_serial();
        assert!(b > a);
    }

    #[test]
    fn test_frame_size() {
        let code = CompiledCode {
            name: Symbol::intern("frame_size_test"),
            file: Symbol::intern("(test)"),
            serial: CompiledCode::next_serial(),
            opcodes: Box::new([]),
            literals: Box::new([]),
            stack_size: 3,
            local_count: 2,
            required_args: 0,
            total_args: 0,
            flags: CodeFlags::default(),
        };
        assert_eq!(code.frame_size(), 5);
        assert!(!code.is_block());
    }
}
