//! Compiled-code representation for the Garnet VM.
//!
//! This crate owns the symbolic side of execution: the stable opcode table,
//! the immutable [`bytecode::CompiledCode`] object produced by loaders, and
//! the [`bytecode::BytecodeBuilder`] used to assemble code in tests and
//! bootstrap paths. The VM crate consumes compiled code and rewrites it into
//! dispatch-ready machine code; nothing here depends on the VM.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod bytecode;

pub use bytecode::{BytecodeBuilder, CompiledCode, Opcode};
