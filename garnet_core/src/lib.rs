//! Core types shared by every Garnet crate.
//!
//! This crate defines the tagged [`Value`] word that flows through literal
//! pools, operand stacks, and prepared instruction streams; the process-wide
//! [`Symbol`] interner; the error family surfaced by preparation and
//! dispatch; and the read-only VM configuration.
//!
//! Nothing here allocates on the managed heap — heap objects live in
//! `garnet_runtime`, and a `Value` only ever *refers* to them by handle.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod error;
pub mod symbol;
pub mod value;

pub use config::VmConfig;
pub use error::{PrepareError, VmError, VmResult};
pub use symbol::Symbol;
pub use value::Value;
