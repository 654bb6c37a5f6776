//! The Garnet VM core: bytecode preparation and dispatch.
//!
//! A freshly loaded compiled code is a symbolic instruction stream over a
//! literals pool. This crate turns it into something directly dispatchable
//! and runs it:
//!
//! - **Preparer** ([`prepare`]): two passes that install handler tokens,
//!   bias register operands into the frame's contiguous index space, resolve
//!   literals into owned references, and intern call sites, constant caches,
//!   and unwind sites — with every reference-bearing word recorded for the
//!   collector.
//! - **Dispatcher** ([`interpreter`]): executes the prepared stream inside a
//!   call frame with precise exception translation at one boundary.
//! - **Call sites and inline caches** ([`call_site`], [`inline_cache`]):
//!   monomorphic caches keyed on a single-word receiver descriptor, updated
//!   in place under contention, promoting hot methods to the JIT queue.
//! - **Constant caches** ([`constant_cache`]): generation-stamped constant
//!   memoization.
//! - **JIT request queue** ([`jit`]): FIFO compile-request bookkeeping with
//!   coalescing, synchronous waiters, and the method-update bracket.
//!
//! ```text
//! CompiledCode ──prepare──▶ MachineCode ──execute──▶ Value
//!                              │  ▲
//!              call sites ◀────┘  └──── reference slots (GC)
//!              constant caches
//!              unwind sites
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

pub mod builtins;
pub mod call_site;
pub mod constant_cache;
pub mod dispatch;
pub mod frame;
pub mod gc;
pub mod inline_cache;
pub mod interpreter;
pub mod jit;
pub mod machine_code;
pub mod ops;
pub mod prepare;
pub mod state;
pub mod stats;
pub mod unwind;

pub use call_site::{CacheState, CallSite, CallSiteFlags};
pub use constant_cache::ConstantCache;
pub use frame::{CallFrame, InterpreterState, VariableScope};
pub use gc::{CollectingTracer, Tracer};
pub use inline_cache::MonoInlineCache;
pub use interpreter::execute;
pub use jit::{CompileRequest, Jit, Waiter};
pub use machine_code::MachineCode;
pub use prepare::prepare;
pub use state::State;
pub use stats::{Measurement, VmStats};
pub use unwind::{UnwindSite, UnwindType};
