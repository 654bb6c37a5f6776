//! The per-mutator VM state.
//!
//! One `State` per mutator thread: it owns the runtime (heap, classes,
//! primitives, configuration), holds the process JIT handle, memoizes
//! prepared machine code by compiled-code serial, and carries the dispatch
//! bookkeeping the instruction handlers read — call-stack snapshot entries,
//! the current rescue exception, the last method-missing reason.

use crate::frame::CallFrame;
use crate::interpreter;
use crate::jit::Jit;
use crate::machine_code::MachineCode;
use crate::prepare;
use crate::stats::VmStats;
use garnet_compiler::CompiledCode;
use garnet_core::{PrepareError, Symbol, Value, VmConfig, VmError, VmResult};
use garnet_runtime::{Location, MethodMissingReason, Runtime};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Nesting bound for compiled-method invocation.
pub const MAX_CALL_DEPTH: usize = 1_000;

pub struct State {
    pub runtime: Runtime,
    pub jit: Arc<Jit>,
    pub stats: VmStats,

    /// Prepared machine code, memoized by compiled-code serial.
    machine_codes: RwLock<FxHashMap<u64, Arc<MachineCode>>>,

    /// `(method, file)` entries for location snapshots, innermost last.
    call_stack: Vec<(Symbol, Symbol)>,

    /// Exception visible to a running rescue handler.
    current_exception: Value,

    /// Reason recorded by the most recent method-missing dispatch.
    method_missing_reason: MethodMissingReason,

    depth: usize,
    safepoint_clock: AtomicU64,

    /// `m_log` output, for diagnostics and tests.
    pub diagnostics_log: Vec<String>,
}

impl State {
    pub fn new() -> State {
        State::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> State {
        let jit = Jit::new(config.jit_threshold);
        let mut state = State {
            runtime: Runtime::with_config(config),
            jit,
            stats: VmStats::new(),
            machine_codes: RwLock::new(FxHashMap::default()),
            call_stack: Vec::new(),
            current_exception: Value::nil(),
            method_missing_reason: MethodMissingReason::None,
            depth: 0,
            safepoint_clock: AtomicU64::new(0),
            diagnostics_log: Vec::new(),
        };
        crate::builtins::install(&mut state);
        state
    }

    // =========================================================================
    // Preparation
    // =========================================================================

    /// Prepare a compiled code, memoized: repeated calls return the same
    /// machine code.
    pub fn prepare(&mut self, code: &Arc<CompiledCode>) -> Result<Arc<MachineCode>, PrepareError> {
        if let Some(machine_code) = self.machine_codes.read().get(&code.serial) {
            return Ok(machine_code.clone());
        }
        let machine_code = prepare::prepare(self, code)?;
        self.stats.record_prepared();
        self.machine_codes
            .write()
            .insert(code.serial, machine_code.clone());
        Ok(machine_code)
    }

    /// Prepare and execute a compiled code against `self_value`. Returns the
    /// sentinel on failure with the exception raised on this state.
    pub fn run_code(
        &mut self,
        code: &Arc<CompiledCode>,
        self_value: Value,
    ) -> Result<Value, PrepareError> {
        let machine_code = self.prepare(code)?;
        let module = self.runtime.class_of(self_value);
        let mut frame = CallFrame::new(&machine_code, self_value, module);
        Ok(interpreter::execute(self, &machine_code, &mut frame))
    }

    // =========================================================================
    // Call-stack bookkeeping
    // =========================================================================

    pub(crate) fn enter_call(&mut self, method: Symbol, file: Symbol) -> VmResult<()> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(VmError::internal("call depth limit exceeded"));
        }
        self.depth += 1;
        self.call_stack.push((method, file));
        Ok(())
    }

    pub(crate) fn leave_call(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.call_stack.pop();
    }

    /// Snapshot the call stack with `frame` as the innermost entry.
    pub fn location_snapshot(&self, frame: &CallFrame) -> Vec<Location> {
        let mut locations = Vec::with_capacity(self.call_stack.len() + 1);
        locations.push(frame.location());
        for &(method, file) in self.call_stack.iter().rev() {
            locations.push(Location::new(method, file, 0));
        }
        locations
    }

    // =========================================================================
    // Exceptions
    // =========================================================================

    pub fn set_current_exception(&mut self, exception: Value) {
        self.current_exception = exception;
    }

    /// The exception a rescue handler is currently handling.
    pub fn current_exception(&self) -> Value {
        self.current_exception
    }

    pub fn set_method_missing_reason(&mut self, reason: MethodMissingReason) {
        self.method_missing_reason = reason;
    }

    pub fn method_missing_reason(&self) -> MethodMissingReason {
        self.method_missing_reason
    }

    // =========================================================================
    // Safepoints
    // =========================================================================

    /// Allocation-polling safepoint: taken at method entry and back-branches.
    #[inline]
    pub fn safepoint_poll(&self) {
        let clock = self.safepoint_clock.fetch_add(1, Ordering::Relaxed) + 1;
        if clock % self.runtime.config.safepoint_interval == 0 {
            self.stats.record_safepoint();
        }
    }

    pub(crate) fn log(&mut self, line: String) {
        self.diagnostics_log.push(line);
    }
}

impl Default for State {
    fn default() -> Self {
        State::new()
    }
}
