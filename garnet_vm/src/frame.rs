//! Call frames.
//!
//! A frame owns one contiguous slot array: the operand stack in the low
//! indices (`0..stack_size`) and the method's registers above it. Prepared
//! streams bias register operands by `stack_size`, so a biased operand
//! indexes this array directly.
//!
//! The stack pointer starts one before the base; every push pre-increments.

use crate::machine_code::MachineCode;
use crate::unwind::UnwindSite;
use garnet_core::{Value, VmError, VmResult};
use garnet_runtime::{ClassId, Location, Runtime};
use smallvec::SmallVec;
use std::sync::Arc;

/// Interpreter scratch state, rebound on every `execute`.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterpreterState {
    call_flags: u32,
}

impl InterpreterState {
    const CALL_FLAG_PRIVATE: u32 = 1;

    /// Mark the next send as privileged (`allow_private`).
    #[inline(always)]
    pub fn set_allow_private(&mut self) {
        self.call_flags |= Self::CALL_FLAG_PRIVATE;
    }

    #[inline(always)]
    pub fn allow_private(&self) -> bool {
        self.call_flags & Self::CALL_FLAG_PRIVATE != 0
    }

    #[inline(always)]
    pub fn clear_call_flags(&mut self) {
        self.call_flags = 0;
    }
}

/// The frame's variable scope. On failure paths the dispatcher flushes it to
/// the heap so surviving closures observe consistent values.
#[derive(Debug, Default)]
pub struct VariableScope {
    /// Heap array holding the flushed registers, once flushed.
    pub heap_copy: Option<Value>,
    flushed: bool,
}

impl VariableScope {
    #[inline]
    pub fn flushed(&self) -> bool {
        self.flushed
    }

    /// Copy the register window into a heap array and mark the scope
    /// flushed. Idempotent.
    pub fn flush_to_heap(&mut self, runtime: &mut Runtime, registers: &[Value]) {
        if self.flushed {
            return;
        }
        let class = runtime.classes.well_known().array;
        self.heap_copy = Some(runtime.heap.alloc_array(class, registers.to_vec()));
        self.flushed = true;
    }
}

/// One entry on the frame's unwind stack: the site plus the operand-stack
/// depth to restore when it fires.
#[derive(Clone)]
pub struct UnwindEntry {
    pub site: Arc<UnwindSite>,
    pub sp: isize,
}

/// A per-invocation call frame.
pub struct CallFrame {
    pub machine_code: Arc<MachineCode>,

    /// Instruction pointer into the prepared stream.
    pub ip: usize,

    /// Stack pointer; `-1` is "one before base".
    sp: isize,

    /// Operand stack and registers in one contiguous index space.
    pub stk: Box<[Value]>,

    pub self_value: Value,

    /// Lexical module: protected checks, super lookup, constant scope.
    pub module: ClassId,

    /// Block passed to this invocation, nil if none.
    pub block: Value,

    pub unwinds: SmallVec<[UnwindEntry; 4]>,

    /// Scratch interpreter state.
    pub is: InterpreterState,

    pub scope: VariableScope,

    /// Exception saved while an `ensure` handler runs; `reraise` consumes it.
    pub pending_raise: Option<Value>,
}

impl CallFrame {
    pub fn new(machine_code: &Arc<MachineCode>, self_value: Value, module: ClassId) -> CallFrame {
        let frame_size = machine_code.frame_size();
        CallFrame {
            machine_code: machine_code.clone(),
            ip: 0,
            sp: -1,
            stk: vec![Value::nil(); frame_size].into_boxed_slice(),
            self_value,
            module,
            block: Value::nil(),
            unwinds: SmallVec::new(),
            is: InterpreterState::default(),
            scope: VariableScope::default(),
            pending_raise: None,
        }
    }

    /// Rebind for a fresh dispatch: stack pointer to one before base, scratch
    /// state cleared.
    pub fn bind(&mut self, machine_code: &Arc<MachineCode>) {
        self.machine_code = machine_code.clone();
        self.sp = -1;
        self.is = InterpreterState::default();
    }

    // =========================================================================
    // Operand stack
    // =========================================================================

    #[inline(always)]
    pub fn sp(&self) -> isize {
        self.sp
    }

    #[inline(always)]
    pub fn set_sp(&mut self, sp: isize) {
        self.sp = sp;
    }

    #[inline(always)]
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        let next = self.sp + 1;
        if next as usize >= self.machine_code.stack_size {
            return Err(VmError::internal("operand stack overflow"));
        }
        self.sp = next;
        self.stk[next as usize] = value;
        Ok(())
    }

    #[inline(always)]
    pub fn pop(&mut self) -> VmResult<Value> {
        if self.sp < 0 {
            return Err(VmError::internal("operand stack underflow"));
        }
        let value = self.stk[self.sp as usize];
        self.sp -= 1;
        Ok(value)
    }

    #[inline(always)]
    pub fn top(&self) -> VmResult<Value> {
        if self.sp < 0 {
            return Err(VmError::internal("operand stack underflow"));
        }
        Ok(self.stk[self.sp as usize])
    }

    /// Stack slot at `depth` below the top.
    #[inline(always)]
    pub fn peek(&self, depth: usize) -> VmResult<Value> {
        let index = self.sp - depth as isize;
        if index < 0 {
            return Err(VmError::internal("operand stack underflow"));
        }
        Ok(self.stk[index as usize])
    }

    /// Drop `count` values.
    #[inline(always)]
    pub fn drop_values(&mut self, count: usize) -> VmResult<()> {
        if self.sp < count as isize - 1 {
            return Err(VmError::internal("operand stack underflow"));
        }
        self.sp -= count as isize;
        Ok(())
    }

    // =========================================================================
    // Registers
    // =========================================================================

    /// Read a slot by its biased index (as prepared streams carry them).
    #[inline(always)]
    pub fn slot(&self, biased: usize) -> VmResult<Value> {
        self.stk
            .get(biased)
            .copied()
            .ok_or_else(|| VmError::internal("register index out of frame"))
    }

    #[inline(always)]
    pub fn set_slot(&mut self, biased: usize, value: Value) -> VmResult<()> {
        match self.stk.get_mut(biased) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VmError::internal("register index out of frame")),
        }
    }

    /// Read local `index` (unbiased).
    #[inline(always)]
    pub fn local(&self, index: usize) -> VmResult<Value> {
        self.slot(self.machine_code.stack_size + index)
    }

    #[inline(always)]
    pub fn set_local(&mut self, index: usize, value: Value) -> VmResult<()> {
        self.set_slot(self.machine_code.stack_size + index, value)
    }

    /// The register window (everything above the operand stack).
    #[inline]
    pub fn registers(&self) -> &[Value] {
        &self.stk[self.machine_code.stack_size..]
    }

    /// A location snapshot for this frame at its current ip.
    pub fn location(&self) -> Location {
        Location::new(self.machine_code.name, self.machine_code.file, self.ip as u32)
    }

    /// Flush the variable scope to the heap.
    pub fn flush_scope(&mut self, runtime: &mut Runtime) {
        let registers: Vec<Value> = self.stk[self.machine_code.stack_size..].to_vec();
        self.scope.flush_to_heap(runtime, &registers);
    }
}
