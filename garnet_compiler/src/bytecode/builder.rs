//! Assembler for compiled code.
//!
//! `BytecodeBuilder` is how tests and bootstrap loaders produce
//! [`CompiledCode`]: emit instructions, bind labels, dedup literals, finish.
//! It performs no verification beyond label resolution — malformed streams
//! are the preparer's problem to reject.

use super::compiled_code::{CodeFlags, CompiledCode};
use super::opcode::Opcode;
use garnet_core::{Symbol, Value};
use rustc_hash::FxHashMap;

/// A jump target not yet bound to a stream position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Debug)]
struct ForwardRef {
    /// Stream index of the operand word to patch.
    operand_index: usize,
    label: Label,
}

/// Builder for compiled code objects.
pub struct BytecodeBuilder {
    name: Symbol,
    file: Symbol,
    words: Vec<u64>,
    literals: Vec<Value>,
    literal_ids: FxHashMap<u64, usize>,
    stack_size: usize,
    local_count: usize,
    required_args: u32,
    total_args: u32,
    flags: CodeFlags,
    next_label: u32,
    bound: FxHashMap<Label, usize>,
    forward_refs: Vec<ForwardRef>,
}

impl BytecodeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: Symbol::intern(name),
            file: Symbol::intern("(assembled)"),
            words: Vec::new(),
            literals: Vec::new(),
            literal_ids: FxHashMap::default(),
            stack_size: 1,
            local_count: 0,
            required_args: 0,
            total_args: 0,
            flags: CodeFlags::default(),
            next_label: 0,
            bound: FxHashMap::default(),
            forward_refs: Vec::new(),
        }
    }

    pub fn file(mut self, file: &str) -> Self {
        self.file = Symbol::intern(file);
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn local_count(mut self, count: usize) -> Self {
        self.local_count = count;
        self
    }

    pub fn args(mut self, required: u32, total: u32) -> Self {
        self.required_args = required;
        self.total_args = total;
        self
    }

    pub fn block_body(mut self) -> Self {
        self.flags |= CodeFlags::IS_BLOCK;
        self
    }

    // =========================================================================
    // Literals
    // =========================================================================

    /// Intern a literal, deduplicating by raw word (reference literals dedup
    /// by handle identity).
    pub fn literal(&mut self, value: Value) -> usize {
        if let Some(&index) = self.literal_ids.get(&value.raw()) {
            return index;
        }
        let index = self.literals.len();
        self.literals.push(value);
        self.literal_ids.insert(value.raw(), index);
        index
    }

    fn symbol_literal(&mut self, name: &str) -> u64 {
        self.literal(Value::symbol(Symbol::intern(name))) as u64
    }

    // =========================================================================
    // Raw emission
    // =========================================================================

    pub fn op0(&mut self, op: Opcode) -> &mut Self {
        debug_assert_eq!(op.width(), 1);
        self.words.push(op.id() as u64);
        self
    }

    pub fn op1(&mut self, op: Opcode, a: u64) -> &mut Self {
        debug_assert_eq!(op.width(), 2);
        self.words.push(op.id() as u64);
        self.words.push(a);
        self
    }

    pub fn op2(&mut self, op: Opcode, a: u64, b: u64) -> &mut Self {
        debug_assert_eq!(op.width(), 3);
        self.words.push(op.id() as u64);
        self.words.push(a);
        self.words.push(b);
        self
    }

    pub fn op3(&mut self, op: Opcode, a: u64, b: u64, c: u64) -> &mut Self {
        debug_assert_eq!(op.width(), 4);
        self.words.push(op.id() as u64);
        self.words.push(a);
        self.words.push(b);
        self.words.push(c);
        self
    }

    // =========================================================================
    // Labels
    // =========================================================================

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Bind a label to the current stream position.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.bound.insert(label, self.words.len());
        self
    }

    /// Emit a branch whose target operand is a label, patched at `finish`.
    pub fn branch(&mut self, op: Opcode, label: Label) -> &mut Self {
        debug_assert_eq!(op.width(), 2);
        self.words.push(op.id() as u64);
        self.forward_refs.push(ForwardRef {
            operand_index: self.words.len(),
            label,
        });
        self.words.push(0);
        self
    }

    /// Emit `setup_unwind` with a label-resolved handler ip.
    pub fn setup_unwind_to(&mut self, handler: Label, unwind_type: u64) -> &mut Self {
        self.words.push(Opcode::SetupUnwind.id() as u64);
        self.forward_refs.push(ForwardRef {
            operand_index: self.words.len(),
            label: handler,
        });
        self.words.push(0);
        self.words.push(unwind_type);
        self
    }

    /// Current stream position; the ip the next emitted instruction gets.
    #[inline]
    pub fn here(&self) -> usize {
        self.words.len()
    }

    // =========================================================================
    // Common instruction helpers
    // =========================================================================

    pub fn push_literal(&mut self, value: Value) -> &mut Self {
        let index = self.literal(value) as u64;
        self.op1(Opcode::PushLiteral, index)
    }

    pub fn push_int(&mut self, n: i64) -> &mut Self {
        self.op1(Opcode::PushInt, n as u64)
    }

    pub fn send_method(&mut self, name: &str) -> &mut Self {
        let index = self.symbol_literal(name);
        self.op1(Opcode::SendMethod, index)
    }

    pub fn send_stack(&mut self, name: &str, argc: u64) -> &mut Self {
        let index = self.symbol_literal(name);
        self.op2(Opcode::SendStack, index, argc)
    }

    pub fn send_vcall(&mut self, name: &str) -> &mut Self {
        let index = self.symbol_literal(name);
        self.op1(Opcode::SendVcall, index)
    }

    pub fn push_const(&mut self, name: &str) -> &mut Self {
        let index = self.symbol_literal(name);
        self.op1(Opcode::PushConst, index)
    }

    pub fn invoke_primitive(&mut self, name: &str, argc: u64) -> &mut Self {
        let index = self.symbol_literal(name);
        self.op2(Opcode::InvokePrimitive, index, argc)
    }

    pub fn ret(&mut self) -> &mut Self {
        self.op0(Opcode::Ret)
    }

    // =========================================================================
    // Finish
    // =========================================================================

    /// Resolve labels and produce the compiled code.
    ///
    /// # Panics
    ///
    /// Panics on an unbound label; that is a bug in the emitting code, not a
    /// malformed-input condition.
    pub fn finish(mut self) -> CompiledCode {
        for fref in self.forward_refs.drain(..) {
            let target = *self
                .bound
                .get(&fref.label)
                .unwrap_or_else(|| panic!("unbound label {:?}", fref.label));
            self.words[fref.operand_index] = target as u64;
        }

        CompiledCode {
            name: self.name,
            file: self.file,
            serial: CompiledCode::next_serial(),
            opcodes: self.words.into_boxed_slice(),
            literals: self.literals.into_boxed_slice(),
            stack_size: self.stack_size,
            local_count: self.local_count,
            required_args: self.required_args,
            total_args: self.total_args,
            flags: self.flags,
        }
    }
}
