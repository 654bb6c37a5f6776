//! The instruction set and its static metadata table.
//!
//! Each instruction occupies `width` words in the stream: one header word
//! (the opcode id before preparation, a handler token afterwards) followed by
//! `width - 1` operand words. Widths are decoded from this table, never from
//! the stream itself.
//!
//! Ids are stable integers; the dispatcher's handler table is indexed by id,
//! so the preparer can install the id itself as the handler token.

/// Static metadata for one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionData {
    /// Stable instruction id.
    pub id: u16,
    /// Symbolic name, used by the disassembler and error messages.
    pub name: &'static str,
    /// Total width in words: header plus operands (1–4).
    pub width: usize,
}

macro_rules! opcodes {
    ($(($variant:ident, $name:literal, $id:literal, $width:literal)),+ $(,)?) => {
        /// One instruction of the Garnet instruction set.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Opcode {
            $($variant = $id),+
        }

        /// Metadata table, indexed by instruction id.
        static INSTRUCTION_DATA: &[InstructionData] = &[
            $(InstructionData { id: $id, name: $name, width: $width }),+
        ];

        impl Opcode {
            /// Decode an opcode from a raw stream word.
            #[inline]
            pub fn from_word(word: u64) -> Option<Opcode> {
                match word {
                    $($id => Some(Opcode::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    // Stack manipulation and immediates.
    (Noop,                    "noop",                         0,  1),
    (Pop,                     "pop",                          1,  1),
    (DupTop,                  "dup_top",                      2,  1),
    (Ret,                     "ret",                          3,  1),
    (PushNil,                 "push_nil",                     4,  1),
    (PushTrue,                "push_true",                    5,  1),
    (PushFalse,               "push_false",                   6,  1),
    (PushSelf,                "push_self",                    7,  1),
    (PushInt,                 "push_int",                     8,  2),
    (PushTaggedNil,           "push_tagged_nil",              9,  2),
    (PushLiteral,             "push_literal",                 10, 2),
    (PushMemo,                "push_memo",                    11, 2),
    (PushLocal,               "push_local",                   12, 2),
    (SetLocal,                "set_local",                    13, 2),

    // Control flow.
    (Goto,                    "goto",                         14, 2),
    (GotoIfTrue,              "goto_if_true",                 15, 2),
    (GotoIfFalse,             "goto_if_false",                16, 2),

    // Sends and serial checks.
    (AllowPrivate,            "allow_private",                17, 1),
    (SendMethod,              "send_method",                  18, 2),
    (SendStack,               "send_stack",                   19, 3),
    (SendStackWithBlock,      "send_stack_with_block",        20, 3),
    (SendStackWithSplat,      "send_stack_with_splat",        21, 3),
    (SendSuperStackWithBlock, "send_super_stack_with_block",  22, 3),
    (SendSuperStackWithSplat, "send_super_stack_with_splat",  23, 3),
    (ZSuper,                  "zsuper",                       24, 2),
    (SendVcall,               "send_vcall",                   25, 2),
    (ObjectToS,               "object_to_s",                  26, 2),
    (CheckSerial,             "check_serial",                 27, 3),
    (CheckSerialPrivate,      "check_serial_private",         28, 3),

    // Constants and instance variables.
    (PushConst,               "push_const",                   29, 2),
    (FindConst,               "find_const",                   30, 2),
    (SetConst,                "set_const",                    31, 2),
    (SetConstAt,              "set_const_at",                 32, 2),
    (SetIvar,                 "set_ivar",                     33, 2),
    (PushIvar,                "push_ivar",                    34, 2),

    // Blocks and primitives.
    (CreateBlock,             "create_block",                 35, 2),
    (InvokePrimitive,         "invoke_primitive",             36, 3),

    // Exception machinery.
    (SetupUnwind,             "setup_unwind",                 37, 3),
    (Unwind,                  "unwind",                       38, 2),
    (RaiseExc,                "raise_exc",                    39, 1),
    (Reraise,                 "reraise",                      40, 1),
    (PushException,           "push_exception",               41, 1),

    // Diagnostics.
    (MCounter,                "m_counter",                    42, 2),
    (MLog,                    "m_log",                        43, 2),

    // Register-form loads and stores.
    (RLoadLiteral,            "r_load_literal",               44, 3),
    (RLoadLocal,              "r_load_local",                 45, 3),
    (RStoreLocal,             "r_store_local",                46, 3),
    (RLoadStack,              "r_load_stack",                 47, 2),
    (RStoreStack,             "r_store_stack",                48, 2),
    (RLoadSelf,               "r_load_self",                  49, 2),
    (RLoadNeg1,               "r_load_neg1",                  50, 2),
    (RLoad0,                  "r_load_0",                     51, 2),
    (RLoad1,                  "r_load_1",                     52, 2),
    (RLoad2,                  "r_load_2",                     53, 2),
    (RLoadTrue,               "r_load_true",                  54, 2),
    (RLoadFalse,              "r_load_false",                 55, 2),
    (RLoadNil,                "r_load_nil",                   56, 3),
    (RRet,                    "r_ret",                        57, 2),
    (BIf,                     "b_if",                         58, 3),
    (BIfSerial,               "b_if_serial",                  59, 4),

    // Register-form integer arithmetic.
    (IntNeg,                  "int_neg",                      60, 3),
    (IntNot,                  "int_not",                      61, 3),
    (IntAdd,                  "int_add",                      62, 4),
    (IntSub,                  "int_sub",                      63, 4),
    (IntMul,                  "int_mul",                      64, 4),
    (IntDiv,                  "int_div",                      65, 4),
    (IntEq,                   "int_eq",                       66, 4),
    (IntLt,                   "int_lt",                       67, 4),
    (IntLe,                   "int_le",                       68, 4),
}

/// Number of instructions in the set; the dispatcher sizes its handler table
/// from this.
pub const OPCODE_COUNT: usize = 69;

/// Metadata for an instruction.
#[inline(always)]
pub fn instruction_data(op: Opcode) -> &'static InstructionData {
    &INSTRUCTION_DATA[op as usize]
}

impl Opcode {
    /// Stable instruction id.
    #[inline(always)]
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Total width in words.
    #[inline(always)]
    pub fn width(self) -> usize {
        instruction_data(self).width
    }

    /// Symbolic name.
    #[inline(always)]
    pub fn name(self) -> &'static str {
        instruction_data(self).name
    }
}
