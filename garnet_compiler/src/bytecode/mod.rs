//! Bytecode: opcode table, compiled code, and the assembler.

pub mod builder;
pub mod compiled_code;
pub mod opcode;

pub use builder::{BytecodeBuilder, Label};
pub use compiled_code::{CodeFlags, CompiledCode};
pub use opcode::{instruction_data, InstructionData, Opcode, OPCODE_COUNT};

use std::fmt::Write;

/// Render a compiled code's symbolic stream.
///
/// Unknown opcodes and truncated tails are rendered rather than rejected so
/// the disassembler stays usable on malformed input.
pub fn disassemble(code: &CompiledCode) -> String {
    let mut out = String::new();

    writeln!(out, "compiled code: {}", code.name).unwrap();
    writeln!(out, "  file: {}", code.file).unwrap();
    writeln!(out, "  serial: {}", code.serial).unwrap();
    writeln!(
        out,
        "  stack: {}  locals: {}  args: {}/{}",
        code.stack_size, code.local_count, code.required_args, code.total_args
    )
    .unwrap();

    if !code.literals.is_empty() {
        writeln!(out, "\nliterals:").unwrap();
        for (index, literal) in code.literals.iter().enumerate() {
            writeln!(out, "  {index:4}: {literal:?}").unwrap();
        }
    }

    writeln!(out, "\nstream:").unwrap();
    let mut ip = 0;
    while ip < code.opcodes.len() {
        let word = code.opcodes[ip];
        let Some(op) = Opcode::from_word(word) else {
            writeln!(out, "  {ip:4}: <unknown {word}>").unwrap();
            ip += 1;
            continue;
        };
        let width = op.width();
        let mut line = format!("  {ip:4}: {}", op.name());
        for offset in 1..width {
            match code.opcodes.get(ip + offset) {
                Some(operand) => line.push_str(&format!(" {operand}")),
                None => line.push_str(" <truncated>"),
            }
        }
        writeln!(out, "{line}").unwrap();
        ip += width;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use garnet_core::Value;

    #[test]
    fn test_disassemble_round() {
        let mut b = BytecodeBuilder::new("disasm").stack_size(1);
        b.push_literal(Value::fixnum(7));
        b.ret();
        let text = disassemble(&b.finish());
        assert!(text.contains("push_literal 0"));
        assert!(text.contains("ret"));
        assert!(text.contains("Value(7)"));
    }

    #[test]
    fn test_disassemble_tolerates_garbage() {
        let code = CompiledCode {
            name: garnet_core::Symbol::intern("garbage"),
            file: garnet_core::Symbol::intern("(test)"),
            serial: CompiledCode::next_serial(),
            opcodes: vec![9_999].into_boxed_slice(),
            literals: Box::new([]),
            stack_size: 1,
            local_count: 0,
            required_args: 0,
            total_args: 0,
            flags: CodeFlags::default(),
        };
        assert!(disassemble(&code).contains("<unknown 9999>"));
    }
}
