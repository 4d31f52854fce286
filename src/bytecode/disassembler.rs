//! Bytecode disassembler for debugging.

use std::fmt::Write;

use crate::bytecode::chunk::{Chunk, Module};
use crate::bytecode::instruction::{OpCode, OperandKind};

/// Disassemble every chunk of a module, main first.
pub fn disassemble_module(module: &Module) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "; module {}", module.name);
    for (key, value) in &module.metadata {
        let _ = writeln!(output, "; {} = {}", key, value);
    }
    output.push('\n');
    output.push_str(&disassemble(&module.main));

    for chunk in module.functions.values() {
        output.push('\n');
        output.push_str(&disassemble(chunk));
    }
    output
}

/// Disassemble a chunk into human-readable output.
pub fn disassemble(chunk: &Chunk) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "== {} ({}, locals={}, params={}) ==",
        chunk.name,
        chunk.chunk_type.name(),
        chunk.num_locals,
        chunk.num_params
    );

    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset, &mut output);
    }
    output
}

/// Disassemble the instruction at `offset`, returning the offset of the next.
/// An offset past the end writes nothing and is returned unchanged.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize, output: &mut String) -> usize {
    let Some(byte) = chunk.read_byte(offset) else {
        return offset;
    };
    let Some(op) = OpCode::from_u8(byte) else {
        let _ = write!(output, "{:04x}  <invalid 0x{:02x}>", offset, byte);
        finish_line(chunk, offset, output);
        return offset + 1;
    };

    let operand_at = offset + 1;
    let next = offset + op.encoded_size();
    let Some(kind) = op.operands().first().copied() else {
        let _ = write!(output, "{:04x}  {}", offset, op.mnemonic());
        finish_line(chunk, offset, output);
        return next;
    };
    let _ = write!(output, "{:04x}  {:<16}", offset, op.mnemonic());

    let comment = match kind {
        OperandKind::U8 => chunk.read_byte(operand_at).map(|argc| {
            let _ = write!(output, " {:>5}", argc);
            None
        }),
        OperandKind::U16 => chunk.read_u16(operand_at).map(|index| {
            let _ = write!(output, " {:>5}", index);
            constant_comment(chunk, op, index)
        }),
        OperandKind::I16 => chunk.read_i16(operand_at).map(|jump| {
            let _ = write!(output, " {:>5}", jump);
            let target = next as i64 + i64::from(jump);
            Some(format!("-> {:04x}", target))
        }),
    };

    match comment {
        Some(Some(comment)) => {
            let _ = write!(output, "  ; {}", comment);
        }
        Some(None) => {}
        None => {
            output.push_str(" <truncated>");
            finish_line(chunk, offset, output);
            return chunk.code.len();
        }
    }
    finish_line(chunk, offset, output);
    next
}

fn constant_comment(chunk: &Chunk, op: OpCode, index: u16) -> Option<String> {
    let comment = match (op, chunk.constant(index)) {
        (_, None) => "<bad constant>".to_string(),
        (OpCode::LoadConst, Some(constant)) => constant.to_string(),
        (_, Some(constant)) => match constant.as_str() {
            Some(name) => name.to_string(),
            None => constant.to_string(),
        },
    };
    match op {
        OpCode::LoadConst | OpCode::LoadGlobal | OpCode::StoreGlobal | OpCode::LoadFunction => {
            Some(comment)
        }
        _ => None,
    }
}

fn finish_line(chunk: &Chunk, offset: usize, output: &mut String) {
    if let Some(span) = chunk.position_at(offset) {
        let _ = write!(output, "  [line {}]", span);
    }
    output.push('\n');
}
