//! Bytecode instruction set.
//!
//! Every opcode has a fixed operand shape and a declared net stack effect.
//! Both live in a single static table indexed by the opcode byte, which the
//! compiler, the VM and the disassembler all decode from.

use std::fmt;

/// Opcodes for the bytecode virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // ============ Stack & Variables ============
    /// Push a constant: LOAD_CONST <index:u16>
    LoadConst = 0,
    /// Push a local: LOAD_LOCAL <slot:u16>
    LoadLocal,
    /// Pop into a local: STORE_LOCAL <slot:u16>
    StoreLocal,
    /// Push a global or native: LOAD_GLOBAL <name_index:u16>
    LoadGlobal,
    /// Pop into a global: STORE_GLOBAL <name_index:u16>
    StoreGlobal,
    /// Discard the top value
    Pop,
    /// Duplicate the top value
    Dup,
    /// Swap the top two values
    Swap,

    // ============ Arithmetic ============
    Add,
    Sub,
    Mul,
    /// True division, always produces a float
    Div,
    Mod,
    Neg,
    /// Logical negation by truthiness
    Not,

    // ============ Comparison ============
    /// Loose equality (numeric widening)
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    /// Equality requiring the same value kind
    StrictEq,
    StrictNeq,

    // ============ Logic ============
    /// Both operands are always evaluated
    And,
    Or,

    // ============ Control Flow ============
    /// Unconditional relative jump: JUMP <offset:i16>
    Jump,
    /// Pop the condition, jump if falsy: JUMP_IF_FALSE <offset:i16>
    JumpIfFalse,
    /// Pop the current frame, leaving the result on the stack
    Return,
    /// Call with N arguments: CALL <argc:u8>
    Call,
    /// Push a function by name: LOAD_FUNCTION <name_index:u16>
    LoadFunction,
    Nop,
    /// Stop the whole run
    Halt,
}

/// Shape of a single operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    U8,
    U16,
    I16,
}

impl OperandKind {
    /// Width in bytes.
    pub const fn width(self) -> usize {
        match self {
            OperandKind::U8 => 1,
            OperandKind::U16 | OperandKind::I16 => 2,
        }
    }
}

/// Static description of one opcode.
#[derive(Debug, Clone, Copy)]
pub struct InstructionSpec {
    pub opcode: OpCode,
    pub mnemonic: &'static str,
    pub operands: &'static [OperandKind],
    pub stack_effect: i8,
}

const NONE: &[OperandKind] = &[];
const U8: &[OperandKind] = &[OperandKind::U8];
const U16: &[OperandKind] = &[OperandKind::U16];
const I16: &[OperandKind] = &[OperandKind::I16];

const fn spec(
    opcode: OpCode,
    mnemonic: &'static str,
    operands: &'static [OperandKind],
    stack_effect: i8,
) -> InstructionSpec {
    InstructionSpec {
        opcode,
        mnemonic,
        operands,
        stack_effect,
    }
}

/// The instruction table. Entry `i` describes the opcode with byte value `i`.
pub static INSTRUCTIONS: [InstructionSpec; OpCode::COUNT] = [
    spec(OpCode::LoadConst, "LOAD_CONST", U16, 1),
    spec(OpCode::LoadLocal, "LOAD_LOCAL", U16, 1),
    spec(OpCode::StoreLocal, "STORE_LOCAL", U16, -1),
    spec(OpCode::LoadGlobal, "LOAD_GLOBAL", U16, 1),
    spec(OpCode::StoreGlobal, "STORE_GLOBAL", U16, -1),
    spec(OpCode::Pop, "POP", NONE, -1),
    spec(OpCode::Dup, "DUP", NONE, 1),
    spec(OpCode::Swap, "SWAP", NONE, 0),
    spec(OpCode::Add, "ADD", NONE, -1),
    spec(OpCode::Sub, "SUB", NONE, -1),
    spec(OpCode::Mul, "MUL", NONE, -1),
    spec(OpCode::Div, "DIV", NONE, -1),
    spec(OpCode::Mod, "MOD", NONE, -1),
    spec(OpCode::Neg, "NEG", NONE, 0),
    spec(OpCode::Not, "NOT", NONE, 0),
    spec(OpCode::Eq, "EQ", NONE, -1),
    spec(OpCode::Neq, "NEQ", NONE, -1),
    spec(OpCode::Lt, "LT", NONE, -1),
    spec(OpCode::Gt, "GT", NONE, -1),
    spec(OpCode::Lte, "LTE", NONE, -1),
    spec(OpCode::Gte, "GTE", NONE, -1),
    spec(OpCode::StrictEq, "STRICT_EQ", NONE, -1),
    spec(OpCode::StrictNeq, "STRICT_NEQ", NONE, -1),
    spec(OpCode::And, "AND", NONE, -1),
    spec(OpCode::Or, "OR", NONE, -1),
    spec(OpCode::Jump, "JUMP", I16, 0),
    spec(OpCode::JumpIfFalse, "JUMP_IF_FALSE", I16, -1),
    spec(OpCode::Return, "RETURN", NONE, 0),
    spec(OpCode::Call, "CALL", U8, 0),
    spec(OpCode::LoadFunction, "LOAD_FUNCTION", U16, 1),
    spec(OpCode::Nop, "NOP", NONE, 0),
    spec(OpCode::Halt, "HALT", NONE, 0),
];

impl OpCode {
    /// Number of opcodes in the instruction set.
    pub const COUNT: usize = 32;

    /// Decode an opcode byte.
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        INSTRUCTIONS.get(byte as usize).map(|spec| spec.opcode)
    }

    pub fn spec(self) -> &'static InstructionSpec {
        &INSTRUCTIONS[self as usize]
    }

    pub fn mnemonic(self) -> &'static str {
        self.spec().mnemonic
    }

    pub fn operands(self) -> &'static [OperandKind] {
        self.spec().operands
    }

    /// Net values pushed minus popped.
    pub fn stack_effect(self) -> i8 {
        self.spec().stack_effect
    }

    /// Size in bytes of the operand bytes following the opcode.
    pub fn operand_size(self) -> usize {
        self.operands().iter().map(|kind| kind.width()).sum()
    }

    /// Size in bytes of the whole instruction.
    pub fn encoded_size(self) -> usize {
        1 + self.operand_size()
    }

    pub fn is_jump(self) -> bool {
        matches!(self, OpCode::Jump | OpCode::JumpIfFalse)
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        op as u8
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_indexed_by_opcode() {
        for (i, spec) in INSTRUCTIONS.iter().enumerate() {
            assert_eq!(spec.opcode as usize, i, "{} is out of place", spec.mnemonic);
            assert_eq!(OpCode::from_u8(i as u8), Some(spec.opcode));
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(OpCode::from_u8(OpCode::COUNT as u8), None);
        assert_eq!(OpCode::from_u8(255), None);
    }

    #[test]
    fn test_encoded_size() {
        assert_eq!(OpCode::Add.encoded_size(), 1);
        assert_eq!(OpCode::Call.encoded_size(), 2);
        assert_eq!(OpCode::LoadConst.encoded_size(), 3);
        assert_eq!(OpCode::JumpIfFalse.encoded_size(), 3);
        assert_eq!(OpCode::Halt.encoded_size(), 1);
    }

    #[test]
    fn test_stack_effects() {
        assert_eq!(OpCode::LoadConst.stack_effect(), 1);
        assert_eq!(OpCode::StoreGlobal.stack_effect(), -1);
        assert_eq!(OpCode::StrictEq.stack_effect(), -1);
        assert_eq!(OpCode::JumpIfFalse.stack_effect(), -1);
        assert_eq!(OpCode::Jump.stack_effect(), 0);
        assert_eq!(OpCode::Swap.stack_effect(), 0);
    }

    #[test]
    fn test_byte_values_are_stable() {
        assert_eq!(u8::from(OpCode::LoadConst), 0);
        assert_eq!(u8::from(OpCode::Add), 8);
        assert_eq!(u8::from(OpCode::Jump), 25);
        assert_eq!(u8::from(OpCode::Halt), 31);
    }
}
