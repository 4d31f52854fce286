//! Bytecode chunks and the modules that group them.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::bytecode::constant::{Constant, ConstantPool};
use crate::bytecode::instruction::OpCode;
use crate::error::CompileError;
use crate::span::Span;

/// Role of a chunk inside a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// Top-level program code
    Main,
    /// A named function
    Function,
    /// Reserved for class methods
    Method,
    /// Reserved for class constructors
    Constructor,
}

impl ChunkType {
    pub fn name(self) -> &'static str {
        match self {
            ChunkType::Main => "main",
            ChunkType::Function => "function",
            ChunkType::Method => "method",
            ChunkType::Constructor => "constructor",
        }
    }
}

/// One compiled unit: a bytecode buffer with its own constant pool.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub name: String,
    pub chunk_type: ChunkType,
    /// The bytecode instructions.
    pub code: Vec<u8>,
    pub constants: ConstantPool,
    pub num_locals: u16,
    pub num_params: u8,
    /// Parameter names in declaration order (compile-time only).
    pub param_names: Vec<String>,
    /// Instruction offset -> source position (compile-time only).
    pub source_map: Option<BTreeMap<usize, Span>>,
}

impl Chunk {
    pub fn new(name: impl Into<String>, chunk_type: ChunkType) -> Self {
        Self {
            name: name.into(),
            chunk_type,
            code: Vec::new(),
            constants: ConstantPool::new(),
            num_locals: 0,
            num_params: 0,
            param_names: Vec::new(),
            source_map: None,
        }
    }

    /// Write an opcode and return its offset.
    pub fn write_op(&mut self, op: OpCode) -> usize {
        self.write_byte(op as u8)
    }

    /// Write a raw byte and return its offset.
    pub fn write_byte(&mut self, byte: u8) -> usize {
        let pos = self.code.len();
        self.code.push(byte);
        pos
    }

    /// Write a 16-bit value (little-endian) and return its offset.
    pub fn write_u16(&mut self, value: u16) -> usize {
        let pos = self.code.len();
        self.code.extend_from_slice(&value.to_le_bytes());
        pos
    }

    /// Write a signed 16-bit value (little-endian) and return its offset.
    pub fn write_i16(&mut self, value: i16) -> usize {
        let pos = self.code.len();
        self.code.extend_from_slice(&value.to_le_bytes());
        pos
    }

    pub fn read_byte(&self, offset: usize) -> Option<u8> {
        self.code.get(offset).copied()
    }

    /// Read a 16-bit value at offset.
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let bytes = self.code.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_i16(&self, offset: usize) -> Option<i16> {
        self.read_u16(offset).map(|v| v as i16)
    }

    /// Add a constant to the pool and return its index.
    pub fn add_constant(&mut self, constant: Constant) -> Option<u16> {
        self.constants.add(constant)
    }

    pub fn constant(&self, index: u16) -> Option<&Constant> {
        self.constants.get(index)
    }

    /// Get the current offset in the code.
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Patch the jump offset field at `field_pos` so the jump lands on
    /// `target`. Offsets are relative to the byte after the field.
    pub fn patch_jump(&mut self, field_pos: usize, target: usize, span: Span) -> Result<(), CompileError> {
        let distance = target as i64 - (field_pos as i64 + 2);
        let offset =
            i16::try_from(distance).map_err(|_| CompileError::jump_too_far(distance, span))?;
        match self.code.get_mut(field_pos..field_pos + 2) {
            Some(field) => {
                field.copy_from_slice(&offset.to_le_bytes());
                Ok(())
            }
            None => Err(CompileError::new(
                format!("Jump field {} outside chunk '{}'", field_pos, self.name),
                span,
            )),
        }
    }

    /// Record the source position of the instruction at `offset`.
    pub fn record_position(&mut self, offset: usize, span: Span) {
        self.source_map
            .get_or_insert_with(BTreeMap::new)
            .insert(offset, span);
    }

    /// Source position of the instruction at `offset`, if known.
    pub fn position_at(&self, offset: usize) -> Option<Span> {
        self.source_map.as_ref()?.get(&offset).copied()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

/// Chunks compare by everything that survives serialization. Parameter
/// names and the source map are debugging aids and are ignored.
impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.chunk_type == other.chunk_type
            && self.code == other.code
            && self.constants == other.constants
            && self.num_locals == other.num_locals
            && self.num_params == other.num_params
    }
}

/// A compiled program: one main chunk, named function chunks and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub main: Chunk,
    pub functions: IndexMap<String, Chunk>,
    pub metadata: IndexMap<String, String>,
}

impl Module {
    pub fn new(name: impl Into<String>, main: Chunk) -> Self {
        Self {
            name: name.into(),
            main,
            functions: IndexMap::new(),
            metadata: IndexMap::new(),
        }
    }

    /// Register a function chunk, replacing any earlier one with that name.
    pub fn add_function(&mut self, name: impl Into<String>, chunk: Chunk) {
        self.functions.insert(name.into(), chunk);
    }

    pub fn get_function(&self, name: &str) -> Option<&Chunk> {
        self.functions.get(name)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Total bytecode size across all chunks.
    pub fn total_size(&self) -> usize {
        self.main.len() + self.functions.values().map(Chunk::len).sum::<usize>()
    }
}
