//! Bytecode toolchain: instruction set, compiler, binary container and
//! disassembler.
//!
//! # Architecture
//!
//! - `instruction`: OpCode definitions and the static ISA table
//! - `constant`: constant values and the deduplicating constant pool
//! - `chunk`: bytecode chunks and the module that groups them
//! - `compiler`: transforms the syntax tree into a module
//! - `serializer`: the binary module format
//! - `disassembler`: debug output for bytecode inspection

pub mod chunk;
pub mod compiler;
pub mod compiler_exprs;
pub mod compiler_stmts;
pub mod constant;
pub mod disassembler;
pub mod instruction;
pub mod serializer;

pub use chunk::{Chunk, ChunkType, Module};
pub use compiler::{compile, Compiler};
pub use constant::{Constant, ConstantPool};
pub use disassembler::{disassemble, disassemble_module};
pub use instruction::{OpCode, OperandKind};
pub use serializer::{deserialize, load_module, save_module, serialize, serialize_to_vec};
