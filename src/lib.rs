//! DialectVM: bytecode backend for a natural-language-flavored scripting
//! dialect.
//!
//! A front end hands over a syntax tree; this crate compiles it into a
//! module of bytecode chunks, stores modules in a compact binary container,
//! and executes them on a stack-based virtual machine.
//!
//! # Pipeline
//!
//! - **Compile**: [`ast::Program`] → [`bytecode::Module`]
//! - **Store**: [`bytecode::Module`] ⇄ `.mdbc` bytes
//! - **Run**: [`bytecode::Module`] → [`vm::Value`]

// Allow some clippy lints that are stylistic and not critical
#![allow(clippy::module_inception)]
#![allow(clippy::result_large_err)]
#![allow(clippy::new_without_default)]

pub mod ast;
pub mod bytecode;
pub mod error;
pub mod span;
pub mod vm;

use std::fs;
use std::path::Path;

use ast::Program;
use bytecode::{Module, serializer};
use error::{CompileErrors, DialectError, RuntimeError};
use vm::{Value, Vm, VmConfig};

/// Compile a syntax tree into a module.
pub fn compile(program: &Program, module_name: &str) -> Result<Module, CompileErrors> {
    bytecode::compile(program, module_name)
}

/// Compile a JSON-encoded syntax tree.
pub fn compile_json(json: &str, module_name: &str) -> Result<Module, DialectError> {
    let program: Program = serde_json::from_str(json)?;
    Ok(compile(&program, module_name)?)
}

/// Run a module with the default VM configuration.
pub fn run(module: &Module) -> Result<Value, RuntimeError> {
    run_with_config(module, VmConfig::default())
}

/// Run a module on a fresh VM.
pub fn run_with_config(module: &Module, config: VmConfig) -> Result<Value, RuntimeError> {
    Vm::new(config).run(module)
}

/// Text listing of every chunk in a module.
pub fn disassemble(module: &Module) -> String {
    bytecode::disassemble_module(module)
}

/// Write a module to a `.mdbc` file.
pub fn save(module: &Module, path: impl AsRef<Path>) -> Result<(), DialectError> {
    Ok(serializer::save_module(module, path)?)
}

/// Load a module from a file holding either a binary module or a JSON
/// syntax tree. Binary modules are recognized by their magic number; trees
/// are compiled under the file's stem.
pub fn load(path: impl AsRef<Path>) -> Result<Module, DialectError> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    if bytes.starts_with(&serializer::MAGIC.to_be_bytes()) {
        return Ok(serializer::deserialize(&bytes)?);
    }
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string());
    let json = String::from_utf8_lossy(&bytes);
    compile_json(&json, &name)
}
