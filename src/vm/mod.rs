//! Stack-based virtual machine for compiled modules.
//!
//! - `value`: runtime values and their equality/truthiness/display rules
//! - `natives`: host functions callable from bytecode
//! - `frame`: call frames and the bounded call stack
//! - `vm`: the dispatch loop
//! - `vm_calls`: CALL/RETURN and name lookup

pub mod config;
pub mod frame;
pub mod natives;
pub mod value;
#[allow(clippy::module_inception)]
pub mod vm;
mod vm_calls;

pub use config::VmConfig;
pub use natives::Natives;
pub use value::{Arity, NativeFunction, Value};
pub use vm::Vm;
