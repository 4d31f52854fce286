//! The bytecode virtual machine: stack-based fetch/decode/execute loop.

use std::cmp::Ordering;
use std::io::{self, Write};

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::bytecode::chunk::{Chunk, Module};
use crate::bytecode::constant::Constant;
use crate::bytecode::disassembler::disassemble_instruction;
use crate::bytecode::instruction::OpCode;
use crate::error::RuntimeError;

use super::config::VmConfig;
use super::frame::{CallStack, Frame};
use super::natives::Natives;
use super::value::{NativeFunction, Value};

pub(crate) type VMResult<T> = Result<T, RuntimeError>;

/// The bytecode VM.
pub struct Vm {
    /// Operand stack, shared by all frames.
    pub(crate) stack: Vec<Value>,
    /// Global variables of the current (or last) run.
    pub(crate) globals: IndexMap<String, Value>,
    pub(crate) natives: Natives,
    pub(crate) config: VmConfig,
    /// Destination of `print`/`say` output.
    pub(crate) out: Box<dyn Write>,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        Self::with_output(config, Box::new(io::stdout()))
    }

    /// A VM whose natives write to `out` instead of stdout.
    pub fn with_output(config: VmConfig, out: Box<dyn Write>) -> Self {
        Self {
            stack: Vec::with_capacity(config.max_stack_size.min(256)),
            globals: IndexMap::new(),
            natives: Natives::standard(),
            config,
            out,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn natives(&self) -> &Natives {
        &self.natives
    }

    /// Make a host function callable from bytecode, replacing any native of
    /// the same name.
    pub fn register_native(&mut self, native: NativeFunction) {
        self.natives.register(native);
    }

    /// Globals left behind by the last run.
    pub fn globals(&self) -> &IndexMap<String, Value> {
        &self.globals
    }

    /// Execute a module from its main chunk. Each run starts with an empty
    /// operand stack, call stack and globals table.
    pub fn run(&mut self, module: &Module) -> VMResult<Value> {
        self.stack.clear();
        self.globals.clear();
        debug!(
            module = %module.name,
            functions = module.functions.len(),
            "running module"
        );

        let mut calls = CallStack::new(self.config.max_call_depth);
        calls.push(Frame::new(&module.main, 0))?;
        let mut result = self.execute(module, &mut calls);
        if let Err(error) = self.out.flush() {
            debug!(%error, "flushing output failed");
            if result.is_ok() {
                result = Err(RuntimeError::new(format!("Failed to flush output: {}", error)));
            }
        }

        match &result {
            Ok(value) => debug!(result = %value, "run finished"),
            Err(error) => debug!(%error, "run failed"),
        }
        result
    }

    /// Run the dispatch loop until the call stack empties, main runs off its
    /// end, or HALT.
    fn execute<'m>(&mut self, module: &'m Module, calls: &mut CallStack<'m>) -> VMResult<Value> {
        loop {
            let Some(frame) = calls.current_mut() else {
                break;
            };
            if frame.at_end() {
                if calls.depth() == 1 {
                    break;
                }
                self.return_from_frame(calls, Value::Empty)?;
                continue;
            }
            if self.config.debug {
                self.dump_state(frame);
            }

            let offset = frame.pc;
            let byte = frame.read_byte()?;
            let op = OpCode::from_u8(byte).ok_or(RuntimeError::InvalidOpcode { byte, offset })?;
            trace!(offset, op = op.mnemonic(), stack = self.stack.len(), "dispatch");

            match op {
                OpCode::LoadConst => {
                    let index = frame.read_u16()?;
                    let value = Value::from(constant(frame.chunk, index)?);
                    self.push(value)?;
                }
                OpCode::LoadLocal => {
                    let slot = frame.read_u16()?;
                    let value = frame.local(slot)?;
                    self.push(value)?;
                }
                OpCode::StoreLocal => {
                    let slot = frame.read_u16()?;
                    let value = self.pop()?;
                    frame.set_local(slot, value)?;
                }
                OpCode::LoadGlobal => {
                    let index = frame.read_u16()?;
                    let name = name_constant(frame.chunk, index)?;
                    let value = self.load_global(name)?;
                    self.push(value)?;
                }
                OpCode::StoreGlobal => {
                    let index = frame.read_u16()?;
                    let name = name_constant(frame.chunk, index)?;
                    let value = self.pop()?;
                    self.globals.insert(name.to_string(), value);
                }

                OpCode::Pop => {
                    self.pop()?;
                }
                OpCode::Dup => {
                    let value = self.peek()?.clone();
                    self.push(value)?;
                }
                OpCode::Swap => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(b)?;
                    self.push(a)?;
                }

                OpCode::Add => self.binary_op(op_add)?,
                OpCode::Sub => self.binary_op(|a, b| {
                    arithmetic("subtract", a, b, i64::checked_sub, |x, y| x - y)
                })?,
                OpCode::Mul => self.binary_op(|a, b| {
                    arithmetic("multiply", a, b, i64::checked_mul, |x, y| x * y)
                })?,
                OpCode::Div => self.binary_op(op_divide)?,
                OpCode::Mod => self.binary_op(op_modulo)?,
                OpCode::Neg => {
                    let value = self.pop()?;
                    self.push(op_negate(value)?)?;
                }
                OpCode::Not => {
                    let value = self.pop()?;
                    self.push(Value::Bool(!value.is_truthy()))?;
                }

                OpCode::Eq => self.binary_op(|a, b| Ok(Value::Bool(a.loose_eq(b))))?,
                OpCode::Neq => self.binary_op(|a, b| Ok(Value::Bool(!a.loose_eq(b))))?,
                OpCode::StrictEq => self.binary_op(|a, b| Ok(Value::Bool(a.strict_eq(b))))?,
                OpCode::StrictNeq => self.binary_op(|a, b| Ok(Value::Bool(!a.strict_eq(b))))?,
                OpCode::Lt => self.binary_op(|a, b| op_compare(a, b, "<", Ordering::is_lt))?,
                OpCode::Gt => self.binary_op(|a, b| op_compare(a, b, ">", Ordering::is_gt))?,
                OpCode::Lte => self.binary_op(|a, b| op_compare(a, b, "<=", Ordering::is_le))?,
                OpCode::Gte => self.binary_op(|a, b| op_compare(a, b, ">=", Ordering::is_ge))?,

                // Both operands are already evaluated; no short-circuit.
                OpCode::And => {
                    self.binary_op(|a, b| Ok(Value::Bool(a.is_truthy() && b.is_truthy())))?
                }
                OpCode::Or => {
                    self.binary_op(|a, b| Ok(Value::Bool(a.is_truthy() || b.is_truthy())))?
                }

                OpCode::Jump => {
                    let jump = frame.read_i16()?;
                    frame.jump(jump)?;
                }
                OpCode::JumpIfFalse => {
                    let jump = frame.read_i16()?;
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        frame.jump(jump)?;
                    }
                }

                OpCode::Return => {
                    let value = self.pop()?;
                    self.return_from_frame(calls, value)?;
                }
                OpCode::Call => {
                    let argc = frame.read_byte()?;
                    self.call_value(module, calls, argc)?;
                }
                OpCode::LoadFunction => {
                    let index = frame.read_u16()?;
                    let name = name_constant(frame.chunk, index)?;
                    let function = self.load_function(module, name)?;
                    self.push(function)?;
                }

                OpCode::Nop => {}
                OpCode::Halt => {
                    trace!(offset, "halt");
                    return Ok(self.result());
                }
            }
        }
        Ok(self.result())
    }

    // --- Stack operations ---

    #[inline]
    pub(crate) fn push(&mut self, value: Value) -> VMResult<()> {
        if self.stack.len() >= self.config.max_stack_size {
            return Err(RuntimeError::StackOverflow {
                limit: self.config.max_stack_size,
            });
        }
        self.stack.push(value);
        Ok(())
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> VMResult<Value> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    #[inline]
    fn peek(&self) -> VMResult<&Value> {
        self.stack.last().ok_or(RuntimeError::StackUnderflow)
    }

    fn binary_op(&mut self, op: impl FnOnce(&Value, &Value) -> VMResult<Value>) -> VMResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = op(&a, &b)?;
        self.push(result)
    }

    fn result(&self) -> Value {
        self.stack.last().cloned().unwrap_or(Value::Empty)
    }

    // --- Debugging ---

    fn dump_state(&self, frame: &Frame<'_>) {
        let mut instruction = String::new();
        disassemble_instruction(frame.chunk, frame.pc, &mut instruction);
        let stack: Vec<String> = self.stack.iter().map(repr).collect();
        let locals: Vec<String> = frame.locals.iter().map(repr).collect();
        let globals: Vec<String> = self
            .globals
            .iter()
            .map(|(name, value)| format!("{}: {}", name, repr(value)))
            .collect();

        eprint!("[{}] {}", frame.chunk.name, instruction);
        eprintln!("    stack:   [{}]", stack.join(", "));
        eprintln!("    locals:  [{}]", locals.join(", "));
        eprintln!("    globals: {{{}}}", globals.join(", "));
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

fn repr(value: &Value) -> String {
    match value {
        Value::Str(s) => format!("{:?}", s),
        other => other.to_string(),
    }
}

fn constant(chunk: &Chunk, index: u16) -> VMResult<&Constant> {
    chunk.constant(index).ok_or_else(|| {
        RuntimeError::index_out_of_range("constant", index.into(), chunk.constants.len())
    })
}

/// A constant used as a global or function name; it must be text.
fn name_constant(chunk: &Chunk, index: u16) -> VMResult<&str> {
    let constant = constant(chunk, index)?;
    constant.as_str().ok_or_else(|| {
        RuntimeError::type_error(format!(
            "Name constant {} must be text, got {}",
            index,
            constant.kind_name()
        ))
    })
}

// --- Arithmetic operations ---

fn arithmetic(
    verb: &str,
    a: &Value,
    b: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> VMResult<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => int_op(*x, *y)
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::new(format!("Integer overflow in {}", verb))),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::Float(float_op(x, y))),
            _ => Err(RuntimeError::type_error(format!(
                "Cannot {} {} and {}",
                verb,
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

/// Text on either side concatenates display strings.
fn op_add(a: &Value, b: &Value) -> VMResult<Value> {
    match (a, b) {
        (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::text(&format!("{}{}", a, b))),
        _ => arithmetic("add", a, b, i64::checked_add, |x, y| x + y),
    }
}

/// Division always produces a float.
fn op_divide(a: &Value, b: &Value) -> VMResult<Value> {
    match (a.as_f64(), b.as_f64()) {
        (Some(_), Some(y)) if y == 0.0 => Err(RuntimeError::DivisionByZero("Division")),
        (Some(x), Some(y)) => Ok(Value::Float(x / y)),
        _ => Err(RuntimeError::type_error(format!(
            "Cannot divide {} by {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Floored modulo: the result takes the sign of the divisor.
fn op_modulo(a: &Value, b: &Value) -> VMResult<Value> {
    match (a, b) {
        (Value::Int(_), Value::Int(0)) => Err(RuntimeError::DivisionByZero("Modulo")),
        (Value::Int(x), Value::Int(y)) => {
            let r = x.wrapping_rem(*y);
            Ok(Value::Int(if r != 0 && (r < 0) != (*y < 0) { r + y } else { r }))
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(_), Some(y)) if y == 0.0 => Err(RuntimeError::DivisionByZero("Modulo")),
            (Some(x), Some(y)) => {
                let r = x % y;
                Ok(Value::Float(if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r }))
            }
            _ => Err(RuntimeError::type_error(format!(
                "Cannot modulo {} by {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn op_negate(value: Value) -> VMResult<Value> {
    match value {
        Value::Int(n) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::new("Integer overflow in negate")),
        Value::Float(n) => Ok(Value::Float(-n)),
        other => Err(RuntimeError::type_error(format!(
            "Cannot negate {}",
            other.type_name()
        ))),
    }
}

/// Ordering comparisons are numeric only. NaN compares false.
fn op_compare(a: &Value, b: &Value, symbol: &str, test: fn(Ordering) -> bool) -> VMResult<Value> {
    if !a.is_numeric() || !b.is_numeric() {
        return Err(RuntimeError::type_error(format!(
            "Cannot compare {} {} {}",
            a.type_name(),
            symbol,
            b.type_name()
        )));
    }
    Ok(Value::Bool(a.numeric_cmp(b).is_some_and(test)))
}
