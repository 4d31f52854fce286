//! Native-function registry.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::vm::value::{Arity, NativeFunction, Value};

/// Name-keyed table of host functions visible to bytecode.
#[derive(Debug, Default)]
pub struct Natives {
    functions: HashMap<String, Rc<NativeFunction>>,
}

impl Natives {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the standard natives.
    pub fn standard() -> Self {
        let mut natives = Self::new();
        natives.register(NativeFunction::new("print", Arity::Variadic, native_print));
        natives.register(NativeFunction::new("say", Arity::Variadic, native_print));
        natives.register(NativeFunction::new("type", Arity::Fixed(1), |args, _| {
            Ok(Value::text(args[0].type_name()))
        }));
        natives.register(NativeFunction::new("len", Arity::Fixed(1), native_len));
        natives.register(NativeFunction::new("str", Arity::Fixed(1), |args, _| {
            Ok(Value::text(&args[0].to_string()))
        }));
        natives.register(NativeFunction::new("int", Arity::Fixed(1), native_int));
        natives.register(NativeFunction::new("float", Arity::Fixed(1), native_float));
        natives.register(NativeFunction::new("abs", Arity::Fixed(1), native_abs));
        natives.register(NativeFunction::new("min", Arity::Variadic, |args, _| {
            extremum("min", args, Ordering::Less)
        }));
        natives.register(NativeFunction::new("max", Arity::Variadic, |args, _| {
            extremum("max", args, Ordering::Greater)
        }));
        natives
    }

    /// Add or replace a native.
    pub fn register(&mut self, native: NativeFunction) {
        self.functions.insert(native.name.clone(), Rc::new(native));
    }

    pub fn get(&self, name: &str) -> Option<&Rc<NativeFunction>> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

fn native_print(args: &[Value], out: &mut dyn Write) -> Result<Value, RuntimeError> {
    let line = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(out, "{}", line).map_err(|e| RuntimeError::new(format!("Output error: {}", e)))?;
    Ok(Value::Empty)
}

fn native_len(args: &[Value], _: &mut dyn Write) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        other => Err(RuntimeError::type_error(format!(
            "Cannot get length of {}",
            other.type_name()
        ))),
    }
}

fn native_int(args: &[Value], _: &mut dyn Write) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(n) => {
            let truncated = n.trunc();
            if truncated.is_finite() && truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
                Ok(Value::Int(truncated as i64))
            } else {
                Err(RuntimeError::new(format!(
                    "Cannot convert {} to integer",
                    args[0]
                )))
            }
        }
        Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            RuntimeError::new(format!("Invalid integer conversion: '{}'", s))
        }),
        other => Err(RuntimeError::type_error(format!(
            "Cannot convert {} to integer",
            other.type_name()
        ))),
    }
}

fn native_float(args: &[Value], _: &mut dyn Write) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(n) => Ok(Value::Float(*n)),
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            RuntimeError::new(format!("Invalid float conversion: '{}'", s))
        }),
        other => Err(RuntimeError::type_error(format!(
            "Cannot convert {} to float",
            other.type_name()
        ))),
    }
}

fn native_abs(args: &[Value], _: &mut dyn Write) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Int(n) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::new("Integer overflow in abs")),
        Value::Float(n) => Ok(Value::Float(n.abs())),
        other => Err(RuntimeError::type_error(format!(
            "Cannot get absolute value of {}",
            other.type_name()
        ))),
    }
}

/// Smallest (`Less`) or largest (`Greater`) argument. Numbers compare with
/// numbers, text with text; the winning argument is returned unchanged.
fn extremum(name: &str, args: &[Value], wanted: Ordering) -> Result<Value, RuntimeError> {
    let Some(first) = args.first() else {
        return Err(RuntimeError::new(format!(
            "{}() requires at least one argument",
            name
        )));
    };
    if !first.is_numeric() && !matches!(first, Value::Str(_)) {
        return Err(RuntimeError::type_error(format!(
            "Cannot compare {} in {}()",
            first.type_name(),
            name
        )));
    }

    let mut best = first;
    for candidate in &args[1..] {
        let ordering = match (candidate, best) {
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.numeric_cmp(b).unwrap_or(Ordering::Equal)
            }
            _ => {
                return Err(RuntimeError::type_error(format!(
                    "Cannot compare {} and {} in {}()",
                    candidate.type_name(),
                    best.type_name(),
                    name
                )))
            }
        };
        if ordering == wanted {
            best = candidate;
        }
    }
    Ok(best.clone())
}
