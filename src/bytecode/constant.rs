//! Compile-time constants and the per-chunk constant pool.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Highest number of entries a pool can hold (indices are u16).
pub const MAX_CONSTANTS: usize = u16::MAX as usize + 1;

/// A literal value stored in a chunk's constant pool.
///
/// Equality is by kind and value; floats compare by bit pattern so that NaN
/// constants deduplicate and survive round trips.
#[derive(Debug, Clone)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Empty,
}

impl Constant {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Constant::Int(_) => "integer",
            Constant::Float(_) => "float",
            Constant::Str(_) => "text",
            Constant::Bool(_) => "boolean",
            Constant::Empty => "empty",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Str(a), Constant::Str(b)) => a == b,
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::Empty, Constant::Empty) => true,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Int(n) => n.hash(state),
            Constant::Float(n) => n.to_bits().hash(state),
            Constant::Str(s) => s.hash(state),
            Constant::Bool(b) => b.hash(state),
            Constant::Empty => {}
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(n) => write!(f, "{}", n),
            Constant::Float(n) => write!(f, "{}", crate::vm::value::format_float(*n)),
            Constant::Str(s) => write!(f, "{:?}", s),
            Constant::Bool(b) => write!(f, "{}", if *b { "Yes" } else { "No" }),
            Constant::Empty => write!(f, "empty"),
        }
    }
}

impl From<i64> for Constant {
    fn from(n: i64) -> Self {
        Constant::Int(n)
    }
}

impl From<f64> for Constant {
    fn from(n: f64) -> Self {
        Constant::Float(n)
    }
}

impl From<&str> for Constant {
    fn from(s: &str) -> Self {
        Constant::Str(s.to_string())
    }
}

impl From<bool> for Constant {
    fn from(b: bool) -> Self {
        Constant::Bool(b)
    }
}

/// Deduplicating table of constants referenced by u16 index.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    index: HashMap<Constant, u16>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constant, returning the index of an equal existing entry if
    /// there is one. Returns `None` once the pool is full.
    pub fn add(&mut self, constant: Constant) -> Option<u16> {
        if let Some(&idx) = self.index.get(&constant) {
            return Some(idx);
        }
        self.push(constant)
    }

    /// Append a constant without deduplication.
    ///
    /// Used when reloading a serialized pool, where the stored indices must
    /// be preserved exactly.
    pub fn push(&mut self, constant: Constant) -> Option<u16> {
        if self.constants.len() >= MAX_CONSTANTS {
            return None;
        }
        let idx = self.constants.len() as u16;
        self.index.entry(constant.clone()).or_insert(idx);
        self.constants.push(constant);
        Some(idx)
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.constants.iter()
    }

    pub fn as_slice(&self) -> &[Constant] {
        &self.constants
    }
}

impl PartialEq for ConstantPool {
    fn eq(&self, other: &Self) -> bool {
        self.constants == other.constants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_pool_dedup() {
        let mut pool = ConstantPool::new();
        let a = pool.add(Constant::Int(42));
        let b = pool.add(Constant::Int(42));
        let c = pool.add(Constant::from("hello"));
        assert_eq!(a, Some(0));
        assert_eq!(b, Some(0));
        assert_eq!(c, Some(1));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_int_and_float_get_distinct_slots() {
        let mut pool = ConstantPool::new();
        let int = pool.add(Constant::Int(1));
        let float = pool.add(Constant::Float(1.0));
        let boolean = pool.add(Constant::Bool(true));
        assert_ne!(int, float);
        assert_ne!(int, boolean);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_nan_deduplicates() {
        let mut pool = ConstantPool::new();
        let a = pool.add(Constant::Float(f64::NAN));
        let b = pool.add(Constant::Float(f64::NAN));
        assert_eq!(a, b);
        assert_eq!(pool.get(0), Some(&Constant::Float(f64::NAN)));
    }

    #[test]
    fn test_pool_limit() {
        let mut pool = ConstantPool::new();
        for i in 0..MAX_CONSTANTS {
            assert!(pool.add(Constant::Int(i as i64)).is_some());
        }
        assert_eq!(pool.add(Constant::Int(-1)), None);
        // Existing entries are still found.
        assert_eq!(pool.add(Constant::Int(7)), Some(7));
    }
}
