//! Error types for compilation, serialization and execution.
//!
//! The three phases keep separate taxonomies; `DialectError` only exists so
//! the facade and the CLI can use `?` across phases.

use std::fmt;

use thiserror::Error;

use crate::span::Span;

/// Bytecode compilation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("{message} at {span}")]
    General { message: String, span: Span },

    #[error("Too many constants in chunk '{chunk}' (limit 65536) at {span}")]
    TooManyConstants { chunk: String, span: Span },

    #[error("Jump distance {distance} does not fit in 16 bits at {span}")]
    JumpTooFar { distance: i64, span: Span },

    #[error("Too many {what} in '{chunk}': {count} (limit {limit}) at {span}")]
    LimitExceeded {
        what: &'static str,
        chunk: String,
        count: usize,
        limit: usize,
        span: Span,
    },
}

impl CompileError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn too_many_constants(chunk: impl Into<String>, span: Span) -> Self {
        Self::TooManyConstants {
            chunk: chunk.into(),
            span,
        }
    }

    pub fn jump_too_far(distance: i64, span: Span) -> Self {
        Self::JumpTooFar { distance, span }
    }

    pub fn limit_exceeded(
        what: &'static str,
        chunk: impl Into<String>,
        count: usize,
        limit: usize,
        span: Span,
    ) -> Self {
        Self::LimitExceeded {
            what,
            chunk: chunk.into(),
            count,
            limit,
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::General { span, .. } => *span,
            Self::TooManyConstants { span, .. } => *span,
            Self::JumpTooFar { span, .. } => *span,
            Self::LimitExceeded { span, .. } => *span,
        }
    }
}

/// Every error recorded while compiling one program.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    pub fn errors(&self) -> &[CompileError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} compile error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}

impl From<CompileError> for CompileErrors {
    fn from(error: CompileError) -> Self {
        Self(vec![error])
    }
}

/// Binary module format errors.
///
/// `InvalidMagic` is kept apart from every other structural problem: it means
/// the input is not a module file at all.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Invalid magic number: expected 0x{expected:08X}, got 0x{found:08X}")]
    InvalidMagic { expected: u32, found: u32 },

    #[error("Unexpected end of input reading {what} at byte {offset}: needed {needed} byte(s), {available} available")]
    Truncated {
        what: String,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unsupported format version {found:#06x} (expected {expected:#06x}) at byte {offset}")]
    UnsupportedVersion {
        expected: u16,
        found: u16,
        offset: usize,
    },

    #[error("Unknown constant tag 0x{tag:02X} at byte {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("{message} at byte {offset}")]
    Malformed { message: String, offset: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SerializationError {
    pub fn truncated(what: impl Into<String>, offset: usize, needed: usize, available: usize) -> Self {
        Self::Truncated {
            what: what.into(),
            offset,
            needed,
            available,
        }
    }

    pub fn malformed(message: impl Into<String>, offset: usize) -> Self {
        Self::Malformed {
            message: message.into(),
            offset,
        }
    }

    pub fn is_invalid_magic(&self) -> bool {
        matches!(self, Self::InvalidMagic { .. })
    }
}

/// Runtime errors. All of them abort the current run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("Stack underflow")]
    StackUnderflow,

    #[error("Stack overflow: more than {limit} values")]
    StackOverflow { limit: usize },

    #[error("Invalid opcode 0x{byte:02X} at offset {offset}")]
    InvalidOpcode { byte: u8, offset: usize },

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("{0} by zero")]
    DivisionByZero(&'static str),

    #[error("{what} index {index} out of range (length {length})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        length: usize,
    },

    #[error("Undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("Undefined function '{0}'")]
    UndefinedFunction(String),

    #[error("Cannot call {0}")]
    NotCallable(String),

    #[error("Function '{name}' expects {expected} argument(s), got {got}")]
    WrongArity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Maximum call depth {0} exceeded")]
    CallDepthExceeded(usize),

    #[error("{0}")]
    General(String),
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::General(message.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError(message.into())
    }

    pub fn index_out_of_range(what: &'static str, index: usize, length: usize) -> Self {
        Self::IndexOutOfRange {
            what,
            index,
            length,
        }
    }

    pub fn wrong_arity(name: impl Into<String>, expected: usize, got: usize) -> Self {
        Self::WrongArity {
            name: name.into(),
            expected,
            got,
        }
    }
}

/// A unified error type for all phases.
#[derive(Debug, Error)]
pub enum DialectError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileErrors),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Syntax tree error: {0}")]
    Tree(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
