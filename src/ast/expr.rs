//! Expression AST nodes.

use serde::{Deserialize, Serialize};

use crate::span::Span;

/// An expression in the AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    #[serde(default)]
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn int(value: i64) -> Self {
        Self::new(ExprKind::Int { value }, Span::default())
    }

    pub fn float(value: f64) -> Self {
        Self::new(ExprKind::Float { value }, Span::default())
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::new(
            ExprKind::Str {
                value: value.into(),
            },
            Span::default(),
        )
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ExprKind::Bool { value }, Span::default())
    }

    pub fn empty() -> Self {
        Self::new(ExprKind::Empty, Span::default())
    }

    pub fn identifier(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Identifier { name: name.into() }, Span::default())
    }

    pub fn prefix(operator: impl Into<String>, right: Expr) -> Self {
        Self::new(
            ExprKind::Prefix {
                operator: operator.into(),
                right: Some(Box::new(right)),
            },
            Span::default(),
        )
    }

    pub fn infix(left: Expr, operator: impl Into<String>, right: Expr) -> Self {
        Self::new(
            ExprKind::Infix {
                left: Some(Box::new(left)),
                operator: operator.into(),
                right: Some(Box::new(right)),
            },
            Span::default(),
        )
    }

    pub fn conditional(condition: Expr, consequence: Expr, alternative: Expr) -> Self {
        Self::new(
            ExprKind::Conditional {
                condition: Some(Box::new(condition)),
                consequence: Some(Box::new(consequence)),
                alternative: Some(Box::new(alternative)),
            },
            Span::default(),
        )
    }

    pub fn call(function: impl Into<String>, positional: Vec<Expr>) -> Self {
        Self::new(
            ExprKind::Call(Call::new(function, positional)),
            Span::default(),
        )
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// A named argument in a call: `with name: value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedArgument {
    pub name: String,
    pub value: Expr,
}

/// A function invocation, used both as a statement ("Use `f` with ...") and
/// as an expression ("Set x using `f`").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub function: Option<String>,
    #[serde(default)]
    pub positional: Vec<Expr>,
    #[serde(default)]
    pub named: Vec<NamedArgument>,
}

impl Call {
    pub fn new(function: impl Into<String>, positional: Vec<Expr>) -> Self {
        Self {
            function: Some(function.into()),
            positional,
            named: Vec::new(),
        }
    }

    pub fn with_named(mut self, name: impl Into<String>, value: Expr) -> Self {
        self.named.push(NamedArgument {
            name: name.into(),
            value,
        });
        self
    }
}

/// All expression variants.
///
/// Sub-expressions are optional because trees come from external front ends
/// that may hand over incomplete nodes; the compiler reports those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExprKind {
    /// Integer literal: 42
    Int { value: i64 },
    /// Float literal: 3.14
    Float { value: f64 },
    /// Text literal: "hello"
    Str { value: String },
    /// Boolean literal: Yes / No
    Bool { value: bool },
    /// The empty value
    Empty,
    /// URL literal, treated as text
    Url { value: String },
    /// Variable reference
    Identifier { name: String },
    /// Unary operator: -x, not x
    Prefix {
        operator: String,
        right: Option<Box<Expr>>,
    },
    /// Binary operator: a + b, a is strictly equal to b
    Infix {
        left: Option<Box<Expr>>,
        operator: String,
        right: Option<Box<Expr>>,
    },
    /// Ternary: consequence if condition, else alternative
    Conditional {
        condition: Option<Box<Expr>>,
        consequence: Option<Box<Expr>>,
        alternative: Option<Box<Expr>>,
    },
    /// Call used for its value
    Call(Call),
}
