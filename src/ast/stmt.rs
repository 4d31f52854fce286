//! Statement AST nodes.

use serde::{Deserialize, Serialize};

use crate::ast::expr::{Call, Expr};
use crate::span::Span;

/// A complete program (list of statements).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}

/// A statement in the AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    #[serde(default)]
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// `Set name to value.`
    pub fn set(name: impl Into<String>, value: Expr) -> Self {
        Self::new(
            StmtKind::Set {
                name: Some(name.into()),
                value: Some(value),
            },
            Span::default(),
        )
    }

    /// `Give back value.`
    pub fn give_back(value: Expr) -> Self {
        Self::new(StmtKind::Return { value: Some(value) }, Span::default())
    }

    pub fn expression(expr: Expr) -> Self {
        Self::new(StmtKind::Expression { expr: Some(expr) }, Span::default())
    }

    pub fn say(value: Expr) -> Self {
        Self::new(StmtKind::Say { value: Some(value) }, Span::default())
    }

    pub fn if_else(condition: Expr, consequence: Vec<Stmt>, alternative: Option<Vec<Stmt>>) -> Self {
        Self::new(
            StmtKind::If {
                condition: Some(condition),
                consequence: Some(consequence),
                alternative,
            },
            Span::default(),
        )
    }

    pub fn call(call: Call) -> Self {
        Self::new(StmtKind::Call(call), Span::default())
    }

    pub fn function(name: impl Into<String>, params: &[&str], body: Vec<Stmt>) -> Self {
        Self::new(
            StmtKind::Function(FunctionDecl {
                name: Some(name.into()),
                params: params.iter().map(|p| p.to_string()).collect(),
                body,
            }),
            Span::default(),
        )
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// A function ("utility") definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: Option<String>,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub body: Vec<Stmt>,
}

/// Statement variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StmtKind {
    /// Set x to expr.
    Set {
        name: Option<String>,
        value: Option<Expr>,
    },

    /// Give back expr.
    Return { value: Option<Expr> },

    /// Expression evaluated for its side effects.
    Expression { expr: Option<Expr> },

    /// If cond then ... else ...
    If {
        condition: Option<Expr>,
        consequence: Option<Vec<Stmt>>,
        #[serde(default)]
        alternative: Option<Vec<Stmt>>,
    },

    /// Block: statements in sequence, no new scope
    Block { statements: Vec<Stmt> },

    /// Say expr.
    Say { value: Option<Expr> },

    /// Use `f` with args.
    Call(Call),

    /// Utility definition
    Function(FunctionDecl),
}
