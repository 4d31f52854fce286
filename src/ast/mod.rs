//! Syntax tree consumed by the bytecode compiler.
//!
//! Trees are produced by an external front end (lexer, parser and semantic
//! analysis) and can be built programmatically or loaded from JSON.

pub mod expr;
pub mod stmt;

pub use expr::{Call, Expr, ExprKind, NamedArgument};
pub use stmt::{FunctionDecl, Program, Stmt, StmtKind};
