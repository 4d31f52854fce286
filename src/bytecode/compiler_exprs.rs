//! Expression compilation: syntax tree expressions to bytecode.

use crate::ast::{Expr, ExprKind};
use crate::bytecode::compiler::{CompileResult, Compiler, VariableAccess};
use crate::bytecode::constant::Constant;
use crate::bytecode::instruction::OpCode;
use crate::error::CompileError;

/// Canonical opcode for a binary operator spelling.
pub fn binary_opcode(operator: &str) -> Option<OpCode> {
    let op = match operator.trim().to_ascii_lowercase().as_str() {
        "+" => OpCode::Add,
        "-" => OpCode::Sub,
        "*" => OpCode::Mul,
        "/" => OpCode::Div,
        "%" => OpCode::Mod,
        "<" => OpCode::Lt,
        ">" => OpCode::Gt,
        "<=" => OpCode::Lte,
        ">=" => OpCode::Gte,
        "==" | "equals" | "is equal to" => OpCode::Eq,
        "!=" | "is not" | "is not equal to" => OpCode::Neq,
        "===" | "is strictly equal to" => OpCode::StrictEq,
        "!==" | "is not strictly equal to" => OpCode::StrictNeq,
        "and" => OpCode::And,
        "or" => OpCode::Or,
        _ => return None,
    };
    Some(op)
}

/// Canonical opcode for a prefix operator spelling.
pub fn prefix_opcode(operator: &str) -> Option<OpCode> {
    match operator.trim().to_ascii_lowercase().as_str() {
        "-" => Some(OpCode::Neg),
        "not" => Some(OpCode::Not),
        _ => None,
    }
}

/// Strip one pair of matching surrounding quotes.
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

impl Compiler {
    /// Compile an expression, leaving exactly one value on the stack.
    pub fn compile_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        // Line 0 means the front end did not record a position.
        if expr.span.line > 0 {
            let previous = self.set_span(expr.span);
            let result = self.compile_expr_kind(expr);
            self.set_span(previous);
            result
        } else {
            self.compile_expr_kind(expr)
        }
    }

    fn compile_expr_kind(&mut self, expr: &Expr) -> CompileResult<()> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Int { value } => self.emit_constant(Constant::Int(*value)).map(drop),
            ExprKind::Float { value } => self.emit_constant(Constant::Float(*value)).map(drop),
            ExprKind::Str { value } | ExprKind::Url { value } => self
                .emit_constant(Constant::Str(unquote(value).to_string()))
                .map(drop),
            ExprKind::Bool { value } => self.emit_constant(Constant::Bool(*value)).map(drop),
            ExprKind::Empty => self.emit_constant(Constant::Empty).map(drop),
            ExprKind::Identifier { name } => {
                match self.resolve(name) {
                    VariableAccess::Local(slot) => {
                        self.emit_u16(OpCode::LoadLocal, slot);
                    }
                    VariableAccess::Global => {
                        let index = self.name_constant(name)?;
                        self.emit_u16(OpCode::LoadGlobal, index);
                    }
                }
                Ok(())
            }
            ExprKind::Prefix { operator, right } => {
                let right = right
                    .as_deref()
                    .ok_or_else(|| CompileError::new("Prefix expression has no operand", span))?;
                self.compile_expr(right)?;
                let op = prefix_opcode(operator).ok_or_else(|| {
                    CompileError::new(format!("Unknown prefix operator '{}'", operator), span)
                })?;
                self.emit_op(op);
                Ok(())
            }
            ExprKind::Infix {
                left,
                operator,
                right,
            } => {
                let left = left
                    .as_deref()
                    .ok_or_else(|| CompileError::new("Infix expression has no left operand", span))?;
                let right = right
                    .as_deref()
                    .ok_or_else(|| CompileError::new("Infix expression has no right operand", span))?;
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                let op = binary_opcode(operator).ok_or_else(|| {
                    CompileError::new(format!("Unknown infix operator '{}'", operator), span)
                })?;
                self.emit_op(op);
                Ok(())
            }
            ExprKind::Conditional {
                condition,
                consequence,
                alternative,
            } => {
                let missing = |part: &str| {
                    CompileError::new(format!("Conditional expression has no {}", part), span)
                };
                let condition = condition.as_deref().ok_or_else(|| missing("condition"))?;
                let consequence = consequence.as_deref().ok_or_else(|| missing("consequence"))?;
                let alternative = alternative.as_deref().ok_or_else(|| missing("alternative"))?;

                self.compile_expr(condition)?;
                let else_jump = self.emit_jump(OpCode::JumpIfFalse);
                self.compile_expr(consequence)?;
                let end_jump = self.emit_jump(OpCode::Jump);
                self.patch_jump(else_jump)?;
                self.compile_expr(alternative)?;
                // Only one of the two arms runs.
                self.adjust_depth(-1);
                self.patch_jump(end_jump)
            }
            ExprKind::Call(call) => self.compile_call(call, span),
        }
    }
}
