//! Statement compilation: syntax tree statements to bytecode.

use crate::ast::{Call, Expr, Stmt, StmtKind};
use crate::bytecode::compiler::{CompileResult, Compiler, VariableAccess};
use crate::bytecode::constant::Constant;
use crate::bytecode::instruction::OpCode;
use crate::error::CompileError;
use crate::span::Span;

impl Compiler {
    /// Compile a statement.
    pub fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        let previous = self.set_span(stmt.span);
        let result = self.compile_stmt_kind(&stmt.kind, stmt.span);
        self.set_span(previous);
        result
    }

    fn compile_stmt_kind(&mut self, kind: &StmtKind, span: Span) -> CompileResult<()> {
        match kind {
            StmtKind::Set { name, value } => {
                let name = name
                    .as_deref()
                    .ok_or_else(|| CompileError::new("Set statement has no name", span))?;
                let value = value
                    .as_ref()
                    .ok_or_else(|| CompileError::new("Set statement has no value", span))?;
                self.compile_set(name, value)
            }
            StmtKind::Return { value } => {
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => {
                        self.emit_constant(Constant::Empty)?;
                    }
                }
                self.emit_op(OpCode::Return);
                Ok(())
            }
            StmtKind::Expression { expr } => {
                let expr = expr
                    .as_ref()
                    .ok_or_else(|| CompileError::new("Expression statement has no expression", span))?;
                self.compile_expr(expr)?;
                self.emit_op(OpCode::Pop);
                Ok(())
            }
            StmtKind::If {
                condition,
                consequence,
                alternative,
            } => {
                let condition = condition
                    .as_ref()
                    .ok_or_else(|| CompileError::new("If statement has no condition", span))?;
                let consequence = consequence
                    .as_deref()
                    .ok_or_else(|| CompileError::new("If statement has no consequence", span))?;
                self.compile_if(condition, consequence, alternative.as_deref())
            }
            StmtKind::Block { statements } => {
                self.compile_block(statements);
                Ok(())
            }
            StmtKind::Say { value } => {
                let value = value
                    .as_ref()
                    .ok_or_else(|| CompileError::new("Say statement has no expression", span))?;
                self.compile_say(value)
            }
            StmtKind::Call(call) => {
                let keep = std::mem::take(&mut self.keep_call_result);
                self.compile_call(call, span)?;
                if !keep {
                    self.emit_op(OpCode::Pop);
                }
                Ok(())
            }
            StmtKind::Function(decl) => {
                let name = decl
                    .name
                    .as_deref()
                    .ok_or_else(|| CompileError::new("Function definition has no name", span))?;
                self.compile_function(name, &decl.params, &decl.body, span)
            }
        }
    }

    fn compile_set(&mut self, name: &str, value: &Expr) -> CompileResult<()> {
        self.compile_expr(value)?;
        match self.resolve_for_store(name)? {
            VariableAccess::Local(slot) => {
                self.emit_u16(OpCode::StoreLocal, slot);
            }
            VariableAccess::Global => {
                let index = self.name_constant(name)?;
                self.emit_u16(OpCode::StoreGlobal, index);
            }
        }
        Ok(())
    }

    /// condition, JUMP_IF_FALSE else, consequence, [JUMP end, else: alternative], end:
    fn compile_if(
        &mut self,
        condition: &Expr,
        consequence: &[Stmt],
        alternative: Option<&[Stmt]>,
    ) -> CompileResult<()> {
        self.compile_expr(condition)?;
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);

        self.compile_block(consequence);

        match alternative {
            Some(alternative) => {
                let end_jump = self.emit_jump(OpCode::Jump);
                self.patch_jump(else_jump)?;
                self.compile_block(alternative);
                self.patch_jump(end_jump)
            }
            None => self.patch_jump(else_jump),
        }
    }

    /// `Say x.` calls the `say` native and discards its result.
    fn compile_say(&mut self, value: &Expr) -> CompileResult<()> {
        let index = self.name_constant("say")?;
        self.emit_u16(OpCode::LoadGlobal, index);
        self.compile_expr(value)?;
        self.emit_call(1);
        self.emit_op(OpCode::Pop);
        Ok(())
    }

    /// Load the function, push its arguments, then CALL. Named arguments are
    /// placed in the callee's declared parameter order when it is known.
    pub(crate) fn compile_call(&mut self, call: &Call, span: Span) -> CompileResult<()> {
        let function = call
            .function
            .as_deref()
            .ok_or_else(|| CompileError::new("Call has no function name", span))?;

        let index = self.name_constant(function)?;
        self.emit_u16(OpCode::LoadFunction, index);

        let mut argc = 0usize;
        for arg in &call.positional {
            self.compile_expr(arg)?;
            argc += 1;
        }

        if !call.named.is_empty() {
            match self.known_params(function).map(|p| p.to_vec()) {
                Some(params) => {
                    let mut remaining: Vec<_> = call.named.iter().collect();
                    for param in params.iter().skip(call.positional.len()) {
                        if let Some(pos) = remaining.iter().position(|arg| &arg.name == param) {
                            let arg = remaining.remove(pos);
                            self.compile_expr(&arg.value)?;
                            argc += 1;
                        }
                    }
                    for unused in remaining {
                        self.record_error(CompileError::new(
                            format!("Unknown parameter '{}' for '{}'", unused.name, function),
                            span,
                        ));
                    }
                }
                None => {
                    for arg in &call.named {
                        self.compile_expr(&arg.value)?;
                        argc += 1;
                    }
                }
            }
        }

        let argc = u8::try_from(argc).map_err(|_| {
            CompileError::limit_exceeded("arguments", function, argc, u8::MAX as usize, span)
        })?;
        self.emit_call(argc);
        Ok(())
    }
}
