//! Bytecode compiler: lowers a syntax tree into a `Module`.
//!
//! Statement and expression lowering live in `compiler_stmts` and
//! `compiler_exprs`; this file holds the driver, per-function state, name
//! resolution and the emit/patch helpers they share.

use indexmap::IndexMap;
use tracing::debug;

use crate::ast::{Program, Stmt, StmtKind};
use crate::bytecode::chunk::{Chunk, ChunkType, Module};
use crate::bytecode::constant::Constant;
use crate::bytecode::instruction::OpCode;
use crate::error::{CompileError, CompileErrors};
use crate::span::Span;

/// Result type for compilation of a single node.
pub type CompileResult<T> = Result<T, CompileError>;

/// The bytecode compiler.
pub struct Compiler {
    /// Function currently being compiled
    current: FunctionCompiler,
    /// Function chunks finished so far
    functions: IndexMap<String, Chunk>,
    /// Errors recorded so far
    errors: Vec<CompileError>,
    /// Set while lowering the final top-level statement when it is a call,
    /// whose value becomes the program result.
    pub(crate) keep_call_result: bool,
}

/// Context for compiling a single chunk.
pub(crate) struct FunctionCompiler {
    pub(crate) chunk: Chunk,
    /// Local slot names, index = slot
    locals: Vec<String>,
    /// Position of the node being lowered, stamped onto emitted instructions
    pub(crate) span: Span,
    /// Static operand stack depth
    depth: i32,
    max_depth: i32,
    last_op: Option<OpCode>,
    /// Most recent jump target, to tell whether the end of the chunk is reachable
    last_jump_target: Option<usize>,
}

impl FunctionCompiler {
    fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            locals: Vec::new(),
            span: Span::default(),
            depth: 0,
            max_depth: 0,
            last_op: None,
            last_jump_target: None,
        }
    }

    fn is_main(&self) -> bool {
        self.chunk.chunk_type == ChunkType::Main
    }
}

/// Where a name lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VariableAccess {
    Local(u16),
    Global,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            current: FunctionCompiler::new(Chunk::new("main", ChunkType::Main)),
            functions: IndexMap::new(),
            errors: Vec::new(),
            keep_call_result: false,
        }
    }

    /// Compile a whole program. Every locally recoverable error is collected;
    /// no module is produced if any were recorded.
    pub fn compile(mut self, program: &Program, module_name: &str) -> Result<Module, CompileErrors> {
        if let Some((last, rest)) = program.statements.split_last() {
            self.compile_block(rest);
            self.keep_call_result = matches!(last.kind, StmtKind::Call(_));
            self.compile_block(std::slice::from_ref(last));
        }

        let main = self.finish_chunk();
        if !self.errors.is_empty() {
            debug!(module = module_name, errors = self.errors.len(), "compilation failed");
            return Err(CompileErrors(self.errors));
        }

        let mut module = Module::new(module_name, main);
        module.functions = self.functions;
        module.set_metadata(
            "compiler",
            format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        );
        module.set_metadata("source", module_name);
        debug!(
            module = module_name,
            functions = module.functions.len(),
            bytes = module.total_size(),
            "compiled module"
        );
        Ok(module)
    }

    /// Compile statements in order, recording errors and moving on to the
    /// next statement when one fails.
    pub(crate) fn compile_block(&mut self, statements: &[Stmt]) {
        for stmt in statements {
            if let Err(e) = self.compile_stmt(stmt) {
                self.errors.push(e);
            }
        }
    }

    pub(crate) fn record_error(&mut self, error: CompileError) {
        self.errors.push(error);
    }

    /// Compile a function body into its own chunk and register it.
    pub(crate) fn compile_function(
        &mut self,
        name: &str,
        params: &[String],
        body: &[Stmt],
        span: Span,
    ) -> CompileResult<()> {
        let num_params = u8::try_from(params.len()).map_err(|_| {
            CompileError::limit_exceeded("parameters", name, params.len(), u8::MAX as usize, span)
        })?;

        let mut chunk = Chunk::new(name, ChunkType::Function);
        chunk.num_params = num_params;
        chunk.param_names = params.to_vec();

        let enclosing = std::mem::replace(&mut self.current, FunctionCompiler::new(chunk));
        self.current.span = span;
        let result = self.compile_function_body(params, body);

        let function = std::mem::replace(&mut self.current, enclosing);
        result?;
        let chunk = Self::finish(function);
        self.functions.insert(name.to_string(), chunk);
        Ok(())
    }

    fn compile_function_body(&mut self, params: &[String], body: &[Stmt]) -> CompileResult<()> {
        for param in params {
            self.declare_local(param)?;
        }

        self.compile_block(body);

        let end = self.current.chunk.current_offset();
        let ends_in_return = self.current.last_op == Some(OpCode::Return)
            && self.current.last_jump_target != Some(end);
        if !ends_in_return {
            self.emit_constant(Constant::Empty)?;
            self.emit_op(OpCode::Return);
        }
        Ok(())
    }

    /// Parameter names of a function compiled so far (or being compiled).
    pub(crate) fn known_params(&self, name: &str) -> Option<&[String]> {
        if !self.current.is_main() && self.current.chunk.name == name {
            return Some(&self.current.chunk.param_names);
        }
        self.functions.get(name).map(|c| c.param_names.as_slice())
    }

    fn finish_chunk(&mut self) -> Chunk {
        let placeholder = FunctionCompiler::new(Chunk::new("main", ChunkType::Main));
        let main = std::mem::replace(&mut self.current, placeholder);
        Self::finish(main)
    }

    fn finish(function: FunctionCompiler) -> Chunk {
        let mut chunk = function.chunk;
        chunk.num_locals = function.locals.len() as u16;
        debug!(
            chunk = %chunk.name,
            kind = chunk.chunk_type.name(),
            bytes = chunk.code.len(),
            constants = chunk.constants.len(),
            locals = chunk.num_locals,
            max_stack_depth = function.max_depth,
            "compiled chunk"
        );
        chunk
    }

    // ============ Name resolution ============

    /// Resolve a name read. Anything not local is a global; the VM decides
    /// whether it exists.
    pub(crate) fn resolve(&self, name: &str) -> VariableAccess {
        match self.current.locals.iter().position(|local| local == name) {
            Some(slot) => VariableAccess::Local(slot as u16),
            None => VariableAccess::Global,
        }
    }

    /// Resolve an assignment target. Top-level assignments define globals,
    /// assignments inside a function define locals.
    pub(crate) fn resolve_for_store(&mut self, name: &str) -> CompileResult<VariableAccess> {
        match self.resolve(name) {
            VariableAccess::Local(slot) => Ok(VariableAccess::Local(slot)),
            VariableAccess::Global if self.current.is_main() => Ok(VariableAccess::Global),
            VariableAccess::Global => self.declare_local(name).map(VariableAccess::Local),
        }
    }

    fn declare_local(&mut self, name: &str) -> CompileResult<u16> {
        let slot = self.current.locals.len();
        if slot >= u16::MAX as usize {
            return Err(CompileError::limit_exceeded(
                "locals",
                self.current.chunk.name.clone(),
                slot + 1,
                u16::MAX as usize,
                self.current.span,
            ));
        }
        self.current.locals.push(name.to_string());
        Ok(slot as u16)
    }

    // ============ Emission ============

    pub(crate) fn set_span(&mut self, span: Span) -> Span {
        std::mem::replace(&mut self.current.span, span)
    }

    pub(crate) fn emit_op(&mut self, op: OpCode) -> usize {
        let span = self.current.span;
        let pos = self.current.chunk.write_op(op);
        self.current.chunk.record_position(pos, span);
        self.current.last_op = Some(op);
        self.adjust_depth(op.stack_effect() as i32);
        pos
    }

    pub(crate) fn emit_u16(&mut self, op: OpCode, operand: u16) -> usize {
        let pos = self.emit_op(op);
        self.current.chunk.write_u16(operand);
        pos
    }

    pub(crate) fn emit_call(&mut self, argc: u8) -> usize {
        let pos = self.emit_op(OpCode::Call);
        self.current.chunk.write_byte(argc);
        // Arguments and callee are replaced by one result.
        self.adjust_depth(-(argc as i32));
        pos
    }

    /// Emit a jump with a placeholder offset and return the offset field's
    /// position for `patch_jump`.
    pub(crate) fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.current.chunk.write_i16(0)
    }

    /// Point a previously emitted jump at the current offset.
    pub(crate) fn patch_jump(&mut self, field_pos: usize) -> CompileResult<()> {
        let target = self.current.chunk.current_offset();
        let span = self.current.span;
        self.current.last_jump_target = Some(target);
        self.current.chunk.patch_jump(field_pos, target, span)
    }

    pub(crate) fn emit_constant(&mut self, constant: Constant) -> CompileResult<usize> {
        let index = self.add_constant(constant)?;
        Ok(self.emit_u16(OpCode::LoadConst, index))
    }

    pub(crate) fn add_constant(&mut self, constant: Constant) -> CompileResult<u16> {
        let span = self.current.span;
        self.current
            .chunk
            .add_constant(constant)
            .ok_or_else(|| CompileError::too_many_constants(self.current.chunk.name.clone(), span))
    }

    pub(crate) fn name_constant(&mut self, name: &str) -> CompileResult<u16> {
        self.add_constant(Constant::Str(name.to_string()))
    }

    /// Static depth bookkeeping for the code between two branch arms.
    pub(crate) fn adjust_depth(&mut self, delta: i32) {
        self.current.depth += delta;
        self.current.max_depth = self.current.max_depth.max(self.current.depth);
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile a program into a module named `module_name`.
pub fn compile(program: &Program, module_name: &str) -> Result<Module, CompileErrors> {
    Compiler::new().compile(program, module_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Call, Expr, Stmt, StmtKind};
    use pretty_assertions::assert_eq;

    fn op(op: OpCode) -> u8 {
        op as u8
    }

    fn compile_main(statements: Vec<Stmt>) -> Module {
        compile(&Program::new(statements), "test").unwrap()
    }

    /// Absolute target of the jump whose opcode is at `at`.
    fn jump_target(chunk: &Chunk, at: usize) -> usize {
        let offset = chunk.read_i16(at + 1).unwrap();
        (at as i64 + 3 + offset as i64) as usize
    }

    #[test]
    fn test_literal_and_store_global() {
        let module = compile_main(vec![Stmt::set("x", Expr::int(42))]);
        assert_eq!(
            module.main.code,
            vec![op(OpCode::LoadConst), 0, 0, op(OpCode::StoreGlobal), 1, 0]
        );
        assert_eq!(module.main.constant(0), Some(&Constant::Int(42)));
        assert_eq!(module.main.constant(1), Some(&Constant::from("x")));
        assert_eq!(module.main.num_locals, 0);
    }

    #[test]
    fn test_precedence_is_tree_order() {
        // 2 + 3 * 4 arrives as Infix(2, +, Infix(3, *, 4)).
        let expr = Expr::infix(
            Expr::int(2),
            "+",
            Expr::infix(Expr::int(3), "*", Expr::int(4)),
        );
        let module = compile_main(vec![Stmt::give_back(expr)]);
        assert_eq!(
            module.main.code,
            vec![
                op(OpCode::LoadConst), 0, 0,
                op(OpCode::LoadConst), 1, 0,
                op(OpCode::LoadConst), 2, 0,
                op(OpCode::Mul),
                op(OpCode::Add),
                op(OpCode::Return),
            ]
        );
    }

    #[test]
    fn test_natural_language_operators_normalize() {
        let strict = compile_main(vec![Stmt::expression(Expr::infix(
            Expr::int(5),
            "is strictly equal to",
            Expr::float(5.0),
        ))]);
        assert_eq!(strict.main.code[6], op(OpCode::StrictEq));

        let not_strict = compile_main(vec![Stmt::expression(Expr::infix(
            Expr::int(5),
            "is not strictly equal to",
            Expr::int(5),
        ))]);
        // Both operands share one pool slot.
        assert_eq!(not_strict.main.code[6], op(OpCode::StrictNeq));
        assert_eq!(not_strict.main.constants.len(), 1);

        let loose = compile_main(vec![Stmt::expression(Expr::infix(
            Expr::int(1),
            "equals",
            Expr::int(2),
        ))]);
        assert_eq!(loose.main.code[6], op(OpCode::Eq));
    }

    #[test]
    fn test_if_else_jump_targets() {
        let stmt = Stmt::if_else(
            Expr::boolean(true),
            vec![Stmt::set("a", Expr::int(1))],
            Some(vec![Stmt::set("b", Expr::int(2)), Stmt::set("c", Expr::int(3))]),
        );
        let module = compile_main(vec![stmt]);
        let code = &module.main;

        // cond(3) JIF(3) A(6) JUMP(3) B(12)
        assert_eq!(code.read_byte(3), Some(op(OpCode::JumpIfFalse)));
        assert_eq!(code.read_byte(12), Some(op(OpCode::Jump)));
        assert_eq!(jump_target(code, 3), 15);
        assert_eq!(jump_target(code, 12), code.len());
        assert_eq!(code.len(), 27);
    }

    #[test]
    fn test_if_without_else_has_no_jump() {
        let stmt = Stmt::if_else(
            Expr::boolean(false),
            vec![Stmt::set("a", Expr::int(1))],
            None,
        );
        let module = compile_main(vec![stmt]);
        let code = &module.main;
        assert_eq!(code.len(), 12);
        assert_eq!(jump_target(code, 3), 12);
        assert!(!code.code.contains(&op(OpCode::Jump)));
    }

    #[test]
    fn test_nested_if_jump_targets() {
        let inner = Stmt::if_else(
            Expr::identifier("y"),
            vec![Stmt::set("a", Expr::int(1))],
            Some(vec![Stmt::set("a", Expr::int(2))]),
        );
        let outer = Stmt::if_else(
            Expr::identifier("x"),
            vec![inner],
            Some(vec![Stmt::set("a", Expr::int(3))]),
        );
        let module = compile_main(vec![outer]);
        let code = &module.main;

        // x(3) JIF@3 [y(3) JIF@9 a=1(6) JUMP@18 a=2(6)] JUMP@27 a=3(6)
        assert_eq!(jump_target(code, 3), 30);
        assert_eq!(jump_target(code, 9), 21);
        assert_eq!(jump_target(code, 18), 27);
        assert_eq!(jump_target(code, 27), 36);
        assert_eq!(code.len(), 36);
    }

    #[test]
    fn test_bare_return() {
        let module = compile_main(vec![Stmt::new(StmtKind::Return { value: None }, Span::default())]);
        assert_eq!(module.main.code, vec![op(OpCode::LoadConst), 0, 0, op(OpCode::Return)]);
        assert_eq!(module.main.constant(0), Some(&Constant::Empty));
    }

    #[test]
    fn test_function_params_are_locals() {
        let body = vec![
            Stmt::set("doubled", Expr::infix(Expr::identifier("n"), "*", Expr::int(2))),
            Stmt::give_back(Expr::identifier("doubled")),
        ];
        let module = compile_main(vec![Stmt::function("double", &["n"], body)]);
        assert!(module.main.is_empty());

        let f = module.get_function("double").unwrap();
        assert_eq!(f.chunk_type, ChunkType::Function);
        assert_eq!(f.num_params, 1);
        assert_eq!(f.num_locals, 2);
        assert_eq!(f.param_names, vec!["n".to_string()]);
        assert_eq!(
            f.code,
            vec![
                op(OpCode::LoadLocal), 0, 0,
                op(OpCode::LoadConst), 0, 0,
                op(OpCode::Mul),
                op(OpCode::StoreLocal), 1, 0,
                op(OpCode::LoadLocal), 1, 0,
                op(OpCode::Return),
            ]
        );
    }

    #[test]
    fn test_function_gets_implicit_return() {
        let module = compile_main(vec![Stmt::function("noop", &[], vec![])]);
        let f = module.get_function("noop").unwrap();
        assert_eq!(f.code, vec![op(OpCode::LoadConst), 0, 0, op(OpCode::Return)]);
    }

    #[test]
    fn test_return_inside_if_still_gets_implicit_return() {
        let body = vec![Stmt::if_else(
            Expr::identifier("c"),
            vec![Stmt::give_back(Expr::int(1))],
            None,
        )];
        let module = compile_main(vec![Stmt::function("maybe", &["c"], body)]);
        let f = module.get_function("maybe").unwrap();
        // c(3) JIF(3) 1(3) RETURN(1) | empty(3) RETURN(1)
        assert_eq!(f.len(), 14);
        assert_eq!(jump_target(f, 3), 10);
        assert_eq!(f.constant(f.read_u16(11).unwrap()), Some(&Constant::Empty));
        assert_eq!(f.read_byte(13), Some(op(OpCode::Return)));
    }

    #[test]
    fn test_call_with_named_arguments_in_param_order() {
        let define = Stmt::function("sub", &["a", "b"], vec![Stmt::give_back(Expr::infix(
            Expr::identifier("a"),
            "-",
            Expr::identifier("b"),
        ))]);
        let call = Call::new("sub", vec![])
            .with_named("b", Expr::int(1))
            .with_named("a", Expr::int(10));
        let module = compile_main(vec![define, Stmt::call(call)]);
        let main = &module.main;

        assert_eq!(main.read_byte(0), Some(op(OpCode::LoadFunction)));
        assert_eq!(main.constant(main.read_u16(4).unwrap()), Some(&Constant::Int(10)));
        assert_eq!(main.constant(main.read_u16(7).unwrap()), Some(&Constant::Int(1)));
        assert_eq!(main.read_byte(9), Some(op(OpCode::Call)));
        assert_eq!(main.read_byte(10), Some(2));
    }

    #[test]
    fn test_only_final_call_statement_keeps_its_value() {
        let define = Stmt::function("noop", &[], vec![]);
        let call = || Stmt::call(Call::new("noop", vec![]));
        let module = compile_main(vec![define, call(), call()]);
        // LOAD_FUNCTION(3) CALL(2) POP(1) | LOAD_FUNCTION(3) CALL(2)
        assert_eq!(module.main.len(), 11);
        assert_eq!(module.main.read_byte(5), Some(op(OpCode::Pop)));
        assert_eq!(module.main.read_byte(9), Some(op(OpCode::Call)));

        let module = compile_main(vec![
            Stmt::function("noop", &[], vec![]),
            call(),
            Stmt::give_back(Expr::int(1)),
        ]);
        assert_eq!(module.main.read_byte(5), Some(op(OpCode::Pop)));
    }

    #[test]
    fn test_call_statements_inside_functions_are_popped() {
        let body = vec![Stmt::call(Call::new("print", vec![Expr::int(1)]))];
        let module = compile_main(vec![Stmt::function("shout", &[], body)]);
        let f = module.get_function("shout").unwrap();
        assert_eq!(f.read_byte(8), Some(op(OpCode::Pop)));
    }

    #[test]
    fn test_oversized_if_body_is_a_compile_error() {
        let body = (0..7000).map(|i| Stmt::set("x", Expr::int(i))).collect();
        let stmt = Stmt::if_else(Expr::boolean(true), body, None);
        let errors = compile(&Program::new(vec![stmt]), "test").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors.errors()[0],
            CompileError::JumpTooFar { distance: 42000, .. }
        ));
        assert!(errors
            .to_string()
            .contains("Jump distance 42000 does not fit in 16 bits"));
    }

    #[test]
    fn test_constant_pool_overflow_is_a_compile_error() {
        let statements = (0..65_537).map(|i| Stmt::expression(Expr::int(i))).collect();
        let errors = compile(&Program::new(statements), "test").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors.errors()[0],
            CompileError::TooManyConstants { .. }
        ));
    }

    #[test]
    fn test_unknown_named_argument_is_an_error() {
        let define = Stmt::function("f", &["a"], vec![]);
        let call = Call::new("f", vec![]).with_named("zzz", Expr::int(1));
        let errors = compile(&Program::new(vec![define, Stmt::call(call)]), "test").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors.to_string().contains("zzz"));
    }

    #[test]
    fn test_errors_accumulate() {
        let missing_condition = Stmt::new(
            StmtKind::If {
                condition: None,
                consequence: Some(vec![]),
                alternative: None,
            },
            Span::new(1, 1),
        );
        let bad_operator = Stmt::expression(Expr::infix(Expr::int(1), "^^", Expr::int(2)))
            .with_span(Span::new(2, 1));
        let fine = Stmt::set("x", Expr::int(1));
        let errors = compile(
            &Program::new(vec![missing_condition, bad_operator, fine]),
            "test",
        )
        .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.errors()[0].span(), Span::new(1, 1));
    }

    #[test]
    fn test_source_map_records_statement_positions() {
        let module = compile_main(vec![
            Stmt::set("x", Expr::int(1)).with_span(Span::new(1, 1)),
            Stmt::give_back(Expr::identifier("x")).with_span(Span::new(2, 1)),
        ]);
        assert_eq!(module.main.position_at(0), Some(Span::new(1, 1)));
        assert_eq!(module.main.position_at(6), Some(Span::new(2, 1)));
    }

    #[test]
    fn test_metadata() {
        let module = compile_main(vec![]);
        assert_eq!(module.metadata.get("source").map(String::as_str), Some("test"));
        assert!(module.metadata.contains_key("compiler"));
    }
}
