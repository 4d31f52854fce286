//! Call dispatch: CALL, RETURN and name lookup for globals and functions.

use std::rc::Rc;

use tracing::trace;

use crate::bytecode::chunk::Module;
use crate::error::RuntimeError;

use super::frame::{CallStack, Frame};
use super::value::Value;
use super::vm::{VMResult, Vm};

impl Vm {
    /// Pop `argc` arguments and the callee beneath them, then invoke it.
    /// Natives run to completion here; bytecode functions get a new frame.
    pub(crate) fn call_value<'m>(
        &mut self,
        module: &'m Module,
        calls: &mut CallStack<'m>,
        argc: u8,
    ) -> VMResult<()> {
        let argc = usize::from(argc);
        if self.stack.len() < argc + 1 {
            return Err(RuntimeError::StackUnderflow);
        }
        let args = self.stack.split_off(self.stack.len() - argc);
        let callee = self.pop()?;

        match callee {
            Value::Native(native) => {
                trace!(name = %native.name, argc, "native call");
                let result = native.call(&args, self.out.as_mut())?;
                self.push(result)
            }
            Value::Function(name) => self.call_function(module, calls, &name, args),
            other => Err(RuntimeError::NotCallable(other.type_name().to_string())),
        }
    }

    fn call_function<'m>(
        &mut self,
        module: &'m Module,
        calls: &mut CallStack<'m>,
        name: &str,
        args: Vec<Value>,
    ) -> VMResult<()> {
        let chunk = module
            .get_function(name)
            .ok_or_else(|| RuntimeError::UndefinedFunction(name.to_string()))?;
        let expected = usize::from(chunk.num_params);
        if args.len() != expected {
            return Err(RuntimeError::wrong_arity(name, expected, args.len()));
        }
        trace!(name, depth = calls.depth() + 1, "enter function");

        let mut frame = Frame::new(chunk, self.stack.len());
        for (slot, arg) in args.into_iter().enumerate() {
            frame.locals[slot] = arg;
        }
        calls.push(frame)
    }

    /// Pop the current frame, discard whatever it left on the operand stack
    /// and push its return value for the caller.
    pub(crate) fn return_from_frame(
        &mut self,
        calls: &mut CallStack<'_>,
        value: Value,
    ) -> VMResult<()> {
        let frame = calls
            .pop()
            .ok_or_else(|| RuntimeError::new("Return with no active frame"))?;
        trace!(name = %frame.chunk.name, "return");
        self.stack.truncate(frame.stack_base);
        self.push(value)
    }

    /// Natives shadow globals of the same name.
    pub(crate) fn load_global(&self, name: &str) -> VMResult<Value> {
        if let Some(native) = self.natives.get(name) {
            return Ok(Value::Native(Rc::clone(native)));
        }
        self.globals
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))
    }

    /// Module functions shadow natives of the same name.
    pub(crate) fn load_function(&self, module: &Module, name: &str) -> VMResult<Value> {
        if module.functions.contains_key(name) {
            return Ok(Value::Function(Rc::from(name)));
        }
        self.natives
            .get(name)
            .map(|native| Value::Native(Rc::clone(native)))
            .ok_or_else(|| RuntimeError::UndefinedFunction(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::chunk::{Chunk, ChunkType};
    use crate::bytecode::constant::Constant;
    use crate::bytecode::instruction::OpCode;
    use crate::vm::config::VmConfig;
    use std::io;

    fn vm() -> Vm {
        Vm::with_output(VmConfig::default(), Box::new(io::sink()))
    }

    #[test]
    fn test_lookup_order() {
        let mut module = Module::new("m", Chunk::new("main", ChunkType::Main));
        module.add_function("len", Chunk::new("len", ChunkType::Function));
        let mut vm = vm();
        vm.globals.insert("print".to_string(), Value::Int(1));
        vm.globals.insert("answer".to_string(), Value::Int(42));

        assert!(matches!(vm.load_function(&module, "len"), Ok(Value::Function(_))));
        assert!(matches!(vm.load_function(&module, "abs"), Ok(Value::Native(_))));
        assert!(matches!(vm.load_global("print"), Ok(Value::Native(_))));
        assert!(matches!(vm.load_global("answer"), Ok(Value::Int(42))));
        assert_eq!(
            vm.load_function(&module, "answer").unwrap_err(),
            RuntimeError::UndefinedFunction("answer".to_string())
        );
    }

    #[test]
    fn test_return_discards_callee_leftovers() {
        // main: f() ; f leaves junk under its return value
        let mut main = Chunk::new("main", ChunkType::Main);
        let name = main.add_constant(Constant::from("f")).unwrap();
        main.write_op(OpCode::LoadFunction);
        main.write_u16(name);
        main.write_op(OpCode::Call);
        main.write_byte(0);
        main.write_op(OpCode::Return);

        let mut function = Chunk::new("f", ChunkType::Function);
        let junk = function.add_constant(Constant::Int(0)).unwrap();
        let answer = function.add_constant(Constant::Int(7)).unwrap();
        for index in [junk, junk, answer] {
            function.write_op(OpCode::LoadConst);
            function.write_u16(index);
        }
        function.write_op(OpCode::Return);

        let mut module = Module::new("m", main);
        module.add_function("f", function);

        let mut vm = vm();
        assert!(matches!(vm.run(&module), Ok(Value::Int(7))));
        assert_eq!(vm.stack.len(), 1);
    }

    #[test]
    fn test_call_with_missing_callee_underflows() {
        let mut main = Chunk::new("main", ChunkType::Main);
        main.write_op(OpCode::Call);
        main.write_byte(2);
        let module = Module::new("m", main);
        assert_eq!(vm().run(&module).unwrap_err(), RuntimeError::StackUnderflow);
    }
}
