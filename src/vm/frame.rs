//! Call frames and the call stack.

use crate::bytecode::chunk::Chunk;
use crate::error::RuntimeError;
use crate::vm::value::Value;

type VMResult<T> = Result<T, RuntimeError>;

/// A call frame: the chunk being executed, its program counter and locals.
#[derive(Debug)]
pub struct Frame<'m> {
    pub chunk: &'m Chunk,
    /// Offset of the next byte to decode.
    pub pc: usize,
    pub locals: Vec<Value>,
    /// Operand stack height when the frame was entered.
    pub stack_base: usize,
}

impl<'m> Frame<'m> {
    pub fn new(chunk: &'m Chunk, stack_base: usize) -> Self {
        let slots = usize::from(chunk.num_locals).max(usize::from(chunk.num_params));
        Self {
            chunk,
            pc: 0,
            locals: vec![Value::Empty; slots],
            stack_base,
        }
    }

    pub fn at_end(&self) -> bool {
        self.pc >= self.chunk.code.len()
    }

    pub fn read_byte(&mut self) -> VMResult<u8> {
        let byte = self.chunk.read_byte(self.pc).ok_or_else(|| self.past_end(1))?;
        self.pc += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> VMResult<u16> {
        let value = self.chunk.read_u16(self.pc).ok_or_else(|| self.past_end(2))?;
        self.pc += 2;
        Ok(value)
    }

    pub fn read_i16(&mut self) -> VMResult<i16> {
        let value = self.chunk.read_i16(self.pc).ok_or_else(|| self.past_end(2))?;
        self.pc += 2;
        Ok(value)
    }

    /// Move the pc by a signed offset relative to the current position.
    /// Landing exactly on the end of the code is allowed.
    pub fn jump(&mut self, offset: i16) -> VMResult<()> {
        let target = self.pc as i64 + i64::from(offset);
        let length = self.chunk.code.len();
        if target < 0 || target as usize > length {
            return Err(RuntimeError::index_out_of_range(
                "jump target",
                target.max(0) as usize,
                length,
            ));
        }
        self.pc = target as usize;
        Ok(())
    }

    pub fn local(&self, slot: u16) -> VMResult<Value> {
        self.locals
            .get(usize::from(slot))
            .cloned()
            .ok_or_else(|| RuntimeError::index_out_of_range("local", slot.into(), self.locals.len()))
    }

    pub fn set_local(&mut self, slot: u16, value: Value) -> VMResult<()> {
        let length = self.locals.len();
        match self.locals.get_mut(usize::from(slot)) {
            Some(local) => {
                *local = value;
                Ok(())
            }
            None => Err(RuntimeError::index_out_of_range("local", slot.into(), length)),
        }
    }

    fn past_end(&self, width: usize) -> RuntimeError {
        RuntimeError::index_out_of_range("bytecode", self.pc + width - 1, self.chunk.code.len())
    }
}

/// Bounded stack of call frames.
#[derive(Debug)]
pub struct CallStack<'m> {
    frames: Vec<Frame<'m>>,
    max_depth: usize,
}

impl<'m> CallStack<'m> {
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: Vec::with_capacity(max_depth.min(64)),
            max_depth,
        }
    }

    pub fn push(&mut self, frame: Frame<'m>) -> VMResult<()> {
        if self.frames.len() >= self.max_depth {
            return Err(RuntimeError::CallDepthExceeded(self.max_depth));
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Frame<'m>> {
        self.frames.pop()
    }

    pub fn current(&self) -> Option<&Frame<'m>> {
        self.frames.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut Frame<'m>> {
        self.frames.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
