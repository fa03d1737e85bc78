use std::rc::Rc;

use u256::{H160, U256};

use crate::vm_error::VmError;

/// EVM stack limit.
pub const STACK_LIMIT: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stack {
    pub stack: Vec<U256>,
}

impl Stack {
    pub fn new() -> Self {
        Self { stack: vec![] }
    }

    pub fn push(&mut self, value: U256) -> Result<(), VmError> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<U256, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Reads the value `offset` slots below the top, 0 being the top itself.
    pub fn peek(&self, offset: usize) -> Result<U256, VmError> {
        let sp = self.len();
        if offset >= sp {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.stack[sp - 1 - offset])
    }

    pub fn swap(&mut self, offset: usize) -> Result<(), VmError> {
        let sp = self.len();
        if offset >= sp {
            return Err(VmError::StackUnderflow);
        }
        self.stack.swap(sp - 1, sp - 1 - offset);
        Ok(())
    }

    /// Bottom-to-top view of the stack.
    pub fn data(&self) -> &[U256] {
        &self.stack
    }
}

/// Linear byte-addressed memory, grown in 32 byte words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Self { data: vec![] }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn expand(&mut self, end: usize) {
        if end > self.data.len() {
            let words = end.div_ceil(32);
            self.data.resize(words * 32, 0);
        }
    }

    /// Copies `size` bytes from `offset`, zero-filling past the end.
    pub fn read(&self, offset: usize, size: usize) -> Vec<u8> {
        let mut out = vec![0; size];
        if offset < self.data.len() {
            let end = (offset + size).min(self.data.len());
            out[..end - offset].copy_from_slice(&self.data[offset..end]);
        }
        out
    }

    pub fn read_word(&self, offset: usize) -> U256 {
        U256::from_big_endian(&self.read(offset, 32))
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.expand(offset + bytes.len());
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_word(&mut self, offset: usize, value: U256) {
        let mut buffer = [0u8; 32];
        value.to_big_endian(&mut buffer);
        self.write(offset, &buffer);
    }
}

/// The executing contract as seen by one call frame.
///
/// Code and input are shared, so tracers can hold on to them without copying.
#[derive(Debug, Clone)]
pub struct Contract {
    /// The address of the contract being executed
    pub address: H160,
    /// The address of the caller
    pub caller: H160,
    /// Stands for the amount of wei sent along with the call
    pub value: U256,
    pub input: Rc<[u8]>,
    pub code: Rc<[u8]>,
    pub gas: u64,
}

impl Contract {
    pub fn new(caller: H160, address: H160, value: U256, gas: u64) -> Self {
        Self {
            address,
            caller,
            value,
            input: Rc::from(Vec::new()),
            code: Rc::from(Vec::new()),
            gas,
        }
    }

    pub fn with_code(mut self, code: impl Into<Rc<[u8]>>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_input(mut self, input: impl Into<Rc<[u8]>>) -> Self {
        self.input = input.into();
        self
    }
}

impl Default for Contract {
    fn default() -> Self {
        Self::new(H160::zero(), H160::zero(), U256::zero(), 0)
    }
}
