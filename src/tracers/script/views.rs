use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use rhai::{Blob, EvalAltResult, INT};
use u256::{H160, U256};

use crate::opcode::Opcode;
use crate::state::{Memory, Stack};
use crate::store::{SharedState, StorageKey};
use crate::utils::{h256_into_u256, u256_into_h256};

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Liveness token shared by every view handed out during one callback.
#[derive(Debug, Clone)]
pub struct ViewGuard(Rc<Cell<bool>>);

impl ViewGuard {
    pub fn new() -> Self {
        ViewGuard(Rc::new(Cell::new(true)))
    }

    pub fn revoke(&self) {
        self.0.set(false);
    }

    fn check(&self, what: &str) -> ScriptResult<()> {
        if self.0.get() {
            Ok(())
        } else {
            Err(format!("{} accessed outside of the callback it was passed to", what).into())
        }
    }
}

impl Default for ViewGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// A 256-bit word as seen by scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Word(pub U256);

impl Word {
    pub fn from_int(value: INT) -> ScriptResult<Self> {
        if value < 0 {
            return Err(format!("cannot make a word from negative number {}", value).into());
        }
        Ok(Word(U256::from(value as u64)))
    }

    /// Decimal, or hex with a `0x` prefix.
    pub fn parse(text: &str) -> ScriptResult<Self> {
        let parsed = match text.strip_prefix("0x") {
            Some(digits) => U256::from_str_radix(digits, 16).ok(),
            None => U256::from_dec_str(text).ok(),
        };
        parsed
            .map(Word)
            .ok_or_else(|| format!("invalid word literal '{}'", text).into())
    }

    /// Big-endian, right-aligned; longer inputs keep their last 32 bytes.
    pub fn from_blob(bytes: &[u8]) -> Self {
        let start = bytes.len().saturating_sub(32);
        Word(U256::from_big_endian(&bytes[start..]))
    }

    pub fn to_blob(self) -> Blob {
        let mut buffer = vec![0u8; 32];
        self.0.to_big_endian(&mut buffer);
        buffer
    }

    pub fn to_int(self) -> ScriptResult<INT> {
        if self.0 > U256::from(INT::MAX as u64) {
            return Err(format!("word {} does not fit in an integer", self.0).into());
        }
        Ok(self.0.as_u64() as INT)
    }

    pub fn to_hex(self) -> String {
        format!("{:#x}", self.0)
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unsigned values that usually fit in a script integer but must never be truncated.
pub fn int_or_word(value: u64) -> rhai::Dynamic {
    match INT::try_from(value) {
        Ok(int) => rhai::Dynamic::from(int),
        Err(_) => rhai::Dynamic::from(Word(U256::from(value))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpView(pub Opcode);

impl OpView {
    pub fn name(&self) -> String {
        self.0.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct MemoryView {
    data: Rc<[u8]>,
    guard: ViewGuard,
}

impl MemoryView {
    pub fn copy_of(memory: &Memory, guard: ViewGuard) -> Self {
        Self {
            data: Rc::from(memory.data()),
            guard,
        }
    }

    pub fn length(&mut self) -> ScriptResult<INT> {
        self.guard.check("memory")?;
        Ok(self.data.len() as INT)
    }

    /// Bytes in `[start, end)`; out-of-range reads are an error, not zero-filled.
    pub fn slice(&mut self, start: INT, end: INT) -> ScriptResult<Blob> {
        self.guard.check("memory")?;
        let (start, end) = self.bounds(start, end)?;
        Ok(self.data[start..end].to_vec())
    }

    pub fn get_uint(&mut self, offset: INT) -> ScriptResult<Word> {
        self.guard.check("memory")?;
        let (start, end) = self.bounds(offset, offset.saturating_add(32))?;
        Ok(Word(U256::from_big_endian(&self.data[start..end])))
    }

    pub fn byte_at(&mut self, index: INT) -> ScriptResult<INT> {
        self.guard.check("memory")?;
        let (start, _) = self.bounds(index, index.saturating_add(1))?;
        Ok(self.data[start] as INT)
    }

    fn bounds(&self, start: INT, end: INT) -> ScriptResult<(usize, usize)> {
        if start < 0 || end < start || end as u64 > self.data.len() as u64 {
            return Err(format!(
                "tracer accessed out of bound memory: available {}, offset {}, size {}",
                self.data.len(),
                start,
                end.saturating_sub(start)
            )
            .into());
        }
        Ok((start as usize, end as usize))
    }
}

#[derive(Debug, Clone)]
pub struct StackView {
    words: Rc<[U256]>,
    guard: ViewGuard,
}

impl StackView {
    pub fn copy_of(stack: &Stack, guard: ViewGuard) -> Self {
        Self {
            words: Rc::from(stack.data()),
            guard,
        }
    }

    pub fn length(&mut self) -> ScriptResult<INT> {
        self.guard.check("stack")?;
        Ok(self.words.len() as INT)
    }

    /// `peek(0)` is the top of the stack.
    pub fn peek(&mut self, index: INT) -> ScriptResult<Word> {
        self.guard.check("stack")?;
        let len = self.words.len();
        if index < 0 || index as u64 >= len as u64 {
            return Err(format!(
                "tracer accessed out of bound stack: size {}, index {}",
                len, index
            )
            .into());
        }
        Ok(Word(self.words[len - 1 - index as usize]))
    }
}

#[derive(Debug, Clone)]
pub struct ContractView {
    pub caller: Blob,
    pub address: Blob,
    pub value: Word,
    /// Shared with the interpreter's contract; copied only when a script reads it.
    pub input: Rc<[u8]>,
    pub code: Rc<[u8]>,
    pub gas: u64,
}

#[derive(Debug, Clone)]
pub struct DbView {
    pub state: SharedState,
}

impl DbView {
    pub fn balance(&mut self, address: Blob) -> ScriptResult<Word> {
        Ok(Word(self.state.balance(&blob_to_address(&address)?)))
    }

    pub fn nonce(&mut self, address: Blob) -> ScriptResult<rhai::Dynamic> {
        Ok(int_or_word(self.state.nonce(&blob_to_address(&address)?)))
    }

    pub fn code(&mut self, address: Blob) -> ScriptResult<Blob> {
        Ok(self.state.code(&blob_to_address(&address)?))
    }

    pub fn storage(&mut self, address: Blob, slot: Word) -> ScriptResult<Word> {
        let key = StorageKey::new(blob_to_address(&address)?, u256_into_h256(slot.0));
        Ok(Word(h256_into_u256(self.state.storage_read(key))))
    }

    pub fn exists(&mut self, address: Blob) -> ScriptResult<bool> {
        Ok(self.state.exists(&blob_to_address(&address)?))
    }
}

pub fn blob_to_address(bytes: &[u8]) -> ScriptResult<H160> {
    if bytes.len() != 20 {
        return Err(format!("expected a 20 byte address, got {} bytes", bytes.len()).into());
    }
    Ok(H160::from_slice(bytes))
}
