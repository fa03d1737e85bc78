use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::rc::Rc;

use u256::{H160, H256, U256};

/// Read-only access to world state, lent to tracers as the script `db` object.
pub trait StateReader: Debug {
    fn balance(&self, address: &H160) -> U256;
    fn nonce(&self, address: &H160) -> u64;
    fn code(&self, address: &H160) -> Vec<u8>;
    fn storage_read(&self, key: StorageKey) -> H256;
    fn exists(&self, address: &H160) -> bool;
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StorageKey {
    pub address: H160,
    pub key: H256,
}

impl StorageKey {
    pub fn new(address: H160, key: H256) -> Self {
        Self { address, key }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: U256,
    pub nonce: u64,
    pub code: Vec<u8>,
}

/// In-memory state implementation.
#[derive(Debug, Clone, Default)]
pub struct InMemory {
    accounts: HashMap<H160, Account>,
    state_storage: HashMap<StorageKey, H256>,
}

impl InMemory {
    pub fn new_empty() -> Self {
        Self::default()
    }

    pub fn new(
        accounts: HashMap<H160, Account>,
        state_storage: HashMap<StorageKey, H256>,
    ) -> Self {
        Self {
            accounts,
            state_storage,
        }
    }

    pub fn insert_account(&mut self, address: H160, account: Account) {
        self.accounts.insert(address, account);
    }

    pub fn storage_write(&mut self, key: StorageKey, value: H256) {
        self.state_storage.insert(key, value);
    }
}

impl StateReader for InMemory {
    fn balance(&self, address: &H160) -> U256 {
        self.accounts
            .get(address)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    fn nonce(&self, address: &H160) -> u64 {
        self.accounts
            .get(address)
            .map(|account| account.nonce)
            .unwrap_or_default()
    }

    fn code(&self, address: &H160) -> Vec<u8> {
        self.accounts
            .get(address)
            .map(|account| account.code.clone())
            .unwrap_or_default()
    }

    fn storage_read(&self, key: StorageKey) -> H256 {
        self.state_storage.get(&key).copied().unwrap_or_default()
    }

    fn exists(&self, address: &H160) -> bool {
        self.accounts.contains_key(address)
    }
}

// Lets an interpreter keep writing to its state while a tracer holds a reader.
// Tracer callbacks run between instructions, so no mutable borrow is live then.
impl<T: StateReader> StateReader for RefCell<T> {
    fn balance(&self, address: &H160) -> U256 {
        self.borrow().balance(address)
    }

    fn nonce(&self, address: &H160) -> u64 {
        self.borrow().nonce(address)
    }

    fn code(&self, address: &H160) -> Vec<u8> {
        self.borrow().code(address)
    }

    fn storage_read(&self, key: StorageKey) -> H256 {
        self.borrow().storage_read(key)
    }

    fn exists(&self, address: &H160) -> bool {
        self.borrow().exists(address)
    }
}

pub type SharedState = Rc<dyn StateReader>;
