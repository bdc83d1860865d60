//! Undo log for replica mutations.

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use rustc_hash::FxHashMap;

use super::account::Account;

/// One mutation, holding what is needed to undo it.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    BalanceChange {
        address: Address,
        prev: U256,
    },
    NonceChange {
        address: Address,
        prev: u64,
    },
    CodeChange {
        address: Address,
        prev_hash: H256,
        prev_code: Bytes,
    },
    /// `prev` is the previous working value, `None` when the slot was not written yet.
    StorageChange {
        address: Address,
        slot: H256,
        prev: Option<H256>,
    },
    /// Marks the account used; nothing to undo.
    Touch { address: Address },
    Suicide {
        address: Address,
        prev_suicided: bool,
        prev_balance: U256,
    },
}

impl JournalEntry {
    fn undo(self, accounts: &mut FxHashMap<Address, Account>) {
        match self {
            JournalEntry::BalanceChange { address, prev } => {
                if let Some(account) = accounts.get_mut(&address) {
                    account.dirty_balance = prev;
                }
            }
            JournalEntry::NonceChange { address, prev } => {
                if let Some(account) = accounts.get_mut(&address) {
                    account.dirty_nonce = prev;
                }
            }
            JournalEntry::CodeChange {
                address,
                prev_hash,
                prev_code,
            } => {
                if let Some(account) = accounts.get_mut(&address) {
                    account.dirty_code_hash = prev_hash;
                    account.code = prev_code;
                }
            }
            JournalEntry::StorageChange {
                address,
                slot,
                prev,
            } => {
                if let Some(account) = accounts.get_mut(&address) {
                    match prev {
                        Some(value) => account.dirty_storage.insert(slot, value),
                        None => account.dirty_storage.remove(&slot),
                    };
                }
            }
            JournalEntry::Touch { .. } => {}
            JournalEntry::Suicide {
                address,
                prev_suicided,
                prev_balance,
            } => {
                if let Some(account) = accounts.get_mut(&address) {
                    account.suicided = prev_suicided;
                    account.dirty_balance = prev_balance;
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn append(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Undo every entry past `mark`, newest first, and truncate to it.
    pub fn revert(&mut self, mark: usize, accounts: &mut FxHashMap<Address, Account>) {
        while self.entries.len() > mark {
            if let Some(entry) = self.entries.pop() {
                entry.undo(accounts);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
