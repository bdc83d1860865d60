//! Lazily populated, journaled world state for replaying one block.
//!
//! Accounts are fetched on first access from a [`StateSource`] pinned at the parent
//! of the replayed block. Every mutation is journaled before it is applied, so a
//! [`snapshot`](StateReplica::snapshot) can be rolled back exactly.
//!
//! Fetch failures never abort a read: the first one is kept as a sticky error, the
//! read yields the zero value, and the caller checks [`StateReplica::take_error`]
//! once the transaction has run.

mod account;
mod database;
mod journal;
mod remote;

pub use account::{Account, EMPTY_CODE_HASH, keccak};
pub use database::{from_revm_address, from_revm_u256, to_revm_address, to_revm_u256};
pub use journal::{Journal, JournalEntry};
pub use remote::{RemoteState, StateSource};

use std::collections::hash_map::Entry;

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::{RpcError, StateError};
use crate::types::BlockHeader;

/// Transaction currently being applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxContext {
    pub tx_hash: H256,
    pub block_hash: H256,
    pub tx_index: usize,
}

pub struct StateReplica<S> {
    source: S,
    accounts: FxHashMap<Address, Account>,
    journal: Journal,
    headers: FxHashMap<u64, BlockHeader>,
    error: Option<StateError>,
    context: TxContext,
}

fn record(error: &mut Option<StateError>, err: StateError) {
    if error.is_none() {
        warn!(%err, "state fetch failed");
        *error = Some(err);
    }
}

fn fetched<T: Default>(
    error: &mut Option<StateError>,
    failed: &mut bool,
    address: Address,
    field: &'static str,
    result: Result<T, RpcError>,
) -> T {
    match result {
        Ok(value) => value,
        Err(cause) => {
            *failed = true;
            record(
                error,
                StateError::Fetch {
                    address,
                    field,
                    cause,
                },
            );
            T::default()
        }
    }
}

impl<S: StateSource> StateReplica<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            accounts: FxHashMap::default(),
            journal: Journal::default(),
            headers: FxHashMap::default(),
            error: None,
            context: TxContext::default(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn load<'a>(
        accounts: &'a mut FxHashMap<Address, Account>,
        source: &S,
        error: &mut Option<StateError>,
        address: Address,
    ) -> &'a mut Account {
        match accounts.entry(address) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut failed = false;
                let balance = fetched(error, &mut failed, address, "balance", source.balance(address));
                let nonce = fetched(error, &mut failed, address, "nonce", source.nonce(address));
                let code = fetched(error, &mut failed, address, "code", source.code(address));

                let mut account = Account::new(address, nonce, balance, code);
                account.failed = failed;
                entry.insert(account)
            }
        }
    }

    /// The account, fetched if unseen. Marks it used.
    pub fn account(&mut self, address: Address) -> &mut Account {
        let account = Self::load(&mut self.accounts, &self.source, &mut self.error, address);
        account.used = true;
        account
    }

    /// Cached account without fetching.
    pub fn cached(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn balance(&mut self, address: Address) -> U256 {
        self.account(address).dirty_balance
    }

    pub fn nonce(&mut self, address: Address) -> u64 {
        self.account(address).dirty_nonce
    }

    pub fn code_hash(&mut self, address: Address) -> H256 {
        self.account(address).dirty_code_hash
    }

    pub fn code(&mut self, address: Address) -> Bytes {
        self.account(address).code.clone()
    }

    /// Working value of a storage slot, fetched on first read.
    pub fn storage(&mut self, address: Address, slot: H256) -> H256 {
        let account = Self::load(&mut self.accounts, &self.source, &mut self.error, address);
        account.used = true;
        if let Some(value) = account.known_slot(&slot) {
            return value;
        }

        match self.source.storage(address, slot) {
            Ok(value) => {
                account.origin_storage.insert(slot, value);
                value
            }
            Err(cause) => {
                record(
                    &mut self.error,
                    StateError::Fetch {
                        address,
                        field: "storage",
                        cause,
                    },
                );
                H256::zero()
            }
        }
    }

    pub fn set_balance(&mut self, address: Address, balance: U256) {
        let prev = self.balance(address);
        self.journal
            .append(JournalEntry::BalanceChange { address, prev });
        self.account(address).dirty_balance = balance;
    }

    pub fn add_balance(&mut self, address: Address, amount: U256) {
        if amount.is_zero() {
            // EIP-158: a zero transfer still touches an empty account.
            if self.account(address).is_empty() {
                self.touch(address);
            }
            return;
        }
        let balance = self.balance(address).saturating_add(amount);
        self.set_balance(address, balance);
    }

    pub fn sub_balance(&mut self, address: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        let balance = self.balance(address).saturating_sub(amount);
        self.set_balance(address, balance);
    }

    pub fn set_nonce(&mut self, address: Address, nonce: u64) {
        let prev = self.nonce(address);
        self.journal.append(JournalEntry::NonceChange { address, prev });
        self.account(address).dirty_nonce = nonce;
    }

    pub fn set_code(&mut self, address: Address, code: Bytes) {
        let account = self.account(address);
        let entry = JournalEntry::CodeChange {
            address,
            prev_hash: account.dirty_code_hash,
            prev_code: account.code.clone(),
        };
        account.dirty_code_hash = if code.is_empty() {
            EMPTY_CODE_HASH
        } else {
            keccak(&code)
        };
        account.code = code;
        self.journal.append(entry);
    }

    /// Write a slot. Writing the current value is not journaled.
    pub fn set_storage(&mut self, address: Address, slot: H256, value: H256) {
        if self.storage(address, slot) == value {
            return;
        }
        let account = self.account(address);
        let prev = account.dirty_storage.insert(slot, value);
        self.journal.append(JournalEntry::StorageChange {
            address,
            slot,
            prev,
        });
    }

    /// Mark the account self-destructed and clear its balance. Returns whether the
    /// account had not been marked yet.
    pub fn suicide(&mut self, address: Address) -> bool {
        let account = self.account(address);
        let entry = JournalEntry::Suicide {
            address,
            prev_suicided: account.suicided,
            prev_balance: account.dirty_balance,
        };
        let first = !account.suicided;
        account.suicided = true;
        account.dirty_balance = U256::zero();
        self.journal.append(entry);
        first
    }

    pub fn touch(&mut self, address: Address) {
        self.account(address);
        self.journal.append(JournalEntry::Touch { address });
    }

    pub fn snapshot(&self) -> usize {
        self.journal.len()
    }

    /// Undo everything after `snapshot`. Accounts whose load failed are dropped so
    /// the next access fetches them again.
    pub fn revert_to_snapshot(&mut self, snapshot: usize) {
        self.journal.revert(snapshot, &mut self.accounts);
        self.accounts.retain(|_, account| !account.failed);
    }

    /// Commit the working view of every used account and start a fresh journal.
    pub fn finalise(&mut self) {
        for account in self.accounts.values_mut() {
            account.finalise();
        }
        self.journal.clear();
    }

    pub fn prepare(&mut self, tx_hash: H256, block_hash: H256, tx_index: usize) {
        debug!(tx = ?tx_hash, tx_index, "preparing transaction");
        self.context = TxContext {
            tx_hash,
            block_hash,
            tx_index,
        };
    }

    pub fn context(&self) -> TxContext {
        self.context
    }

    pub fn take_error(&mut self) -> Option<StateError> {
        self.error.take()
    }

    /// Accounts read or written since the last finalise, ordered by address.
    pub fn used_accounts(&self) -> Vec<&Account> {
        let mut used: Vec<&Account> = self.accounts.values().filter(|a| a.used).collect();
        used.sort_by_key(|account| account.address);
        used
    }

    pub fn insert_header(&mut self, header: BlockHeader) {
        self.headers.insert(header.number, header);
    }

    /// Hash of block `number` through the header cache. A header that cannot be
    /// fetched reads as empty.
    pub fn block_hash(&mut self, number: u64) -> H256 {
        if let Some(header) = self.headers.get(&number) {
            return header.hash;
        }
        match self.source.header(number) {
            Ok(Some(header)) => {
                let hash = header.hash;
                self.headers.insert(number, header);
                hash
            }
            Ok(None) => {
                debug!(number, "header not found, using empty header");
                H256::zero()
            }
            Err(e) => {
                debug!(number, error = %e, "header fetch failed, using empty header");
                H256::zero()
            }
        }
    }

    /// Headers looked up while replaying, ordered by number.
    pub fn touched_headers(&self) -> Vec<&BlockHeader> {
        let mut headers: Vec<&BlockHeader> = self.headers.values().collect();
        headers.sort_by_key(|header| header.number);
        headers
    }
}
