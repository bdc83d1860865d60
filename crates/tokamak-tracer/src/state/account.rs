//! One account of the replica: a committed view and a working view.

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use rustc_hash::FxHashMap;
use sha3::{Digest, Keccak256};

/// keccak256 of the empty byte string.
pub const EMPTY_CODE_HASH: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

pub fn keccak(data: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(data))
}

/// `original_*` is the state as of the last [`finalise`](super::StateReplica::finalise),
/// `dirty_*` the state seen by the transaction being applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub address: Address,
    pub original_nonce: u64,
    pub dirty_nonce: u64,
    pub original_balance: U256,
    pub dirty_balance: U256,
    pub original_code_hash: H256,
    pub dirty_code_hash: H256,
    pub code: Bytes,
    /// Slot values as loaded from the node or committed by a previous transaction.
    pub origin_storage: FxHashMap<H256, H256>,
    /// Slots written by the transaction being applied.
    pub dirty_storage: FxHashMap<H256, H256>,
    pub used: bool,
    pub suicided: bool,
    /// Destroyed by a committed self-destruct; storage reads no longer reach the node.
    pub destroyed: bool,
    /// Loading failed; the zero values are placeholders until a retry.
    pub(crate) failed: bool,
}

impl Account {
    pub fn new(address: Address, nonce: u64, balance: U256, code: Bytes) -> Self {
        let code_hash = if code.is_empty() {
            EMPTY_CODE_HASH
        } else {
            keccak(&code)
        };
        Self {
            address,
            original_nonce: nonce,
            dirty_nonce: nonce,
            original_balance: balance,
            dirty_balance: balance,
            original_code_hash: code_hash,
            dirty_code_hash: code_hash,
            code,
            origin_storage: FxHashMap::default(),
            dirty_storage: FxHashMap::default(),
            used: true,
            suicided: false,
            destroyed: false,
            failed: false,
        }
    }

    pub fn empty(address: Address) -> Self {
        Self::new(address, 0, U256::zero(), Bytes::new())
    }

    /// EIP-158 emptiness of the working view.
    pub fn is_empty(&self) -> bool {
        self.dirty_nonce == 0 && self.dirty_balance.is_zero() && self.dirty_code_hash == EMPTY_CODE_HASH
    }

    /// Working value of a slot if it is known without a fetch.
    pub fn known_slot(&self, slot: &H256) -> Option<H256> {
        if let Some(value) = self.dirty_storage.get(slot) {
            return Some(*value);
        }
        if self.destroyed {
            return Some(H256::zero());
        }
        self.origin_storage.get(slot).copied()
    }

    /// Code as of the committed view; empty when the committed hash is empty.
    pub fn original_code(&self) -> Bytes {
        if self.original_code_hash == EMPTY_CODE_HASH {
            Bytes::new()
        } else {
            self.code.clone()
        }
    }

    /// Promote the working view to the committed view.
    pub(crate) fn finalise(&mut self) {
        if self.suicided {
            self.dirty_nonce = 0;
            self.dirty_balance = U256::zero();
            self.dirty_code_hash = EMPTY_CODE_HASH;
            self.code = Bytes::new();
            self.origin_storage.clear();
            self.dirty_storage.clear();
            self.suicided = false;
            self.destroyed = true;
        }
        if !self.used {
            return;
        }
        self.used = false;

        self.original_nonce = self.dirty_nonce;
        self.original_balance = self.dirty_balance;
        self.original_code_hash = self.dirty_code_hash;
        self.origin_storage.extend(self.dirty_storage.drain());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_code_hash_matches_keccak() {
        assert_eq!(keccak(&[]), EMPTY_CODE_HASH);
    }

    #[test]
    fn new_account_hashes_code() {
        let code = Bytes::from_static(&[0x60, 0x00]);
        let account = Account::new(Address::zero(), 1, U256::from(5), code.clone());
        assert_eq!(account.dirty_code_hash, keccak(&code));
        assert!(account.used);
        assert!(!account.is_empty());
        assert!(Account::empty(Address::zero()).is_empty());
    }

    #[test]
    fn finalise_commits_working_view() {
        let mut account = Account::new(Address::zero(), 1, U256::from(5), Bytes::new());
        account.dirty_nonce = 2;
        account.dirty_balance = U256::from(3);
        account.dirty_storage.insert(H256::from_low_u64_be(1), H256::from_low_u64_be(9));

        account.finalise();

        assert!(!account.used);
        assert_eq!(account.original_nonce, 2);
        assert_eq!(account.original_balance, U256::from(3));
        assert!(account.dirty_storage.is_empty());
        assert_eq!(
            account.known_slot(&H256::from_low_u64_be(1)),
            Some(H256::from_low_u64_be(9))
        );
    }

    #[test]
    fn finalise_of_suicided_account_clears_storage() {
        let mut account = Account::new(Address::zero(), 1, U256::from(5), Bytes::from_static(&[0x00]));
        account.origin_storage.insert(H256::from_low_u64_be(1), H256::from_low_u64_be(9));
        account.suicided = true;

        account.finalise();

        assert!(account.is_empty());
        assert_eq!(account.known_slot(&H256::from_low_u64_be(1)), Some(H256::zero()));
        assert_eq!(account.known_slot(&H256::from_low_u64_be(7)), Some(H256::zero()));
    }
}
