//! revm adapter: the engine reads from the replica and its state diff is written
//! back through the journaled setters.

use std::convert::Infallible;

use ethereum_types::{Address, H256, U256};
use revm::Database;
use revm::primitives::{
    AccountInfo as RevmAccountInfo, Address as RevmAddress, B256, Bytecode as RevmBytecode,
    Bytes as RevmBytes, EvmState, U256 as RevmU256,
};

use super::{StateReplica, StateSource};

pub fn to_revm_address(address: Address) -> RevmAddress {
    RevmAddress(address.0.into())
}

pub fn from_revm_address(address: RevmAddress) -> Address {
    Address::from_slice(address.as_slice())
}

pub fn to_revm_u256(value: U256) -> RevmU256 {
    RevmU256::from_limbs(value.0)
}

pub fn from_revm_u256(value: RevmU256) -> U256 {
    U256(*value.as_limbs())
}

fn slot_key(index: RevmU256) -> H256 {
    H256(index.to_be_bytes::<32>())
}

fn slot_value(value: H256) -> RevmU256 {
    RevmU256::from_be_bytes(value.0)
}

impl<S: StateSource> Database for StateReplica<S> {
    /// Fetch failures are recorded on the replica instead.
    type Error = Infallible;

    fn basic(&mut self, address: RevmAddress) -> Result<Option<RevmAccountInfo>, Self::Error> {
        let account = self.account(from_revm_address(address));
        Ok(Some(RevmAccountInfo {
            balance: to_revm_u256(account.dirty_balance),
            nonce: account.dirty_nonce,
            code_hash: B256::from(account.dirty_code_hash.0),
            code: Some(RevmBytecode::new_raw(RevmBytes::from(account.code.clone()))),
        }))
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<RevmBytecode, Self::Error> {
        let hash = H256(code_hash.0);
        let code = self
            .accounts
            .values()
            .find(|account| account.dirty_code_hash == hash)
            .map(|account| account.code.clone())
            .unwrap_or_default();
        Ok(RevmBytecode::new_raw(RevmBytes::from(code)))
    }

    fn storage(&mut self, address: RevmAddress, index: RevmU256) -> Result<RevmU256, Self::Error> {
        let value = StateReplica::storage(self, from_revm_address(address), slot_key(index));
        Ok(slot_value(value))
    }

    fn block_hash(&mut self, number: u64) -> Result<B256, Self::Error> {
        Ok(B256::from(StateReplica::block_hash(self, number).0))
    }
}

impl<S: StateSource> StateReplica<S> {
    /// Write an executed transaction's state diff into the working view.
    pub fn apply_diff(&mut self, diff: EvmState) {
        for (address, changed) in diff {
            if !changed.is_touched() {
                continue;
            }
            let address = from_revm_address(address);

            if changed.is_selfdestructed() {
                self.suicide(address);
                continue;
            }

            let journal_mark = self.snapshot();

            let balance = from_revm_u256(changed.info.balance);
            if self.balance(address) != balance {
                self.set_balance(address, balance);
            }
            if self.nonce(address) != changed.info.nonce {
                self.set_nonce(address, changed.info.nonce);
            }
            let code_hash = H256(changed.info.code_hash.0);
            if self.code_hash(address) != code_hash {
                let code = changed
                    .info
                    .code
                    .as_ref()
                    .map(|code| code.original_bytes().0)
                    .unwrap_or_default();
                self.set_code(address, code);
            }
            for (index, slot) in &changed.storage {
                if slot.is_changed() {
                    let value = H256(slot.present_value.to_be_bytes::<32>());
                    self.set_storage(address, slot_key(*index), value);
                }
            }

            if self.snapshot() == journal_mark {
                self.touch(address);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revm::primitives::KECCAK_EMPTY;

    #[test]
    fn conversions_keep_values() {
        let address = Address::from_low_u64_be(0xdead_beef);
        assert_eq!(from_revm_address(to_revm_address(address)), address);

        let value = U256::from_dec_str("123456789012345678901234567890").unwrap();
        assert_eq!(from_revm_u256(to_revm_u256(value)), value);
        assert_eq!(to_revm_u256(U256::from(7)), RevmU256::from(7u64));

        let slot = H256::from_low_u64_be(0x1234);
        assert_eq!(slot_key(slot_value(slot)), slot);
        assert_eq!(slot_value(slot), RevmU256::from(0x1234u64));
    }

    #[test]
    fn empty_code_hash_agrees_with_engine() {
        assert_eq!(B256::from(crate::state::EMPTY_CODE_HASH.0), KECCAK_EMPTY);
    }
}
