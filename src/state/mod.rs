/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The composite state of the chain: the account table, the bonded and unbonding validator
//! sets, the validator-info table, and the tail of the last applied block.
//!
//! [`State`] is mutated through exactly one entry point,
//! [`append_block`](State::append_block) (plus [`exec_tx`](State::exec_tx), which
//! `append_block` drives). It is **not safe for concurrent use**: one writer at a time holds
//! the state and drives a block application to completion. Read-only snapshots for query
//! serving are taken with [`Clone`] — cloning is cheap because the underlying Merkle trees
//! share structure — and a clone never observes the original's subsequent writes.
//!
//! If `append_block` fails partway through, the state is poisoned: some of the block's effects
//! may have been applied. Callers keep a clone of the last committed state and apply candidate
//! blocks to a throwaway copy.

mod execution;
mod paths;

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::kv_store::{KVGet, KVStore, WriteBatch};
use crate::merkle::{hash_from_hashes, MerkleTree};
use crate::types::account::{Account, TxInput, TxOutput};
use crate::types::block::PartSetHeader;
use crate::types::crypto_primitives::PubKey;
use crate::types::data_types::{
    Accum, Address, BlockHeight, ChainID, CryptoHash, Timestamp, VotingPower,
};
use crate::types::transaction::TxError;
use crate::types::validator_set::{Validator, ValidatorInfo, ValidatorSet};

/// Number of blocks an unbonding validator's principal stays locked before it is released back
/// to the validator's `unbond_to` outputs.
// TODO: probably better to make it time based.
pub const UNBONDING_PERIOD: u64 = 60 * 24 * 365;

/// Number of blocks without a commit after which a bonded validator is implicitly unbonded.
pub const VALIDATOR_TIMEOUT: u64 = 10;

// TODO: enforce a minimum bond amount in BondTx processing.
#[allow(dead_code)]
const MIN_BOND_AMOUNT: u64 = 1;

/// The state of the chain as of its last applied block.
///
/// The block-tail fields (`last_block_*`) and the validator sets are plain public data, like
/// the rest of the data model. The account and validator-info tables are only reachable
/// through accessor methods, which hand out and take in **owned copies** of records: mutating
/// an [`Account`] obtained from [`get_account`](Self::get_account) has no effect until it is
/// written back with [`update_account`](Self::update_account).
#[derive(Clone)]
pub struct State<K: KVStore> {
    db: K,
    chain_id: ChainID,
    pub last_block_height: BlockHeight,
    pub last_block_hash: Option<CryptoHash>,
    pub last_block_parts: PartSetHeader,
    pub last_block_time: Timestamp,
    pub bonded_validators: ValidatorSet,
    pub unbonding_validators: ValidatorSet,
    accounts: AccountTable<K>,
    validator_infos: ValidatorInfoTable<K>,
}

/// An account endowed at genesis. Its pub key stays unknown until its first spend.
#[derive(Clone, Debug)]
pub struct GenesisAccount {
    pub address: Address,
    pub amount: u64,
}

/// A validator bonded at genesis. Its principal is recorded as paying back to its own address
/// when it is eventually released.
#[derive(Clone, Debug)]
pub struct GenesisValidator {
    pub pub_key: PubKey,
    pub amount: u64,
}

impl<K: KVStore> State<K> {
    /// Build the initial state from genesis endowments and validators. The result has block
    /// height 0 and no block tail; the first block applied to it must have height 1.
    ///
    /// The state is not persisted; call [`save`](Self::save) to write it out.
    ///
    /// # Panics
    ///
    /// Panics if `validators` contains a `Nil` or malformed pub key, or two validators with
    /// the same address.
    pub fn from_genesis(
        db: K,
        chain_id: ChainID,
        genesis_time: Timestamp,
        accounts: &[GenesisAccount],
        validators: &[GenesisValidator],
    ) -> State<K> {
        let mut state = State {
            db: db.clone(),
            chain_id,
            last_block_height: BlockHeight::new(0),
            last_block_hash: None,
            last_block_parts: PartSetHeader::zero(),
            last_block_time: genesis_time,
            bonded_validators: ValidatorSet::new(Vec::new()),
            unbonding_validators: ValidatorSet::new(Vec::new()),
            accounts: AccountTable(MerkleTree::new(db.clone(), paths::ACCOUNT_TREE)),
            validator_infos: ValidatorInfoTable(MerkleTree::new(db, paths::VALIDATOR_INFO_TREE)),
        };
        for genesis_account in accounts {
            state.accounts.set(&Account {
                address: genesis_account.address,
                pub_key: PubKey::Nil,
                sequence: 0,
                balance: genesis_account.amount,
            });
        }
        for genesis_validator in validators {
            let address = genesis_validator.pub_key.address();
            state.validator_infos.set(&ValidatorInfo {
                address,
                pub_key: genesis_validator.pub_key,
                unbond_to: vec![TxOutput {
                    address,
                    amount: genesis_validator.amount,
                }],
                first_bond_height: BlockHeight::new(0),
                first_bond_amount: genesis_validator.amount,
                released_height: None,
                destroyed_height: None,
                destroyed_amount: 0,
            });
            let added = state.bonded_validators.add(Validator {
                address,
                pub_key: genesis_validator.pub_key,
                bond_height: BlockHeight::new(0),
                unbond_height: BlockHeight::new(0),
                last_commit_height: BlockHeight::new(0),
                voting_power: VotingPower::new(genesis_validator.amount),
                accum: Accum::new(0),
            });
            assert!(added, "Duplicate validator address in genesis");
        }
        state
    }

    /// Load the state persisted in `db`, or `Ok(None)` if none has been saved.
    pub fn load(db: K, chain_id: ChainID) -> Result<Option<State<K>>, StateStoreError> {
        let Some(bytes) = db.get(paths::STATE) else {
            return Ok(None);
        };
        let blob = StateBlob::deserialize(&mut bytes.as_slice())
            .map_err(|source| StateStoreError::DeserializeState { source })?;
        Ok(Some(State {
            accounts: AccountTable(MerkleTree::load(
                db.clone(),
                paths::ACCOUNT_TREE,
                blob.accounts_root_hash,
            )),
            validator_infos: ValidatorInfoTable(MerkleTree::load(
                db.clone(),
                paths::VALIDATOR_INFO_TREE,
                blob.validator_infos_root_hash,
            )),
            db,
            chain_id,
            last_block_height: blob.last_block_height,
            last_block_hash: blob.last_block_hash,
            last_block_parts: blob.last_block_parts,
            last_block_time: blob.last_block_time,
            bonded_validators: blob.bonded_validators,
            unbonding_validators: blob.unbonding_validators,
        }))
    }

    /// Persist the state: the dirty nodes of both trees and the state blob, in one atomic
    /// batch.
    pub fn save(&mut self) {
        let mut batch = K::WriteBatch::new();
        self.accounts.0.save(&mut batch);
        self.validator_infos.0.save(&mut batch);
        let blob = StateBlob {
            last_block_height: self.last_block_height,
            last_block_hash: self.last_block_hash,
            last_block_parts: self.last_block_parts,
            last_block_time: self.last_block_time,
            bonded_validators: self.bonded_validators.clone(),
            unbonding_validators: self.unbonding_validators.clone(),
            accounts_root_hash: self.accounts.0.root_hash(),
            validator_infos_root_hash: self.validator_infos.0.root_hash(),
        };
        batch.set(paths::STATE, &blob.try_to_vec().unwrap());
        self.db.write(batch);
    }

    /// The hash that represents the state's application data: a Merkle aggregation over
    /// {bonded validators, unbonding validators, accounts, validator infos}.
    ///
    /// The block tail (`last_block_*`) is deliberately excluded, so two nodes that agree on
    /// the application data agree on the hash regardless of which block they loaded from.
    pub fn hash(&self) -> CryptoHash {
        hash_from_hashes(&[
            self.bonded_validators.hash(),
            self.unbonding_validators.hash(),
            self.accounts.0.root_hash().unwrap_or(CryptoHash::zero()),
            self.validator_infos.0.root_hash().unwrap_or(CryptoHash::zero()),
        ])
    }

    /// The network identifier this state verifies signatures against.
    pub fn chain_id(&self) -> ChainID {
        self.chain_id
    }

    /// Get the account at `address`. The returned account is an owned copy: mutating it has no
    /// effect until it is written back with [`update_account`](Self::update_account).
    pub fn get_account(&self, address: &Address) -> Option<Account> {
        self.accounts.get(address)
    }

    /// Write `account` into the account table. The record is copied: mutating `account`
    /// afterwards has no further effect.
    pub fn update_account(&mut self, account: &Account) {
        self.accounts.set(account);
    }

    /// Write every account of a transaction's working set back into the account table.
    pub fn update_accounts(&mut self, accounts: &BTreeMap<Address, Account>) {
        for account in accounts.values() {
            self.accounts.set(account);
        }
    }

    /// Call `f` on every account in ascending address order, until `f` returns `true` ("stop")
    /// or the accounts run out. Returns whether iteration was stopped.
    pub fn iterate_accounts<F: FnMut(&Account) -> bool>(&self, f: F) -> bool {
        self.accounts.iterate(f)
    }

    /// Get the validator info at `address`, as an owned copy.
    pub fn get_validator_info(&self, address: &Address) -> Option<ValidatorInfo> {
        self.validator_infos.get(address)
    }

    /// Write `info` into the validator-info table. Returns `true` if a record at that address
    /// was replaced, `false` if the record is new.
    pub fn set_validator_info(&mut self, info: &ValidatorInfo) -> bool {
        self.validator_infos.set(info)
    }

    /// Build the working account set of a transaction from its inputs and outputs.
    ///
    /// Every input must name an existing account, and the account's pub key must be known
    /// from either the account record or the input: an account whose key is still `Nil`
    /// adopts the input's key (after checking it derives the account's address), and an input
    /// redeclaring an already-known key is canonicalized to `Nil` so that sign-bytes never
    /// carry a redundant key. Output accounts that don't exist yet are synthesized empty.
    pub fn get_or_make_accounts(
        &self,
        ins: &mut [TxInput],
        outs: &[TxOutput],
    ) -> Result<BTreeMap<Address, Account>, TxError> {
        let mut accounts = BTreeMap::new();
        for input in ins.iter_mut() {
            if accounts.contains_key(&input.address) {
                return Err(TxError::DuplicateAddress);
            }
            let Some(mut account) = self.get_account(&input.address) else {
                return Err(TxError::InvalidAddress);
            };
            if account.pub_key.is_nil() {
                if input.pub_key.is_nil() {
                    return Err(TxError::UnknownPubKey);
                }
                if input.pub_key.address() != account.address {
                    return Err(TxError::InvalidPubKey);
                }
                account.pub_key = input.pub_key;
            } else {
                input.pub_key = PubKey::Nil;
            }
            accounts.insert(input.address, account);
        }
        for output in outs {
            if accounts.contains_key(&output.address) {
                return Err(TxError::DuplicateAddress);
            }
            // Output accounts may be brand new: any address can receive.
            let account = self.get_account(&output.address).unwrap_or(Account {
                address: output.address,
                pub_key: PubKey::Nil,
                sequence: 0,
                balance: 0,
            });
            accounts.insert(output.address, account);
        }
        Ok(accounts)
    }

    // Move a bonded validator into the unbonding set, starting its unbonding period.
    fn unbond_validator(&mut self, address: &Address) {
        let mut validator = self
            .bonded_validators
            .remove(address)
            .expect("Couldn't remove validator for unbonding");
        validator.unbond_height = self.last_block_height + 1;
        let added = self.unbonding_validators.add(validator);
        assert!(added, "Couldn't add validator for unbonding");
    }

    // Move an unbonding validator back into the bonded set.
    fn rebond_validator(&mut self, address: &Address) {
        let mut validator = self
            .unbonding_validators
            .remove(address)
            .expect("Couldn't remove validator for rebonding");
        validator.bond_height = self.last_block_height + 1;
        let added = self.bonded_validators.add(validator);
        assert!(added, "Couldn't add validator for rebonding");
    }

    // Pay an unbonding validator's principal back to its unbond_to outputs and drop it from
    // the unbonding set. This is the only place bonded coins re-enter the account table.
    fn release_validator(&mut self, address: &Address) {
        let mut info = self
            .get_validator_info(address)
            .expect("Couldn't find validator info for release");
        info.released_height = Some(self.last_block_height + 1);
        self.set_validator_info(&info);

        let mut accounts = self
            .get_or_make_accounts(&mut [], &info.unbond_to)
            .expect("Couldn't get or make unbond_to accounts");
        adjust_by_outputs(&mut accounts, &info.unbond_to);
        self.update_accounts(&accounts);

        let removed = self.unbonding_validators.remove(address);
        assert!(removed.is_some(), "Couldn't remove validator for release");
    }

    // Destroy a validator convicted of equivocation: stamp its info record and drop it from
    // whichever set holds it. Its stake is forfeited, not returned.
    fn destroy_validator(&mut self, accused: &Validator) {
        let mut info = self
            .get_validator_info(&accused.address)
            .expect("Couldn't find validator info for destruction");
        info.destroyed_height = Some(self.last_block_height + 1);
        info.destroyed_amount = accused.voting_power.int();
        self.set_validator_info(&info);

        if self.bonded_validators.remove(&accused.address).is_none() {
            let removed = self.unbonding_validators.remove(&accused.address);
            assert!(removed.is_some(), "Couldn't remove validator for destruction");
        }
    }
}

/// Validate each input of a transaction against its account, in order: shape, signature over
/// `sign_bytes`, sequence (the replay guard: each input must carry `account.sequence + 1`),
/// and funds. Returns the input total.
pub fn validate_inputs(
    accounts: &BTreeMap<Address, Account>,
    sign_bytes: &[u8],
    ins: &[TxInput],
) -> Result<u64, TxError> {
    let mut total: u64 = 0;
    for input in ins {
        let account = accounts
            .get(&input.address)
            .expect("validate_inputs expects account in accounts");
        input.validate_basic()?;
        if !account.pub_key.verify(sign_bytes, &input.signature) {
            return Err(TxError::InvalidSignature);
        }
        if account.sequence + 1 != input.sequence {
            return Err(TxError::InvalidSequence);
        }
        if account.balance < input.amount {
            return Err(TxError::InsufficientFunds);
        }
        total = total.checked_add(input.amount).ok_or(TxError::InvalidAmount)?;
    }
    Ok(total)
}

/// Validate each output's shape and return the output total.
pub fn validate_outputs(outs: &[TxOutput]) -> Result<u64, TxError> {
    let mut total: u64 = 0;
    for output in outs {
        output.validate_basic()?;
        total = total
            .checked_add(output.amount)
            .ok_or(TxError::InvalidAmount)?;
    }
    Ok(total)
}

/// Deduct each input's amount from its account and bump the account's sequence. Only called
/// after all validation has succeeded.
pub fn adjust_by_inputs(accounts: &mut BTreeMap<Address, Account>, ins: &[TxInput]) {
    for input in ins {
        let account = accounts
            .get_mut(&input.address)
            .expect("adjust_by_inputs expects account in accounts");
        assert!(
            account.balance >= input.amount,
            "adjust_by_inputs expects sufficient funds"
        );
        account.balance -= input.amount;
        account.sequence += 1;
    }
}

/// Credit each output's amount to its account.
pub fn adjust_by_outputs(accounts: &mut BTreeMap<Address, Account>, outs: &[TxOutput]) {
    for output in outs {
        let account = accounts
            .get_mut(&output.address)
            .expect("adjust_by_outputs expects account in accounts");
        account.balance += output.amount;
    }
}

/// Errors reading a persisted state back from the store.
#[derive(Debug)]
pub enum StateStoreError {
    DeserializeState { source: std::io::Error },
}

impl Display for StateStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StateStoreError::DeserializeState { source } => {
                write!(f, "Persisted state cannot be decoded: {}", source)
            }
        }
    }
}

// The borsh layout persisted under the state key. The field order is part of the on-disk
// contract.
#[derive(BorshDeserialize, BorshSerialize)]
struct StateBlob {
    last_block_height: BlockHeight,
    last_block_hash: Option<CryptoHash>,
    last_block_parts: PartSetHeader,
    last_block_time: Timestamp,
    bonded_validators: ValidatorSet,
    unbonding_validators: ValidatorSet,
    accounts_root_hash: Option<CryptoHash>,
    validator_infos_root_hash: Option<CryptoHash>,
}

// Address → Account over a Merkle tree. Records pass through borsh on both the get and set
// paths, which is what makes the copies defensive.
#[derive(Clone)]
struct AccountTable<K: KVStore>(MerkleTree<K>);

impl<K: KVStore> AccountTable<K> {
    fn get(&self, address: &Address) -> Option<Account> {
        self.0.get(&address.bytes()).1.map(|bytes| {
            Account::deserialize(&mut bytes.as_slice()).expect("Account record cannot be decoded")
        })
    }

    fn set(&mut self, account: &Account) {
        self.0
            .set(&account.address.bytes(), &account.try_to_vec().unwrap());
    }

    fn iterate<F: FnMut(&Account) -> bool>(&self, mut f: F) -> bool {
        self.0.iterate(|_, mut bytes| {
            let account =
                Account::deserialize(&mut bytes).expect("Account record cannot be decoded");
            f(&account)
        })
    }
}

// Address → ValidatorInfo over a Merkle tree; same defensive-copy contract as AccountTable.
#[derive(Clone)]
struct ValidatorInfoTable<K: KVStore>(MerkleTree<K>);

impl<K: KVStore> ValidatorInfoTable<K> {
    fn get(&self, address: &Address) -> Option<ValidatorInfo> {
        self.0.get(&address.bytes()).1.map(|bytes| {
            ValidatorInfo::deserialize(&mut bytes.as_slice())
                .expect("ValidatorInfo record cannot be decoded")
        })
    }

    fn set(&mut self, info: &ValidatorInfo) -> bool {
        self.0.set(&info.address.bytes(), &info.try_to_vec().unwrap())
    }
}
