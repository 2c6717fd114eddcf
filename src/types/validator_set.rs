/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store information about validators and validator sets.

use std::slice;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::merkle::{hash_bytes, hash_from_hashes};

use super::account::TxOutput;
use super::crypto_primitives::PubKey;
use super::data_types::{Accum, Address, BlockHeight, CryptoHash, TotalPower, VotingPower};

/// A member of the bonded or unbonding validator set.
///
/// A validator resides in exactly one of the two sets at a time, or in neither once it has
/// been released or destroyed. `voting_power` is fixed at bonding time; `accum` is the
/// proposer-priority counter ticked once per applied block.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Validator {
    pub address: Address,
    pub pub_key: PubKey,
    pub bond_height: BlockHeight,
    pub unbond_height: BlockHeight,
    pub last_commit_height: BlockHeight,
    pub voting_power: VotingPower,
    pub accum: Accum,
}

/// Permanent historical record of a validator, kept even after the validator leaves both sets.
///
/// Created when the validator first bonds; never removed. `unbond_to` records where the bonded
/// principal is paid when the validator is released, and the `released_`/`destroyed_` fields
/// are stamped by the corresponding lifecycle transitions.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ValidatorInfo {
    pub address: Address,
    pub pub_key: PubKey,
    pub unbond_to: Vec<TxOutput>,
    pub first_bond_height: BlockHeight,
    pub first_bond_amount: u64,
    pub released_height: Option<BlockHeight>,
    pub destroyed_height: Option<BlockHeight>,
    pub destroyed_amount: u64,
}

/// Stores the identities of validators and their voting powers.
///
/// ## Ordering of validators
///
/// `ValidatorSet` internally maintains the list of validators in ascending order of their
/// addresses. Index-based access ([`get_by_index`](Self::get_by_index)) follows this order,
/// which is how commit slots in a block's validation are aligned with validators.
///
/// ## Limits to total power
///
/// Users must make sure that the total power of the validator set does not exceed
/// `u128::MAX / 2`.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ValidatorSet {
    // Kept in ascending order of validator addresses.
    validators: Vec<Validator>,
    total_voting_power: TotalPower,
}

impl ValidatorSet {
    /// Create a validator set containing `validators`, sorting them into address order.
    pub fn new(mut validators: Vec<Validator>) -> ValidatorSet {
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        let mut total_voting_power = TotalPower::new(0);
        for validator in &validators {
            total_voting_power += validator.voting_power;
        }
        Self {
            validators,
            total_voting_power,
        }
    }

    /// Put `validator` into the validator set, placing it in a position that preserves the
    /// [ordering of validators](Self#ordering-of-validators).
    ///
    /// Returns `false`, changing nothing, if a validator with the same address is already
    /// present.
    pub fn add(&mut self, validator: Validator) -> bool {
        match self
            .validators
            .binary_search_by(|v| v.address.cmp(&validator.address))
        {
            Ok(_) => false,
            Err(insert_pos) => {
                self.total_voting_power += validator.voting_power;
                self.validators.insert(insert_pos, validator);
                true
            }
        }
    }

    /// Remove the validator with `address` from the validator set, if it actually is in the
    /// validator set, and return it.
    pub fn remove(&mut self, address: &Address) -> Option<Validator> {
        match self
            .validators
            .binary_search_by(|v| v.address.cmp(address))
        {
            Ok(pos) => {
                let validator = self.validators.remove(pos);
                self.total_voting_power -= validator.voting_power;
                Some(validator)
            }
            Err(_) => None,
        }
    }

    /// Replace the stored validator with `updated`'s address by `updated`, in place. Returns
    /// `false`, changing nothing, if no validator with that address is present.
    pub fn update(&mut self, updated: Validator) -> bool {
        match self
            .validators
            .binary_search_by(|v| v.address.cmp(&updated.address))
        {
            Ok(pos) => {
                self.total_voting_power -= self.validators[pos].voting_power;
                self.total_voting_power += updated.voting_power;
                self.validators[pos] = updated;
                true
            }
            Err(_) => false,
        }
    }

    /// Get the validator with `address`, along with its index in the
    /// [sorted order](Self#ordering-of-validators), if it is actually in the validator set.
    pub fn get_by_address(&self, address: &Address) -> Option<(usize, &Validator)> {
        match self
            .validators
            .binary_search_by(|v| v.address.cmp(address))
        {
            Ok(pos) => Some((pos, &self.validators[pos])),
            Err(_) => None,
        }
    }

    /// Get the validator at `index` in the [sorted order](Self#ordering-of-validators).
    pub fn get_by_index(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    /// Check whether the validator set contains a validator with `address`.
    pub fn contains(&self, address: &Address) -> bool {
        self.get_by_address(address).is_some()
    }

    /// Get an iterator through the validators in ascending address order.
    pub fn validators(&self) -> slice::Iter<'_, Validator> {
        self.validators.iter()
    }

    /// Get the number of validators currently in the validator set.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Check whether the validator set is empty (i.e., `self.len() == 0`).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the cached sum of the powers of all of the validators inside the validator set.
    pub fn total_voting_power(&self) -> TotalPower {
        self.total_voting_power
    }

    /// Compute the voting power that a block's verified commits must strictly exceed (`>`) for
    /// the block to be accepted: two thirds (rounded down) of the set's total power.
    pub fn two_thirds_power(&self) -> TotalPower {
        const TOTAL_POWER_OVERFLOW: &str =
            "Validator set power exceeds u128::MAX/2. Read the itemdoc for `ValidatorSet`.";

        TotalPower::new(
            self.total_voting_power
                .int()
                .checked_mul(2)
                .expect(TOTAL_POWER_OVERFLOW)
                / 3,
        )
    }

    /// Apply `times` accumulator ticks.
    ///
    /// Each tick adds every validator's voting power to its accum, then subtracts the set's
    /// total voting power from the accum of the validator with the maximum accum. Ties are
    /// broken towards the lowest address. Over time this rotates the maximum-accum position
    /// through the set proportionally to voting power ("proposer round-robin weighted by
    /// stake").
    pub fn increment_accum(&mut self, times: u64) {
        if self.validators.is_empty() {
            return;
        }
        for _ in 0..times {
            for validator in self.validators.iter_mut() {
                validator.accum += validator.voting_power;
            }
            // Iteration is in address order, and only a strictly greater accum moves the
            // winner, so ties resolve to the lowest address.
            let mut winner = 0;
            for i in 1..self.validators.len() {
                if self.validators[i].accum > self.validators[winner].accum {
                    winner = i;
                }
            }
            let total = self.total_voting_power;
            self.validators[winner].accum -= total;
        }
    }

    /// The canonical hash of the validator set: a Merkle aggregation over the hash of each
    /// validator's borsh encoding, in address order.
    pub fn hash(&self) -> CryptoHash {
        let leaves: Vec<CryptoHash> = self
            .validators
            .iter()
            .map(|validator| hash_bytes(&validator.try_to_vec().unwrap()))
            .collect();
        hash_from_hashes(&leaves)
    }
}
