/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The transaction interpreter ([`exec_tx`](State::exec_tx)) and the block applier
//! ([`append_block`](State::append_block)).

use crate::kv_store::KVStore;
use crate::types::block::{Block, BlockError, PartSetHeader};
use crate::types::data_types::{Accum, Address, BlockHeight, TotalPower, VotingPower};
use crate::types::transaction::{
    BondTx, DupeoutTx, InvalidTxError, RebondTx, SendTx, Tx, TxError, UnbondTx, Vote, VoteType,
};
use crate::types::validator_set::{Validator, ValidatorInfo};

use super::{
    adjust_by_inputs, adjust_by_outputs, validate_inputs, validate_outputs, State,
    UNBONDING_PERIOD, VALIDATOR_TIMEOUT,
};

impl<K: KVStore> State<K> {
    /// Execute a single transaction against the state.
    ///
    /// If the transaction is invalid, an error is returned and the state is untouched. Unlike
    /// [`append_block`](Self::append_block), a failed `exec_tx` never leaves partial effects:
    /// each handler validates everything against a working copy of the involved accounts
    /// before writing anything back.
    pub fn exec_tx(&mut self, tx: &Tx) -> Result<(), TxError> {
        match tx {
            Tx::Send(tx) => self.exec_send_tx(tx),
            Tx::Bond(tx) => self.exec_bond_tx(tx),
            Tx::Unbond(tx) => self.exec_unbond_tx(tx),
            Tx::Rebond(tx) => self.exec_rebond_tx(tx),
            Tx::Dupeout(tx) => self.exec_dupeout_tx(tx),
        }
    }

    fn exec_send_tx(&mut self, tx: &SendTx) -> Result<(), TxError> {
        let mut tx = tx.clone();
        let mut accounts = self.get_or_make_accounts(&mut tx.inputs, &tx.outputs)?;
        let sign_bytes = Tx::Send(tx.clone()).sign_bytes(self.chain_id());
        let in_total = validate_inputs(&accounts, &sign_bytes, &tx.inputs)?;
        let out_total = validate_outputs(&tx.outputs)?;
        if out_total > in_total {
            return Err(TxError::InsufficientFunds);
        }
        // TODO: do something with the fee instead of burning it.
        let _fee = in_total - out_total;

        // Good! Adjust the accounts.
        adjust_by_inputs(&mut accounts, &tx.inputs);
        adjust_by_outputs(&mut accounts, &tx.outputs);
        self.update_accounts(&accounts);
        Ok(())
    }

    fn exec_bond_tx(&mut self, tx: &BondTx) -> Result<(), TxError> {
        // The pub key must be well-formed before an address can be derived from it.
        tx.pub_key.validate_basic()?;
        if self.get_validator_info(&tx.pub_key.address()).is_some() {
            // TODO: check that the validator wasn't destroyed, add funds, merge the unbond_to
            // outputs, and rebond.
            return Err(TxError::ValidatorAlreadyRegistered);
        }

        let mut tx = tx.clone();
        let mut accounts = self.get_or_make_accounts(&mut tx.inputs, &[])?;
        let sign_bytes = Tx::Bond(tx.clone()).sign_bytes(self.chain_id());
        let in_total = validate_inputs(&accounts, &sign_bytes, &tx.inputs)?;
        let out_total = validate_outputs(&tx.unbond_to)?;
        if out_total > in_total {
            return Err(TxError::InsufficientFunds);
        }
        // TODO: do something with the fee instead of burning it.
        let _fee = in_total - out_total;

        // Good! Deduct the inputs. The bonded amount is locked, not paid out: the unbond_to
        // outputs are only credited when the validator is released.
        adjust_by_inputs(&mut accounts, &tx.inputs);
        self.update_accounts(&accounts);

        let address = tx.pub_key.address();
        self.set_validator_info(&ValidatorInfo {
            address,
            pub_key: tx.pub_key,
            unbond_to: tx.unbond_to.clone(),
            first_bond_height: self.last_block_height + 1,
            first_bond_amount: out_total,
            released_height: None,
            destroyed_height: None,
            destroyed_amount: 0,
        });
        let added = self.bonded_validators.add(Validator {
            address,
            pub_key: tx.pub_key,
            bond_height: self.last_block_height + 1,
            unbond_height: BlockHeight::new(0),
            last_commit_height: BlockHeight::new(0),
            voting_power: VotingPower::new(out_total),
            accum: Accum::new(0),
        });
        assert!(added, "Failed to add validator");
        Ok(())
    }

    fn exec_unbond_tx(&mut self, tx: &UnbondTx) -> Result<(), TxError> {
        // The validator must be bonded.
        let Some((_, validator)) = self.bonded_validators.get_by_address(&tx.address) else {
            return Err(TxError::InvalidAddress);
        };
        let validator = validator.clone();

        let sign_bytes = Tx::Unbond(tx.clone()).sign_bytes(self.chain_id());
        if !validator.pub_key.verify(&sign_bytes, &tx.signature) {
            return Err(TxError::InvalidSignature);
        }

        // A stale unbond, signed before the validator's latest commit, must not be replayable.
        if tx.height <= validator.last_commit_height {
            return Err(TxError::InvalidUnbondHeight);
        }

        // Good!
        self.unbond_validator(&validator.address);
        Ok(())
    }

    fn exec_rebond_tx(&mut self, tx: &RebondTx) -> Result<(), TxError> {
        // The validator must be unbonding.
        let Some((_, validator)) = self.unbonding_validators.get_by_address(&tx.address) else {
            return Err(TxError::InvalidAddress);
        };
        let validator = validator.clone();

        let sign_bytes = Tx::Rebond(tx.clone()).sign_bytes(self.chain_id());
        if !validator.pub_key.verify(&sign_bytes, &tx.signature) {
            return Err(TxError::InvalidSignature);
        }

        // A rebond is only good for the very next block.
        if tx.height != self.last_block_height + 1 {
            return Err(TxError::InvalidRebondHeight);
        }

        // Good!
        self.rebond_validator(&validator.address);
        Ok(())
    }

    fn exec_dupeout_tx(&mut self, tx: &DupeoutTx) -> Result<(), TxError> {
        // The accused must be bonded.
        let Some((_, accused)) = self.bonded_validators.get_by_address(&tx.address) else {
            return Err(TxError::InvalidAddress);
        };
        let accused = accused.clone();

        // Both votes must actually be the accused's.
        if !accused
            .pub_key
            .verify(&tx.vote_a.sign_bytes(self.chain_id()), &tx.vote_a.signature)
            || !accused
                .pub_key
                .verify(&tx.vote_b.sign_bytes(self.chain_id()), &tx.vote_b.signature)
        {
            return Err(TxError::InvalidSignature);
        }

        // The two votes must demonstrate conflicting signing at a single height.
        // TODO: in the future, just require one vote from a previous height that doesn't
        // exist on this chain.
        if tx.vote_a.height != tx.vote_b.height {
            return Err(TxError::DupeoutHeightMismatch);
        }
        if tx.vote_a.vote_type == VoteType::Commit && tx.vote_a.round < tx.vote_b.round {
            // Special case: a validator that commits must not sign anything at a later round.
            // The later vote is the offense, whatever it contains.
        } else {
            if tx.vote_a.round != tx.vote_b.round {
                return Err(TxError::DupeoutRoundMismatch);
            }
            if tx.vote_a.vote_type != tx.vote_b.vote_type {
                return Err(TxError::DupeoutTypeMismatch);
            }
            if tx.vote_a.block_hash == tx.vote_b.block_hash {
                return Err(TxError::DupeoutBlockHashesMatch);
            }
        }

        // Good! (Bad validator!)
        self.destroy_validator(&accused);
        Ok(())
    }

    /// Apply a candidate block to the state.
    ///
    /// `block_parts` is the parts header under which this block was gossiped; it becomes the
    /// state's `last_block_parts`. If `check_state_hash` is true, the state hash computed
    /// after execution must equal `block.state_hash`; if false (the proposer constructing a
    /// new block), `block.state_hash` must be `None` and is stamped with the computed hash.
    ///
    /// On an error the state may be partially mutated. Clone the state before calling
    /// `append_block` with a block that is not known to be good.
    pub fn append_block(
        &mut self,
        block: &mut Block,
        block_parts: PartSetHeader,
        check_state_hash: bool,
    ) -> Result<(), BlockError> {
        block.validate_basic(
            self.last_block_height,
            &self.last_block_hash,
            &self.last_block_parts,
            self.last_block_time,
        )?;

        // Validate the block's commits against the bonded set. The first block attests to
        // nothing and must carry no commits; every later block needs one commit slot per
        // bonded validator, and the verified slots must add up to more than 2/3 of the total
        // voting power.
        if block.height == BlockHeight::new(1) {
            if !block.validation.commits.is_empty() {
                return Err(BlockError::FirstBlockValidation);
            }
        } else {
            if block.validation.commits.len() != self.bonded_validators.len() {
                return Err(BlockError::InvalidValidationSize);
            }
            let mut sum_voting_power = TotalPower::new(0);
            for (commit, validator) in block
                .validation
                .commits
                .iter()
                .zip(self.bonded_validators.validators())
            {
                let Some(commit) = commit else { continue };
                let vote = Vote {
                    height: block.height - 1,
                    round: commit.round,
                    vote_type: VoteType::Commit,
                    block_hash: block.last_block_hash,
                    block_parts: block.last_block_parts,
                    signature: commit.signature,
                };
                if validator
                    .pub_key
                    .verify(&vote.sign_bytes(self.chain_id()), &commit.signature)
                {
                    sum_voting_power += validator.voting_power;
                } else {
                    log::warn!(
                        "Invalid validation signature.\nval: {:?}\nvote: {:?}",
                        validator,
                        vote
                    );
                    return Err(BlockError::InvalidValidationSignature);
                }
            }
            let two_thirds = self.bonded_validators.two_thirds_power();
            if sum_voting_power <= two_thirds {
                return Err(BlockError::InsufficientVotingPower {
                    got: sum_voting_power,
                    required: two_thirds,
                });
            }
        }

        // Commit each tx.
        for tx in &block.data.txs {
            self.exec_tx(tx).map_err(|reason| {
                BlockError::InvalidTx(InvalidTxError {
                    tx: tx.clone(),
                    reason,
                })
            })?;
        }

        // Update last commit heights: every validator whose commit slot was filled attested
        // to the previous block.
        for (index, commit) in block.validation.commits.iter().enumerate() {
            if commit.is_none() {
                continue;
            }
            let mut validator = self
                .bonded_validators
                .get_by_index(index)
                .unwrap_or_else(|| panic!("Failed to fetch validator at index {}", index))
                .clone();
            validator.last_commit_height = block.height - 1;
            let updated = self.bonded_validators.update(validator);
            assert!(updated, "Failed to update validator last commit height");
        }

        // If any unbonding periods are over, release the bonded coins.
        let to_release: Vec<Address> = self
            .unbonding_validators
            .validators()
            .filter(|validator| validator.unbond_height + UNBONDING_PERIOD < block.height)
            .map(|validator| validator.address)
            .collect();
        for address in to_release {
            log::debug!("Releasing validator {} at height {}", address, block.height);
            self.release_validator(&address);
        }

        // If any bonded validators haven't signed in a while, they have timed out: unbond
        // them implicitly.
        let to_timeout: Vec<Address> = self
            .bonded_validators
            .validators()
            .filter(|validator| validator.last_commit_height + VALIDATOR_TIMEOUT < block.height)
            .map(|validator| validator.address)
            .collect();
        for address in to_timeout {
            log::debug!(
                "Validator {} timed out at height {}",
                address,
                block.height
            );
            self.unbond_validator(&address);
        }

        // Tick the proposer-priority accumulators.
        self.bonded_validators.increment_accum(1);

        // Check or set the block's state hash.
        let state_hash = self.hash();
        if check_state_hash {
            if block.state_hash != Some(state_hash) {
                return Err(BlockError::InvalidStateHash {
                    computed: state_hash,
                    claimed: block.state_hash,
                });
            }
        } else {
            assert!(
                block.state_hash.is_none(),
                "Cannot overwrite a block's state hash"
            );
            block.state_hash = Some(state_hash);
        }

        // Commit the block tail.
        self.last_block_height = block.height;
        self.last_block_hash = Some(block.hash());
        self.last_block_parts = block_parts;
        self.last_block_time = block.time;
        Ok(())
    }
}
