/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its methods.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;

use super::crypto_primitives::CryptoHasher;
use super::data_types::{BlockHeight, CryptoHash, Round, SignatureBytes, Timestamp, TotalPower};
use super::transaction::{InvalidTxError, Tx};

/// Identifies how a block was chunked for gossip: the number of parts and the Merkle root over
/// them. The state machine treats it as an opaque commitment that must match across the chain
/// linkage and inside commit votes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: CryptoHash,
}

impl PartSetHeader {
    /// The zero parts header, used before the first block.
    pub const fn zero() -> Self {
        Self {
            total: 0,
            hash: CryptoHash::zero(),
        }
    }
}

/// A single validator's commit signature for the previous block, as carried in the next
/// block's [`Validation`].
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Commit {
    pub round: Round,
    pub signature: SignatureBytes,
}

/// The commit signatures attesting to the previous block.
///
/// `commits` has one slot per validator of the bonded set **as of the previous block**, in the
/// set's address order. A `None` slot means that validator's commit was not observed; enough
/// `Some` slots must verify for the block to carry more than 2/3 of the bonded voting power.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Validation {
    pub commits: Vec<Option<Commit>>,
}

/// The transactions carried by a block, in execution order.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct BlockData {
    pub txs: Vec<Tx>,
}

/// A candidate or committed block.
///
/// `state_hash` is `None` while a proposer is still constructing the block; applying the block
/// with `check_state_hash == false` fills it in with the application state's hash.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Block {
    pub height: BlockHeight,
    pub time: Timestamp,
    pub last_block_hash: Option<CryptoHash>,
    pub last_block_parts: PartSetHeader,
    pub state_hash: Option<CryptoHash>,
    pub validation: Validation,
    pub data: BlockData,
}

impl Block {
    /// The block's hash: the SHA256 of its borsh encoding.
    ///
    /// Note that the hash covers `state_hash`, so it changes when the state hash is stamped in;
    /// a block is only hashed after it is fully formed.
    pub fn hash(&self) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(&self.try_to_vec().unwrap());
        CryptoHash::new(hasher.finalize().into())
    }

    /// Check the block's shape and its linkage to the previous block: consecutive height,
    /// matching previous-block hash and parts header, and strictly increasing time.
    pub fn validate_basic(
        &self,
        last_block_height: BlockHeight,
        last_block_hash: &Option<CryptoHash>,
        last_block_parts: &PartSetHeader,
        last_block_time: Timestamp,
    ) -> Result<(), BlockError> {
        if self.height != last_block_height + 1 {
            return Err(BlockError::InvalidHeight {
                got: self.height,
                expected: last_block_height + 1,
            });
        }
        if self.last_block_hash != *last_block_hash {
            return Err(BlockError::InvalidLastBlockHash);
        }
        if self.last_block_parts != *last_block_parts {
            return Err(BlockError::InvalidLastBlockParts);
        }
        if self.time <= last_block_time {
            return Err(BlockError::InvalidTime);
        }
        Ok(())
    }
}

/// Errors rejecting a candidate block. The state may be partially mutated by the time an
/// `InvalidTx` is raised; callers apply candidate blocks to a copy of the state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockError {
    InvalidHeight {
        got: BlockHeight,
        expected: BlockHeight,
    },
    InvalidLastBlockHash,
    InvalidLastBlockParts,
    InvalidTime,
    /// The first block may not carry commits: there was no previous block to attest to.
    FirstBlockValidation,
    InvalidValidationSize,
    InvalidValidationSignature,
    InsufficientVotingPower {
        got: TotalPower,
        required: TotalPower,
    },
    InvalidStateHash {
        computed: CryptoHash,
        claimed: Option<CryptoHash>,
    },
    InvalidTx(InvalidTxError),
}

impl Display for BlockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BlockError::InvalidHeight { got, expected } => {
                write!(f, "Invalid block height. Got {}, expected {}", got, expected)
            }
            BlockError::InvalidLastBlockHash => write!(f, "Invalid last block hash"),
            BlockError::InvalidLastBlockParts => write!(f, "Invalid last block parts header"),
            BlockError::InvalidTime => write!(f, "Invalid block time"),
            BlockError::FirstBlockValidation => {
                write!(
                    f,
                    "Block at height 1 (first block) should have no validation commits"
                )
            }
            BlockError::InvalidValidationSize => write!(f, "Invalid block validation size"),
            BlockError::InvalidValidationSignature => {
                write!(f, "Invalid validation signature")
            }
            BlockError::InsufficientVotingPower { got, required } => {
                write!(
                    f,
                    "Insufficient validation voting power. Got {}, needed more than {}",
                    got, required
                )
            }
            BlockError::InvalidStateHash { computed, claimed } => {
                write!(
                    f,
                    "Invalid state hash. Got {}, block says {:?}",
                    computed, claimed
                )
            }
            BlockError::InvalidTx(invalid_tx) => Display::fmt(invalid_tx, f),
        }
    }
}
