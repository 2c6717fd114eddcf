/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The five transaction kinds, consensus votes, and the canonical signing payloads
//! ("sign-bytes") that signatures are computed over.
//!
//! ## Sign-bytes
//!
//! A signature never covers the wire encoding of a message directly, because the wire encoding
//! contains the signature itself. Instead it covers the message's **sign-bytes**: the borsh
//! encoding of the [`ChainID`] followed by the message with every signature field replaced by
//! [`SignatureBytes::zero`]. Prefixing the chain ID makes sign-bytes disjoint between networks,
//! so a signature made for one chain can never be replayed on another.
//!
//! Transaction inputs are **canonicalized** before their sign-bytes are computed: an input
//! spending from an account whose pub key is already known carries `PubKey::Nil`, while an
//! input that reveals the account's key for the first time carries the revealed key. The
//! transaction interpreter enforces this canonical form when it builds its working account set,
//! so signer and verifier always serialize the same bytes.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use super::account::{TxInput, TxOutput};
use super::block::PartSetHeader;
use super::crypto_primitives::PubKey;
use super::data_types::{Address, BlockHeight, ChainID, CryptoHash, Round, SignatureBytes};

/// Errors rejecting a transaction. The transaction is invalid and the state is untouched
/// (partial mutation can only happen at the block level, across transactions).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxError {
    DuplicateAddress,
    InvalidAddress,
    InvalidAmount,
    InvalidPubKey,
    UnknownPubKey,
    InvalidSignature,
    InvalidSequence,
    InsufficientFunds,
    /// A `BondTx` names a pub key for which a validator record already exists.
    ValidatorAlreadyRegistered,
    InvalidUnbondHeight,
    InvalidRebondHeight,
    DupeoutHeightMismatch,
    DupeoutRoundMismatch,
    DupeoutTypeMismatch,
    DupeoutBlockHashesMatch,
}

impl Display for TxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TxError::DuplicateAddress => write!(f, "Duplicate address"),
            TxError::InvalidAddress => write!(f, "Invalid address"),
            TxError::InvalidAmount => write!(f, "Invalid amount"),
            TxError::InvalidPubKey => write!(f, "Invalid pubkey"),
            TxError::UnknownPubKey => write!(f, "Unknown pubkey"),
            TxError::InvalidSignature => write!(f, "Invalid signature"),
            TxError::InvalidSequence => write!(f, "Invalid sequence"),
            TxError::InsufficientFunds => write!(f, "Insufficient funds"),
            TxError::ValidatorAlreadyRegistered => {
                write!(f, "Adding coins to existing validators not yet supported")
            }
            TxError::InvalidUnbondHeight => write!(f, "Invalid unbond height"),
            TxError::InvalidRebondHeight => write!(f, "Invalid rebond height"),
            TxError::DupeoutHeightMismatch => write!(f, "DupeoutTx heights don't match"),
            TxError::DupeoutRoundMismatch => write!(f, "DupeoutTx rounds don't match"),
            TxError::DupeoutTypeMismatch => write!(f, "DupeoutTx types don't match"),
            TxError::DupeoutBlockHashesMatch => {
                write!(f, "DupeoutTx blockhashes shouldn't match")
            }
        }
    }
}

/// A [`TxError`] together with the transaction that caused it, as surfaced from block
/// application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidTxError {
    pub tx: Tx,
    pub reason: TxError,
}

impl Display for InvalidTxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid tx: [{:?}] reason: [{}]", self.tx, self.reason)
    }
}

/// The kind of consensus vote a [`Vote`] represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum VoteType {
    Prevote,
    Precommit,
    Commit,
}

/// A consensus vote by a validator.
///
/// The state machine never produces votes; it only verifies them, in two places: commit
/// aggregation when a block is applied, and equivocation evidence in a [`DupeoutTx`].
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Vote {
    pub height: BlockHeight,
    pub round: Round,
    pub vote_type: VoteType,
    pub block_hash: Option<CryptoHash>,
    pub block_parts: PartSetHeader,
    pub signature: SignatureBytes,
}

impl Vote {
    /// The canonical signing payload of this vote: chain ID followed by the vote with a zeroed
    /// signature.
    pub fn sign_bytes(&self, chain_id: ChainID) -> Vec<u8> {
        let mut canonical = self.clone();
        canonical.signature = SignatureBytes::zero();
        (chain_id, canonical).try_to_vec().unwrap()
    }
}

/// Transfers coins between accounts. The excess of inputs over outputs is the fee.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SendTx {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

/// Bonds coins to register a new validator under `pub_key`. The bonded amount becomes the
/// validator's voting power; `unbond_to` records where the principal is paid out when the
/// validator is eventually released.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct BondTx {
    pub inputs: Vec<TxInput>,
    pub unbond_to: Vec<TxOutput>,
    pub pub_key: PubKey,
}

/// Retires a bonded validator, starting its unbonding period. Signed by the validator's own
/// key; `height` must exceed the validator's last commit height so a stale unbond cannot be
/// replayed.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct UnbondTx {
    pub address: Address,
    pub height: BlockHeight,
    pub signature: SignatureBytes,
}

/// Returns an unbonding validator to the bonded set. `height` must name exactly the next block.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct RebondTx {
    pub address: Address,
    pub height: BlockHeight,
    pub signature: SignatureBytes,
}

/// On-chain evidence that a validator signed two conflicting votes at the same height. The
/// accused validator is destroyed and its stake forfeited.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct DupeoutTx {
    pub address: Address,
    pub vote_a: Vote,
    pub vote_b: Vote,
}

/// A transaction. The variant tag is part of the borsh encoding, so sign-bytes of different
/// transaction kinds can never collide.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum Tx {
    Send(SendTx),
    Bond(BondTx),
    Unbond(UnbondTx),
    Rebond(RebondTx),
    Dupeout(DupeoutTx),
}

impl Tx {
    /// The canonical signing payload of this transaction: chain ID followed by the transaction
    /// with every signature field zeroed.
    ///
    /// Input `pub_key` fields are serialized as they stand; callers must canonicalize them
    /// (see the [module docs](self)) before computing sign-bytes.
    pub fn sign_bytes(&self, chain_id: ChainID) -> Vec<u8> {
        let mut canonical = self.clone();
        match &mut canonical {
            Tx::Send(tx) => {
                for input in tx.inputs.iter_mut() {
                    input.signature = SignatureBytes::zero();
                }
            }
            Tx::Bond(tx) => {
                for input in tx.inputs.iter_mut() {
                    input.signature = SignatureBytes::zero();
                }
            }
            Tx::Unbond(tx) => tx.signature = SignatureBytes::zero(),
            Tx::Rebond(tx) => tx.signature = SignatureBytes::zero(),
            // Dupeout evidence is not itself signed; the two votes carry their own signatures.
            Tx::Dupeout(_) => {}
        }
        (chain_id, canonical).try_to_vec().unwrap()
    }
}
