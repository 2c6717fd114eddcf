/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Accounts and the input/output halves of coin transfers.

use borsh::{BorshDeserialize, BorshSerialize};

use super::crypto_primitives::PubKey;
use super::data_types::{Address, SignatureBytes};
use super::transaction::TxError;

/// A coin-holding account.
///
/// Accounts are created lazily the first time an address receives coins, with a `Nil` pub key
/// and sequence 0, and are never deleted. The pub key is learned ("adopted") from the first
/// transaction input that spends from the account. `sequence` counts successful spends and is
/// the replay guard: every input must carry `sequence + 1`.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Account {
    pub address: Address,
    pub pub_key: PubKey,
    pub sequence: u64,
    pub balance: u64,
}

/// The spending half of a transfer: which account pays, how much, and the proof that the
/// account holder authorized it.
///
/// `pub_key` is `Nil` if the account's key is already known; otherwise it must carry the
/// account's key, revealing it to the chain.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct TxInput {
    pub address: Address,
    pub amount: u64,
    pub sequence: u64,
    pub signature: SignatureBytes,
    pub pub_key: PubKey,
}

impl TxInput {
    /// Check the input's basic shape. Signature, sequence, and funds checks require account
    /// state and happen in the transaction interpreter.
    pub fn validate_basic(&self) -> Result<(), TxError> {
        if self.amount == 0 {
            return Err(TxError::InvalidAmount);
        }
        Ok(())
    }
}

/// The receiving half of a transfer. Any address may receive.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct TxOutput {
    pub address: Address,
    pub amount: u64,
}

impl TxOutput {
    pub fn validate_basic(&self) -> Result<(), TxError> {
        if self.amount == 0 {
            return Err(TxError::InvalidAmount);
        }
        Ok(())
    }
}
