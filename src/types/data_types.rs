/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, AddAssign, Sub, SubAssign},
};

use borsh::{BorshDeserialize, BorshSerialize};

/// Number that uniquely identifies a blockchain.
///
/// The chain ID is mixed into every signing payload (transactions, votes, commits), so two
/// networks with different chain IDs produce disjoint sign-bytes for the same logical message.
/// All nodes replicating the same chain must be configured with the same `ChainID`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshDeserialize, BorshSerialize)]
pub struct ChainID(u64);

impl ChainID {
    /// Create a new `ChainID` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `ChainID`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Height of a block in the chain.
///
/// 0 is the genesis state (no block applied yet); the first block has height 1.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize,
)]
pub struct BlockHeight(u64);

impl BlockHeight {
    /// Create a new `BlockHeight` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `BlockHeight`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: u64) -> Self::Output {
        BlockHeight::new(self.0 + rhs)
    }
}

impl Sub<u64> for BlockHeight {
    type Output = BlockHeight;
    fn sub(self, rhs: u64) -> Self::Output {
        BlockHeight::new(self.0 - rhs)
    }
}

/// Consensus round within a height. Rounds start at 0 and increase every time the round
/// protocol fails to commit a block at the current round.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize,
)]
pub struct Round(u32);

impl Round {
    /// Create a new `Round` wrapping `int`.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the inner `u32` value of this `Round`.
    pub const fn int(&self) -> u32 {
        self.0
    }
}

/// Block time, in milliseconds since the Unix epoch.
///
/// Block times must strictly increase along the chain; this is checked when a block is
/// applied, not here.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new `Timestamp` with an `int` inner value (milliseconds since the Unix epoch).
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Timestamp`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: u64) -> Self::Output {
        Timestamp::new(self.0 + rhs)
    }
}

/// Weight of a specific validator's commits in consensus decisions, equal to the amount of
/// coins it bonded.
///
/// The higher the power, the more weight the validator's commits have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct VotingPower(u64);

impl VotingPower {
    /// Create a new `VotingPower` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `VotingPower`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Sum of the [`VotingPower`]s of validators in a
/// [`ValidatorSet`](super::validator_set::ValidatorSet).
///
/// The inner type that this newtype wraps around is `u128`, which is bigger than the inner
/// `u64` that `VotingPower` wraps around. This is so that summing up large `VotingPower`s does
/// not cause `TotalPower`'s inner value to overflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, BorshDeserialize, BorshSerialize)]
pub struct TotalPower(u128);

impl TotalPower {
    /// Create a new `TotalPower` wrapping `int`.
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    /// Get the inner `u128` value of this `TotalPower`.
    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl Display for TotalPower {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl AddAssign<VotingPower> for TotalPower {
    fn add_assign(&mut self, rhs: VotingPower) {
        self.0.add_assign(rhs.0 as u128)
    }
}

impl SubAssign<VotingPower> for TotalPower {
    fn sub_assign(&mut self, rhs: VotingPower) {
        self.0.sub_assign(rhs.0 as u128)
    }
}

/// Signed round-robin priority counter determining proposer order, weighted by voting power.
///
/// Every accumulator tick adds each validator's voting power to its `Accum`; the validator with
/// the highest `Accum` "wins" the tick and has the set's total voting power subtracted from its
/// counter, which routinely takes it negative.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize,
)]
pub struct Accum(i64);

impl Accum {
    /// Create a new `Accum` wrapping `int`.
    pub const fn new(int: i64) -> Self {
        Self(int)
    }

    /// Get the inner `i64` value of this `Accum`.
    pub const fn int(&self) -> i64 {
        self.0
    }
}

impl AddAssign<VotingPower> for Accum {
    fn add_assign(&mut self, rhs: VotingPower) {
        self.0.add_assign(rhs.0 as i64)
    }
}

impl SubAssign<TotalPower> for Accum {
    fn sub_assign(&mut self, rhs: TotalPower) {
        self.0.sub_assign(rhs.0 as i64)
    }
}

/// 32-byte cryptographic hash.
///
/// Within this crate, `CryptoHash`es are always SHA256 hashes: of blocks, of Merkle tree nodes,
/// or of canonical encodings of state components.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// The all-zero hash, used as the hash of empty collections and empty trees.
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ed25519 digital signature.
///
/// These are produced using the [`ed25519_dalek`] crate, whose main definitions are re-exported
/// from the [`crypto_primitives`](super::crypto_primitives) module.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }

    /// The all-zero signature, substituted for real signatures when computing signing payloads.
    pub const fn zero() -> Self {
        Self([0u8; 64])
    }
}

/// 20-byte account identifier, derived from a public key.
///
/// See [`PubKey::address`](super::crypto_primitives::PubKey::address) for the derivation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Address([u8; 20]);

impl Address {
    /// Create a new `Address` wrapping `bytes`.
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 20]` value of this `Address`.
    pub const fn bytes(&self) -> [u8; 20] {
        self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
