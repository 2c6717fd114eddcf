/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Merkle hashing utilities and the authenticated ordered map ([`MerkleTree`]) that the state's
//! account and validator-info tables are built on.

pub mod tree;

pub use tree::MerkleTree;

use sha2::Digest;

use crate::types::crypto_primitives::CryptoHasher;
use crate::types::data_types::CryptoHash;

/// The SHA256 of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> CryptoHash {
    CryptoHash::new(CryptoHasher::digest(bytes).into())
}

/// Aggregate a list of hashes into a single root by building a simple (unbalanced-at-the-edges)
/// binary Merkle tree over them: the list is split in half, each half is aggregated
/// recursively, and the two sub-roots are hashed together.
///
/// The empty list aggregates to [`CryptoHash::zero`]; a single hash aggregates to itself.
pub fn hash_from_hashes(hashes: &[CryptoHash]) -> CryptoHash {
    match hashes.len() {
        0 => CryptoHash::zero(),
        1 => hashes[0],
        len => {
            let split = (len + 1) / 2;
            let left = hash_from_hashes(&hashes[..split]);
            let right = hash_from_hashes(&hashes[split..]);
            let mut hasher = CryptoHasher::new();
            hasher.update(&left.bytes());
            hasher.update(&right.bytes());
            CryptoHash::new(hasher.finalize().into())
        }
    }
}
