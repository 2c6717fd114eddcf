/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines the [`KVStore`] trait, which specifies the required interface for the key-value
//! store provided by the user, and the [`WriteBatch`] trait through which all writes flow.
//!
//! The state machine persists everything — Merkle tree nodes and the state blob — through a
//! single [`WriteBatch`] per save, so a store whose `write` is atomic gives the whole state an
//! atomic commit.

/// A persistent byte-key byte-value store with atomic batch writes.
///
/// Handles are cheap to `Clone` and clones refer to the same underlying store (like a database
/// connection handle).
pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    /// Atomically apply all of the operations collected in `wb`.
    fn write(&mut self, wb: Self::WriteBatch);
}

/// The read half of a [`KVStore`].
pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
}

/// A set of write operations that a [`KVStore`] applies atomically.
pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// Takes references to two byteslices and returns a vector containing the bytes of the first
/// one, and then the bytes of the second one.
pub(crate) fn combine(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
