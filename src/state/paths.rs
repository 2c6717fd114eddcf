/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Keys and key prefixes of the state's variables in the key-value store.

/// The key under which the state blob is persisted. Fixed; part of the on-disk contract.
pub(super) const STATE: &[u8] = b"stateKey";

/// Namespace of the account tree's nodes.
pub(super) const ACCOUNT_TREE: &[u8] = b"accounts/";

/// Namespace of the validator-info tree's nodes.
pub(super) const VALIDATOR_INFO_TREE: &[u8] = b"validatorInfos/";
