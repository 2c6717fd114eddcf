/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the types that make up the state machine's data model: passive byte-storing
//! newtypes, cryptographic primitives, accounts, transactions, blocks, and validator sets.

pub mod account;

pub mod block;

pub mod crypto_primitives;

pub mod data_types;

pub mod transaction;

pub mod validator_set;
