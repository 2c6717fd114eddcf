//! Shared fixtures for the integration tests: an in-memory key-value store, keypair and
//! genesis builders, and helpers that sign transactions, commits, and blocks the way the
//! outer node would.

#![allow(dead_code)]

pub mod mem_db;

use ed25519_dalek::SigningKey;
use rand_core::OsRng;

use stakechain_rs::merkle::hash_bytes;
use stakechain_rs::state::{GenesisAccount, GenesisValidator, State};
use stakechain_rs::types::account::{TxInput, TxOutput};
use stakechain_rs::types::block::{
    Block, BlockData, BlockError, Commit, PartSetHeader, Validation,
};
use stakechain_rs::types::crypto_primitives::{Keypair, PubKey};
use stakechain_rs::types::data_types::{
    Address, BlockHeight, ChainID, CryptoHash, Round, SignatureBytes, Timestamp,
};
use stakechain_rs::types::transaction::{
    BondTx, DupeoutTx, RebondTx, SendTx, Tx, UnbondTx, Vote, VoteType,
};

use self::mem_db::MemDB;

pub const CHAIN_ID: ChainID = ChainID::new(92);

pub fn gen_keypair() -> Keypair {
    Keypair::new(SigningKey::generate(&mut OsRng))
}

/// A genesis state over a fresh `MemDB`, at time 0 and height 0.
pub fn genesis_state(validators: &[(&Keypair, u64)], accounts: &[(&Keypair, u64)]) -> State<MemDB> {
    genesis_state_on(MemDB::new(), validators, accounts)
}

/// A genesis state over a caller-provided store, for save/load round trips.
pub fn genesis_state_on(
    db: MemDB,
    validators: &[(&Keypair, u64)],
    accounts: &[(&Keypair, u64)],
) -> State<MemDB> {
    let genesis_validators: Vec<GenesisValidator> = validators
        .iter()
        .map(|(keypair, amount)| GenesisValidator {
            pub_key: keypair.public(),
            amount: *amount,
        })
        .collect();
    let genesis_accounts: Vec<GenesisAccount> = accounts
        .iter()
        .map(|(keypair, amount)| GenesisAccount {
            address: keypair.address(),
            amount: *amount,
        })
        .collect();
    State::from_genesis(
        db,
        CHAIN_ID,
        Timestamp::new(0),
        &genesis_accounts,
        &genesis_validators,
    )
}

/// An input spending from `from`'s account, revealing the pub key iff the account doesn't
/// know it yet.
pub fn input_from(state: &State<MemDB>, from: &Keypair, amount: u64, sequence: u64) -> TxInput {
    let account = state
        .get_account(&from.address())
        .expect("input_from expects the sender's account to exist");
    TxInput {
        address: from.address(),
        amount,
        sequence,
        signature: SignatureBytes::zero(),
        pub_key: if account.pub_key.is_nil() {
            from.public()
        } else {
            PubKey::Nil
        },
    }
}

/// A signed single-input single-output SendTx.
pub fn send_tx(
    state: &State<MemDB>,
    from: &Keypair,
    sequence: u64,
    amount: u64,
    to: Address,
    out_amount: u64,
) -> Tx {
    let mut tx = SendTx {
        inputs: vec![input_from(state, from, amount, sequence)],
        outputs: vec![TxOutput {
            address: to,
            amount: out_amount,
        }],
    };
    tx.inputs[0].signature = from.sign(&Tx::Send(tx.clone()).sign_bytes(CHAIN_ID));
    Tx::Send(tx)
}

/// A signed BondTx registering `new_validator`, funded by `funder` and unbonding back to
/// `funder`'s address.
pub fn bond_tx(
    state: &State<MemDB>,
    funder: &Keypair,
    sequence: u64,
    amount: u64,
    new_validator: &Keypair,
) -> Tx {
    let mut tx = BondTx {
        inputs: vec![input_from(state, funder, amount, sequence)],
        unbond_to: vec![TxOutput {
            address: funder.address(),
            amount,
        }],
        pub_key: new_validator.public(),
    };
    tx.inputs[0].signature = funder.sign(&Tx::Bond(tx.clone()).sign_bytes(CHAIN_ID));
    Tx::Bond(tx)
}

pub fn unbond_tx(validator: &Keypair, height: BlockHeight) -> Tx {
    let mut tx = UnbondTx {
        address: validator.address(),
        height,
        signature: SignatureBytes::zero(),
    };
    tx.signature = validator.sign(&Tx::Unbond(tx.clone()).sign_bytes(CHAIN_ID));
    Tx::Unbond(tx)
}

pub fn rebond_tx(validator: &Keypair, height: BlockHeight) -> Tx {
    let mut tx = RebondTx {
        address: validator.address(),
        height,
        signature: SignatureBytes::zero(),
    };
    tx.signature = validator.sign(&Tx::Rebond(tx.clone()).sign_bytes(CHAIN_ID));
    Tx::Rebond(tx)
}

/// A signed vote, for crafting equivocation evidence.
pub fn signed_vote(
    signer: &Keypair,
    height: BlockHeight,
    round: Round,
    vote_type: VoteType,
    block_hash_byte: u8,
) -> Vote {
    let mut vote = Vote {
        height,
        round,
        vote_type,
        block_hash: Some(CryptoHash::new([block_hash_byte; 32])),
        block_parts: PartSetHeader::zero(),
        signature: SignatureBytes::zero(),
    };
    vote.signature = signer.sign(&vote.sign_bytes(CHAIN_ID));
    vote
}

pub fn dupeout_tx(accused: &Keypair, vote_a: Vote, vote_b: Vote) -> Tx {
    Tx::Dupeout(DupeoutTx {
        address: accused.address(),
        vote_a,
        vote_b,
    })
}

/// Commit slots for the next block: one slot per bonded validator in set order, filled for
/// the validators whose keypair appears in `signers`.
pub fn commits_from(state: &State<MemDB>, signers: &[&Keypair]) -> Vec<Option<Commit>> {
    state
        .bonded_validators
        .validators()
        .map(|validator| {
            signers
                .iter()
                .find(|keypair| keypair.address() == validator.address)
                .map(|keypair| {
                    let round = Round::new(0);
                    let vote = Vote {
                        height: state.last_block_height,
                        round,
                        vote_type: VoteType::Commit,
                        block_hash: state.last_block_hash,
                        block_parts: state.last_block_parts,
                        signature: SignatureBytes::zero(),
                    };
                    Commit {
                        round,
                        signature: keypair.sign(&vote.sign_bytes(CHAIN_ID)),
                    }
                })
        })
        .collect()
}

/// The next block on top of `state`, not yet applied (so `state_hash` is `None`).
pub fn next_block(state: &State<MemDB>, commits: Vec<Option<Commit>>, txs: Vec<Tx>) -> Block {
    Block {
        height: state.last_block_height + 1,
        time: state.last_block_time + 1_000,
        last_block_hash: state.last_block_hash,
        last_block_parts: state.last_block_parts,
        state_hash: None,
        validation: Validation { commits },
        data: BlockData { txs },
    }
}

/// An arbitrary (but deterministic) parts header for a block.
pub fn parts_header_for(block: &Block) -> PartSetHeader {
    PartSetHeader {
        total: 1,
        hash: hash_bytes(&block.height.int().to_le_bytes()),
    }
}

/// Build the next block carrying `txs`, with commits signed by `signers`, and apply it as a
/// proposer would (stamping the state hash). Returns the applied block.
pub fn apply_block(
    state: &mut State<MemDB>,
    txs: Vec<Tx>,
    signers: &[&Keypair],
) -> Result<Block, BlockError> {
    let commits = if state.last_block_height == BlockHeight::new(0) {
        Vec::new()
    } else {
        commits_from(state, signers)
    };
    let mut block = next_block(state, commits, txs);
    let parts = parts_header_for(&block);
    state.append_block(&mut block, parts, false)?;
    Ok(block)
}

/// Sum of all account balances, for conservation checks.
pub fn total_balance(state: &State<MemDB>) -> u64 {
    let mut total = 0u64;
    state.iterate_accounts(|account| {
        total += account.balance;
        false
    });
    total
}
