//! The validator lifecycle: bonding, explicit and implicit unbonding, the unbonding-period
//! release, rebonding, and destruction on equivocation evidence.

mod common;

use stakechain_rs::state::{UNBONDING_PERIOD, VALIDATOR_TIMEOUT};
use stakechain_rs::types::data_types::{BlockHeight, Round, TotalPower, VotingPower};
use stakechain_rs::types::transaction::{TxError, VoteType};

use common::*;

#[test]
fn bond_tx_registers_validator() {
    let v1 = gen_keypair();
    let new_validator = gen_keypair();
    let alice = gen_keypair();
    let mut state = genesis_state(&[(&v1, 100)], &[(&alice, 1_000)]);

    let tx = bond_tx(&state, &alice, 1, 500, &new_validator);
    state.exec_tx(&tx).unwrap();

    // The coins left alice and became voting power, not a payout.
    assert_eq!(state.get_account(&alice.address()).unwrap().balance, 500);
    let (_, validator) = state
        .bonded_validators
        .get_by_address(&new_validator.address())
        .unwrap();
    assert_eq!(validator.voting_power, VotingPower::new(500));
    assert_eq!(validator.bond_height, state.last_block_height + 1);
    assert_eq!(
        state.bonded_validators.total_voting_power(),
        TotalPower::new(600)
    );

    let info = state
        .get_validator_info(&new_validator.address())
        .expect("bonding creates the validator's info record");
    assert_eq!(info.first_bond_height, state.last_block_height + 1);
    assert_eq!(info.first_bond_amount, 500);
    assert_eq!(info.unbond_to[0].address, alice.address());
    assert!(info.released_height.is_none());

    // Bonding the same pub key twice is not supported.
    let tx = bond_tx(&state, &alice, 2, 100, &new_validator);
    assert_eq!(state.exec_tx(&tx), Err(TxError::ValidatorAlreadyRegistered));
}

#[test]
fn unbond_requires_fresh_height() {
    let v1 = gen_keypair();
    let mut state = genesis_state(&[(&v1, 100)], &[]);
    apply_block(&mut state, vec![], &[]).unwrap();
    apply_block(&mut state, vec![], &[&v1]).unwrap();

    // v1's last commit height is now 1; an unbond at height 1 is stale.
    assert_eq!(
        state
            .clone()
            .exec_tx(&unbond_tx(&v1, BlockHeight::new(1))),
        Err(TxError::InvalidUnbondHeight)
    );
    assert!(state
        .clone()
        .exec_tx(&unbond_tx(&v1, BlockHeight::new(2)))
        .is_ok());
}

#[test]
fn unbond_then_release_returns_principal() {
    let v1 = gen_keypair();
    let v2 = gen_keypair();
    let mut state = genesis_state(&[(&v1, 800), (&v2, 200)], &[]);
    apply_block(&mut state, vec![], &[]).unwrap();

    // v2 retires at block 2.
    apply_block(
        &mut state,
        vec![unbond_tx(&v2, BlockHeight::new(2))],
        &[&v1, &v2],
    )
    .unwrap();
    let (_, unbonding) = state
        .unbonding_validators
        .get_by_address(&v2.address())
        .unwrap();
    assert_eq!(unbonding.unbond_height, BlockHeight::new(2));
    assert!(!state.bonded_validators.contains(&v2.address()));
    assert!(state.get_account(&v2.address()).is_none());

    // Fast-forward the chain to the end of the unbonding period, keeping v1 fresh so it
    // doesn't time out in the same block.
    state.last_block_height = BlockHeight::new(2 + UNBONDING_PERIOD);
    let mut v1_validator = state
        .bonded_validators
        .get_by_address(&v1.address())
        .unwrap()
        .1
        .clone();
    v1_validator.last_commit_height = state.last_block_height;
    state.bonded_validators.update(v1_validator);

    let block = apply_block(&mut state, vec![], &[&v1]).unwrap();

    // v2 left the unbonding set and its principal came back to its unbond_to output.
    assert!(state.unbonding_validators.is_empty());
    let info = state.get_validator_info(&v2.address()).unwrap();
    assert_eq!(info.released_height, Some(block.height));
    assert_eq!(state.get_account(&v2.address()).unwrap().balance, 200);
}

#[test]
fn rebond_returns_validator_to_bonded_set() {
    let v1 = gen_keypair();
    let v2 = gen_keypair();
    let mut state = genesis_state(&[(&v1, 800), (&v2, 200)], &[]);
    apply_block(&mut state, vec![], &[]).unwrap();
    apply_block(
        &mut state,
        vec![unbond_tx(&v2, BlockHeight::new(2))],
        &[&v1, &v2],
    )
    .unwrap();

    // A rebond must name exactly the next block.
    assert_eq!(
        state
            .clone()
            .exec_tx(&rebond_tx(&v2, BlockHeight::new(5))),
        Err(TxError::InvalidRebondHeight)
    );

    apply_block(
        &mut state,
        vec![rebond_tx(&v2, BlockHeight::new(3))],
        &[&v1],
    )
    .unwrap();

    assert!(state.unbonding_validators.is_empty());
    let (_, validator) = state
        .bonded_validators
        .get_by_address(&v2.address())
        .unwrap();
    assert_eq!(validator.bond_height, BlockHeight::new(3));
    assert_eq!(
        state.bonded_validators.total_voting_power(),
        TotalPower::new(1_000)
    );
}

#[test]
fn silent_validator_times_out() {
    let v1 = gen_keypair();
    let v2 = gen_keypair();
    let mut state = genesis_state(&[(&v1, 800), (&v2, 200)], &[]);
    apply_block(&mut state, vec![], &[]).unwrap();

    // v1 signs every block; v2 never does. v2's last commit height stays 0, so it times out
    // at the first block whose height exceeds 0 + VALIDATOR_TIMEOUT.
    for expected_height in 2..=VALIDATOR_TIMEOUT {
        apply_block(&mut state, vec![], &[&v1]).unwrap();
        assert_eq!(state.last_block_height, BlockHeight::new(expected_height));
        assert!(state.bonded_validators.contains(&v2.address()));
    }

    apply_block(&mut state, vec![], &[&v1]).unwrap();
    assert_eq!(
        state.last_block_height,
        BlockHeight::new(VALIDATOR_TIMEOUT + 1)
    );
    assert!(!state.bonded_validators.contains(&v2.address()));
    let (_, timed_out) = state
        .unbonding_validators
        .get_by_address(&v2.address())
        .unwrap();
    assert_eq!(timed_out.unbond_height, BlockHeight::new(VALIDATOR_TIMEOUT + 1));
    assert!(state.bonded_validators.contains(&v1.address()));
}

#[test]
fn dupeout_destroys_equivocating_validator() {
    let v1 = gen_keypair();
    let v2 = gen_keypair();
    let mut state = genesis_state(&[(&v1, 60), (&v2, 40)], &[]);

    // Two precommits by v1 at the same height and round for different blocks.
    let vote_a = signed_vote(&v1, BlockHeight::new(5), Round::new(1), VoteType::Precommit, 1);
    let vote_b = signed_vote(&v1, BlockHeight::new(5), Round::new(1), VoteType::Precommit, 2);
    let block = apply_block(&mut state, vec![dupeout_tx(&v1, vote_a, vote_b)], &[]).unwrap();

    assert!(!state.bonded_validators.contains(&v1.address()));
    assert!(!state.unbonding_validators.contains(&v1.address()));
    assert_eq!(
        state.bonded_validators.total_voting_power(),
        TotalPower::new(40)
    );
    let info = state.get_validator_info(&v1.address()).unwrap();
    assert_eq!(info.destroyed_height, Some(block.height));
    assert_eq!(info.destroyed_amount, 60);
}

#[test]
fn dupeout_rejects_votes_that_do_not_conflict() {
    let v1 = gen_keypair();
    let state = genesis_state(&[(&v1, 100)], &[]);

    let base = |height: u64, round: u32, vote_type: VoteType, hash_byte: u8| {
        signed_vote(
            &v1,
            BlockHeight::new(height),
            Round::new(round),
            vote_type,
            hash_byte,
        )
    };

    // Different heights.
    let tx = dupeout_tx(
        &v1,
        base(5, 1, VoteType::Precommit, 1),
        base(6, 1, VoteType::Precommit, 2),
    );
    assert_eq!(state.clone().exec_tx(&tx), Err(TxError::DupeoutHeightMismatch));

    // Different rounds (no commit involved).
    let tx = dupeout_tx(
        &v1,
        base(5, 1, VoteType::Precommit, 1),
        base(5, 2, VoteType::Precommit, 2),
    );
    assert_eq!(state.clone().exec_tx(&tx), Err(TxError::DupeoutRoundMismatch));

    // Different vote types.
    let tx = dupeout_tx(
        &v1,
        base(5, 1, VoteType::Prevote, 1),
        base(5, 1, VoteType::Precommit, 2),
    );
    assert_eq!(state.clone().exec_tx(&tx), Err(TxError::DupeoutTypeMismatch));

    // Same block hash: not an equivocation.
    let tx = dupeout_tx(
        &v1,
        base(5, 1, VoteType::Precommit, 1),
        base(5, 1, VoteType::Precommit, 1),
    );
    assert_eq!(
        state.clone().exec_tx(&tx),
        Err(TxError::DupeoutBlockHashesMatch)
    );

    // A vote signed by somebody else is not evidence against v1.
    let impostor = gen_keypair();
    let tx = dupeout_tx(
        &v1,
        base(5, 1, VoteType::Precommit, 1),
        signed_vote(
            &impostor,
            BlockHeight::new(5),
            Round::new(1),
            VoteType::Precommit,
            2,
        ),
    );
    assert_eq!(state.clone().exec_tx(&tx), Err(TxError::InvalidSignature));
}

#[test]
fn dupeout_accepts_signing_after_commit() {
    let v1 = gen_keypair();
    let mut state = genesis_state(&[(&v1, 100)], &[]);

    // v1 committed at round 1 and then kept signing at round 2. Even with matching block
    // hashes and differing types, that is the offense.
    let vote_a = signed_vote(&v1, BlockHeight::new(5), Round::new(1), VoteType::Commit, 1);
    let vote_b = signed_vote(&v1, BlockHeight::new(5), Round::new(2), VoteType::Prevote, 1);
    state
        .exec_tx(&dupeout_tx(&v1, vote_a, vote_b))
        .unwrap();

    assert!(!state.bonded_validators.contains(&v1.address()));
    assert_eq!(
        state.get_validator_info(&v1.address()).unwrap().destroyed_amount,
        100
    );
}

#[test]
fn every_validator_keeps_an_info_record() {
    let v1 = gen_keypair();
    let v2 = gen_keypair();
    let alice = gen_keypair();
    let new_validator = gen_keypair();
    let mut state = genesis_state(&[(&v1, 800), (&v2, 200)], &[(&alice, 1_000)]);
    apply_block(&mut state, vec![], &[]).unwrap();
    let txs = vec![
        bond_tx(&state, &alice, 1, 500, &new_validator),
        unbond_tx(&v2, BlockHeight::new(2)),
    ];
    apply_block(&mut state, txs, &[&v1, &v2]).unwrap();

    // Both sets are disjoint and every member has an info record.
    for validator in state
        .bonded_validators
        .validators()
        .chain(state.unbonding_validators.validators())
    {
        let info = state.get_validator_info(&validator.address).unwrap();
        assert_eq!(info.address, validator.address);
        assert_eq!(validator.pub_key.address(), validator.address);
        assert!(
            !(state.bonded_validators.contains(&validator.address)
                && state.unbonding_validators.contains(&validator.address))
        );
    }
    assert_eq!(state.bonded_validators.len(), 2);
    assert_eq!(state.unbonding_validators.len(), 1);
}
