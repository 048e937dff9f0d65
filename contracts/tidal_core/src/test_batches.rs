//! Unbond batch lifecycle tests.

#![cfg(test)]

extern crate std;

use crate::math::PRECISION;
use crate::puppeteer::{BatchTransferAnswer, RequestKind, ResponseAnswer, TxStatus};
use crate::test_helpers::*;
use crate::types::ContractState;
use crate::unbond_batch::UnbondBatchStatus;
use crate::ContractError;
use soroban_sdk::testutils::Address as _;
use soroban_sdk::{vec, Address, Env, String};

/// Bonds and unbonds `amount`, then runs the pipeline until batch 0 is
/// `Unbonding`.
fn walk_to_unbonding(e: &Env, s: &Setup, amount: i128) {
    s.client.bond(&s.user, &s.base.address, &amount, &None, &None);
    s.client.unbond(&s.user, &amount);
    run_to_idle(e, s);
    assert_eq!(
        s.client.unbond_batch(&0).status,
        UnbondBatchStatus::Unbonding
    );
}

/// Moves past the release time and issues the claim carrying the batch
/// transfer.
fn start_withdrawal(e: &Env, s: &Setup) {
    advance_time(e, UNBONDING_PERIOD + SAFE_PERIOD);
    assert_eq!(s.client.tick(&s.admin), ContractState::Claiming);
    assert_eq!(
        s.client.unbond_batch(&0).status,
        UnbondBatchStatus::Withdrawing
    );
}

fn batch_transfer(e: &Env, received: i128) -> soroban_sdk::Vec<ResponseAnswer> {
    vec![
        e,
        ResponseAnswer::BatchTransfer(BatchTransferAnswer {
            batch_ids: vec![e, 0],
            received,
        }),
    ]
}

// ═══════════════════════════════════════════════════════════════════
// 1. Collecting requests
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_unbond_requests_share_current_batch() {
    let e = Env::default();
    let s = setup(&e);
    let other = Address::generate(&e);
    s.base_admin.mint(&other, &10_000);
    s.client.bond(&s.user, &s.base.address, &10_000, &None, &None);
    s.client.bond(&other, &s.base.address, &10_000, &None, &None);

    assert_eq!(s.client.unbond(&s.user, &4_000), 0);
    assert_eq!(s.client.unbond(&other, &6_000), 0);

    let batch = s.client.unbond_batch(&0);
    assert_eq!(batch.status, UnbondBatchStatus::New);
    assert_eq!(batch.unbond_items.len(), 2);
    assert_eq!(batch.total_dasset_amount, 10_000);
    assert_eq!(batch.expected_native_asset_amount, 10_000);
    assert_eq!(s.dasset.balance(&s.user), 6_000);
    assert_eq!(s.client.ledger().total_dasset_supply, 10_000);
}

#[test]
fn test_unbond_more_than_supply_rejected() {
    let e = Env::default();
    let s = setup(&e);
    s.client.bond(&s.user, &s.base.address, &1_000, &None, &None);
    let result = s.client.try_unbond(&s.user, &1_001);
    assert_eq!(result, Err(Ok(ContractError::InvalidAmount)));
}

#[test]
fn test_batch_not_switched_before_switch_time() {
    let e = Env::default();
    let s = setup_with(&e, |cfg| cfg.unbond_batch_switch_time = 3_600);
    s.client.bond(&s.user, &s.base.address, &1_000, &None, &None);
    s.client.unbond(&s.user, &400);

    let visited = run_to_idle(&e, &s);
    assert!(!visited.contains(&ContractState::Unbonding));
    assert_eq!(s.client.unbond_batch(&0).status, UnbondBatchStatus::New);

    advance_time(&e, 3_600);
    assert_eq!(s.client.tick(&s.admin), ContractState::Claiming);
    respond_success(&e, &s);
    assert_eq!(s.client.tick(&s.admin), ContractState::Unbonding);
    assert_eq!(
        s.client.unbond_batch(&0).status,
        UnbondBatchStatus::UnbondRequested
    );
}

#[test]
fn test_admin_switch_opens_next_batch() {
    let e = Env::default();
    let s = setup_with(&e, |cfg| cfg.unbond_batch_switch_time = 3_600);

    let empty = s.client.try_switch_unbond_batch(&s.admin);
    assert_eq!(empty, Err(Ok(ContractError::EmptyBatch)));

    s.client.bond(&s.user, &s.base.address, &1_000, &None, &None);
    s.client.unbond(&s.user, &400);
    assert_eq!(s.client.switch_unbond_batch(&s.admin), 1);
    assert_eq!(s.client.current_unbond_batch(), 1);
    assert_eq!(
        s.client.unbond_batch(&0).status,
        UnbondBatchStatus::UnbondRequested
    );

    assert_eq!(s.client.unbond(&s.user, &100), 1);
    assert_eq!(s.client.unbond_batches(&None, &None).len(), 2);
    assert_eq!(s.client.unbond_batches(&Some(0), &None).len(), 1);
    assert_eq!(s.client.unbond_batches(&None, &Some(1)).len(), 1);
}

// ═══════════════════════════════════════════════════════════════════
// 2. Withdrawal and settlement
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_batch_walks_forward_to_withdrawn() {
    let e = Env::default();
    let s = setup(&e);
    let order = [
        UnbondBatchStatus::New,
        UnbondBatchStatus::UnbondRequested,
        UnbondBatchStatus::Unbonding,
        UnbondBatchStatus::Withdrawing,
        UnbondBatchStatus::Withdrawn,
    ];
    let mut seen = std::vec![s.client.unbond_batch(&0).status];

    s.client.bond(&s.user, &s.base.address, &499_999, &None, &None);
    s.client.unbond(&s.user, &499_999);
    for _ in 0..3 {
        s.client.tick(&s.admin);
        seen.push(s.client.unbond_batch(&0).status);
        respond_success(&e, &s);
    }
    assert_eq!(s.client.tick(&s.admin), ContractState::Idle);
    seen.push(s.client.unbond_batch(&0).status);

    start_withdrawal(&e, &s);
    seen.push(s.client.unbond_batch(&0).status);
    match s.puppeteer.last_request().unwrap().kind {
        RequestKind::ClaimRewardsAndTransfer(msg) => {
            let transfer = msg.withdrawal.transfer().unwrap();
            assert_eq!(transfer.amount, 499_999);
            assert_eq!(transfer.recipient, s.withdrawal_manager);
        }
        other => panic!("unexpected request {:?}", other),
    }
    respond_success_with(&e, &s, batch_transfer(&e, 499_999));
    s.client.tick(&s.admin);
    seen.push(s.client.unbond_batch(&0).status);

    let rank = |status: &UnbondBatchStatus| order.iter().position(|o| o == status).unwrap();
    for pair in seen.windows(2) {
        assert!(rank(&pair[0]) <= rank(&pair[1]), "batch regressed: {:?}", seen);
    }
    assert_eq!(seen.last(), Some(&UnbondBatchStatus::Withdrawn));

    let batch = s.client.unbond_batch(&0);
    assert_eq!(batch.unbonded_amount, Some(499_999));
    assert_eq!(batch.withdrawn_amount, Some(499_999));
    assert_eq!(batch.slashing_effect, Some(PRECISION));
    assert_eq!(s.client.unbond_payout(&0, &499_999), 499_999);
}

#[test]
fn test_under_delivered_batch_has_partial_slashing_effect() {
    let e = Env::default();
    let s = setup(&e);
    walk_to_unbonding(&e, &s, 499_999);
    start_withdrawal(&e, &s);
    respond_success_with(&e, &s, batch_transfer(&e, 400_000));
    s.client.tick(&s.admin);

    let batch = s.client.unbond_batch(&0);
    let effect = batch.slashing_effect.unwrap();
    assert!(effect < PRECISION);
    assert_eq!(effect, 400_000 * PRECISION / 499_999);

    let payout = s.client.unbond_payout(&0, &499_999);
    assert!(payout < 499_999);
    assert!(payout <= 400_000);
    assert!(payout >= 399_999);
}

#[test]
fn test_settlement_falls_back_to_requested_amount() {
    let e = Env::default();
    let s = setup(&e);
    walk_to_unbonding(&e, &s, 10_000);
    start_withdrawal(&e, &s);
    respond_success(&e, &s);
    s.client.tick(&s.admin);

    let batch = s.client.unbond_batch(&0);
    assert_eq!(batch.status, UnbondBatchStatus::Withdrawn);
    assert_eq!(batch.unbonded_amount, Some(10_000));
}

#[test]
fn test_batch_ids_outside_issued_transfer_ignored() {
    let e = Env::default();
    let s = setup(&e);
    walk_to_unbonding(&e, &s, 10_000);
    start_withdrawal(&e, &s);
    respond_success_with(
        &e,
        &s,
        vec![
            &e,
            ResponseAnswer::BatchTransfer(BatchTransferAnswer {
                batch_ids: vec![&e, 7],
                received: 1,
            }),
        ],
    );
    assert_eq!(s.client.tick(&s.admin), ContractState::Idle);

    let batch = s.client.unbond_batch(&0);
    assert_eq!(batch.status, UnbondBatchStatus::Withdrawn);
    assert_eq!(batch.unbonded_amount, Some(10_000));
}

#[test]
fn test_unknown_batch_ids_dropped_from_answer() {
    let e = Env::default();
    let s = setup(&e);
    walk_to_unbonding(&e, &s, 10_000);
    start_withdrawal(&e, &s);
    respond_success_with(
        &e,
        &s,
        vec![
            &e,
            ResponseAnswer::BatchTransfer(BatchTransferAnswer {
                batch_ids: vec![&e, 0, 7, 0],
                received: 9_000,
            }),
        ],
    );
    s.client.tick(&s.admin);

    let batch = s.client.unbond_batch(&0);
    assert_eq!(batch.status, UnbondBatchStatus::Withdrawn);
    assert_eq!(batch.unbonded_amount, Some(9_000));
}

#[test]
fn test_not_ready_before_safe_period() {
    let e = Env::default();
    let s = setup(&e);
    walk_to_unbonding(&e, &s, 10_000);

    advance_time(&e, UNBONDING_PERIOD + SAFE_PERIOD - 1);
    assert_eq!(s.client.tick(&s.admin), ContractState::Idle);
    assert_eq!(
        s.client.unbond_batch(&0).status,
        UnbondBatchStatus::Unbonding
    );
}

#[test]
fn test_payout_requires_withdrawn_batch() {
    let e = Env::default();
    let s = setup(&e);
    walk_to_unbonding(&e, &s, 10_000);
    let result = s.client.try_unbond_payout(&0, &10_000);
    assert_eq!(result, Err(Ok(ContractError::BatchNotWithdrawn)));
    assert_eq!(
        s.client.try_unbond_batch(&42),
        Err(Ok(ContractError::BatchNotFound))
    );
}

// ═══════════════════════════════════════════════════════════════════
// 3. Failure branches
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_unbond_error_marks_batch_failed_then_retries() {
    let e = Env::default();
    let s = setup(&e);
    s.client.bond(&s.user, &s.base.address, &10_000, &None, &None);
    s.client.unbond(&s.user, &10_000);

    assert_eq!(s.client.tick(&s.admin), ContractState::Transferring);
    respond_success(&e, &s);
    assert_eq!(s.client.tick(&s.admin), ContractState::StakingBond);
    respond_success(&e, &s);
    assert_eq!(s.client.tick(&s.admin), ContractState::Unbonding);
    respond_error(&e, &s);

    assert_eq!(s.client.tick(&s.admin), ContractState::Unbonding);
    assert_eq!(
        s.client.unbond_batch(&0).status,
        UnbondBatchStatus::UnbondFailed
    );

    assert_eq!(s.client.tick(&s.admin), ContractState::Unbonding);
    respond_success(&e, &s);
    assert_eq!(s.client.tick(&s.admin), ContractState::Idle);

    let batch = s.client.unbond_batch(&0);
    assert_eq!(batch.status, UnbondBatchStatus::Unbonding);
    assert!(batch.status_timestamps.unbond_failed.is_some());
}

#[test]
fn test_failed_withdrawal_goes_to_emergency() {
    let e = Env::default();
    let s = setup(&e);
    walk_to_unbonding(&e, &s, 10_000);
    start_withdrawal(&e, &s);
    respond_error(&e, &s);
    assert_eq!(s.client.tick(&s.admin), ContractState::Claiming);

    assert_eq!(
        s.client.unbond_batch(&0).status,
        UnbondBatchStatus::WithdrawingEmergency
    );
    match s.puppeteer.last_request().unwrap().kind {
        RequestKind::Transfer(msg) => {
            assert_eq!(msg.items.len(), 1);
            let item = msg.items.get(0).unwrap();
            assert_eq!(item.recipient, String::from_str(&e, "cosmos1emergency"));
            assert_eq!(item.coin.denom, String::from_str(&e, "uatom"));
            assert_eq!(item.coin.amount, 10_000);
        }
        other => panic!("unexpected request {:?}", other),
    }
    assert_eq!(s.client.tx_state().status, TxStatus::WaitingForAck);
    respond_success(&e, &s);
    assert_eq!(s.client.tick(&s.admin), ContractState::Idle);
    assert_eq!(
        s.client.unbond_batch(&0).status,
        UnbondBatchStatus::WithdrawingEmergency
    );
    let early = s.client.try_unbond_payout(&0, &10_000);
    assert_eq!(early, Err(Ok(ContractError::BatchNotWithdrawn)));

    let too_much = s.client.try_process_emergency_batch(&s.admin, &0, &10_001);
    assert_eq!(too_much, Err(Ok(ContractError::UnbondedAmountExceedsExpected)));
    let zero = s.client.try_process_emergency_batch(&s.admin, &0, &0);
    assert_eq!(zero, Err(Ok(ContractError::InvalidAmount)));

    let batch = s.client.process_emergency_batch(&s.admin, &0, &8_000);
    assert_eq!(batch.status, UnbondBatchStatus::WithdrawnEmergency);
    assert_eq!(batch.unbonded_amount, Some(8_000));
    assert_eq!(s.client.unbond_payout(&0, &10_000), 8_000);

    let again = s.client.try_process_emergency_batch(&s.admin, &0, &8_000);
    assert_eq!(again, Err(Ok(ContractError::InvalidBatchStatus)));
}

#[test]
fn test_unbonding_waits_for_backing_to_be_delegated() {
    let e = Env::default();
    let s = setup(&e);
    s.client.bond(&s.user, &s.base.address, &1_000, &None, &None);
    run_to_idle(&e, &s);

    assert_eq!(s.client.tick(&s.admin), ContractState::Claiming);
    s.client.bond(&s.user, &s.base.address, &5_000, &None, &None);
    s.client.unbond(&s.user, &5_000);
    respond_success(&e, &s);

    // Only 1_000 is delegated; the rest still sits with the core.
    let requests = s.puppeteer.request_count();
    assert_eq!(s.client.tick(&s.admin), ContractState::Idle);
    assert_eq!(s.puppeteer.request_count(), requests);
    assert_eq!(
        s.client.unbond_batch(&0).status,
        UnbondBatchStatus::UnbondRequested
    );
    assert_eq!(s.client.ledger().pending_native_transfer, 5_000);

    let visited = run_to_idle(&e, &s);
    assert_eq!(visited.first(), Some(&ContractState::Transferring));
    assert!(visited.contains(&ContractState::StakingBond));
    assert!(visited.contains(&ContractState::Unbonding));

    let batch = s.client.unbond_batch(&0);
    assert_eq!(batch.status, UnbondBatchStatus::Unbonding);
    assert_eq!(s.client.ledger().pending_native_transfer, 0);
    assert_eq!(
        s.client.delegations().get(String::from_str(&e, VALIDATOR)),
        Some(1_000)
    );
}

#[test]
fn test_emergency_requires_emergency_status() {
    let e = Env::default();
    let s = setup(&e);
    walk_to_unbonding(&e, &s, 10_000);
    let result = s.client.try_process_emergency_batch(&s.admin, &0, &1_000);
    assert_eq!(result, Err(Ok(ContractError::InvalidBatchStatus)));
}

// ═══════════════════════════════════════════════════════════════════
// 4. Transition guard
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_transition_graph() {
    use UnbondBatchStatus::*;
    let all = [
        New,
        UnbondRequested,
        UnbondFailed,
        Unbonding,
        Withdrawing,
        Withdrawn,
        WithdrawingEmergency,
        WithdrawnEmergency,
    ];
    let allowed = [
        (New, UnbondRequested),
        (UnbondRequested, Unbonding),
        (UnbondRequested, UnbondFailed),
        (UnbondFailed, Unbonding),
        (Unbonding, Withdrawing),
        (Withdrawing, Withdrawn),
        (Withdrawing, WithdrawingEmergency),
        (WithdrawingEmergency, WithdrawnEmergency),
    ];
    for from in all {
        for to in all {
            assert_eq!(
                from.can_transition_to(to),
                allowed.contains(&(from, to)),
                "{:?} -> {:?}",
                from,
                to
            );
        }
    }
}
