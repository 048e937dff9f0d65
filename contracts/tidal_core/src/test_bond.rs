//! Bonding, minting and exchange-rate tests.

#![cfg(test)]

extern crate std;

use crate::math::PRECISION;
use crate::puppeteer::{ClaimRewardsAnswer, RequestKind, ResponseAnswer, ValidatorAmount};
use crate::test_helpers::*;
use crate::types::ContractState;
use crate::ContractError;
use soroban_sdk::testutils::Address as _;
use soroban_sdk::token::StellarAssetClient;
use soroban_sdk::{vec, Address, Env, String};

/// Bonds `amount`, stakes it and claims `rewards` so that the rate moves
/// above 1.
fn accrue_rewards(e: &Env, s: &Setup, amount: i128, rewards: i128) {
    s.client.bond(&s.user, &s.base.address, &amount, &None, &None);
    run_to_idle(e, s);

    assert_eq!(s.client.tick(&s.admin), ContractState::Claiming);
    respond_success_with(
        e,
        s,
        vec![
            e,
            ResponseAnswer::ClaimRewards(ClaimRewardsAnswer {
                rewards,
                delegations: None,
            }),
        ],
    );
    assert_eq!(s.client.tick(&s.admin), ContractState::StakingRewards);
}

// ═══════════════════════════════════════════════════════════════════
// 1. Bond at the initial rate
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_first_bond_mints_one_to_one() {
    let e = Env::default();
    let s = setup(&e);

    let minted = s.client.bond(&s.user, &s.base.address, &500_000, &None, &None);

    assert_eq!(minted, 500_000);
    assert_eq!(s.dasset.balance(&s.user), 500_000);
    assert_eq!(s.base.balance(&s.core_id), 500_000);
    assert_eq!(s.base.balance(&s.user), DEFAULT_MINT - 500_000);
    assert_eq!(s.client.exchange_rate(), PRECISION);

    let ledger = s.client.ledger();
    assert_eq!(ledger.total_bonded, 500_000);
    assert_eq!(ledger.total_dasset_supply, 500_000);
    assert_eq!(ledger.pending_native_transfer, 500_000);
}

#[test]
fn test_bond_mints_to_receiver() {
    let e = Env::default();
    let s = setup(&e);
    let receiver = Address::generate(&e);
    let referral = Some(String::from_str(&e, "partner-42"));

    s.client
        .bond(&s.user, &s.base.address, &1_000, &Some(receiver.clone()), &referral);

    assert_eq!(s.dasset.balance(&receiver), 1_000);
    assert_eq!(s.dasset.balance(&s.user), 0);
}

// ═══════════════════════════════════════════════════════════════════
// 2. Rate above 1
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_bond_at_rate_1_01_floors_minted_amount() {
    let e = Env::default();
    let s = setup(&e);
    accrue_rewards(&e, &s, 1_000_000, 10_000);

    assert_eq!(s.client.exchange_rate(), 1_010_000_000_000_000_000);

    let minted = s.client.bond(&s.user, &s.base.address, &500_000, &None, &None);
    assert_eq!(minted, 495_049);
}

#[test]
fn test_unbond_expected_amount_fixed_at_request_time() {
    let e = Env::default();
    let s = setup(&e);
    accrue_rewards(&e, &s, 1_000_000, 10_000);
    s.client.bond(&s.user, &s.base.address, &500_000, &None, &None);

    let batch_id = s.client.unbond(&s.user, &495_049);
    let batch = s.client.unbond_batch(&batch_id);
    let item = batch.unbond_items.get(0).unwrap();

    // floor(495049 * 1_510_000 / 1_495_049)
    assert_eq!(item.expected_amount, 499_999);
    assert_eq!(batch.expected_native_asset_amount, 499_999);
    assert_eq!(batch.total_dasset_amount, 495_049);
}

#[test]
fn test_fee_is_taken_from_claimed_rewards() {
    let e = Env::default();
    let s = setup_with(&e, |cfg| cfg.fee_bps = 1_000);
    accrue_rewards(&e, &s, 1_000_000, 10_000);

    let ledger = s.client.ledger();
    assert_eq!(ledger.pending_rewards, 9_000);
    assert_eq!(ledger.pending_fee, 1_000);

    match s.puppeteer.last_request().unwrap().kind {
        RequestKind::Delegate(msg) => {
            assert_eq!(msg.items.get(0).unwrap().amount, 9_000);
            assert_eq!(msg.fee.transfer().unwrap().amount, 1_000);
        }
        other => panic!("unexpected request {:?}", other),
    }

    respond_success(&e, &s);
    s.client.tick(&s.admin);
    let ledger = s.client.ledger();
    assert_eq!(ledger.pending_rewards, 0);
    assert_eq!(ledger.pending_fee, 0);
    assert_eq!(ledger.total_bonded, 1_009_000);
}

#[test]
fn test_confirmed_slashing_lowers_rate() {
    let e = Env::default();
    let s = setup(&e);
    s.client.bond(&s.user, &s.base.address, &1_000_000, &None, &None);
    run_to_idle(&e, &s);

    assert_eq!(s.client.tick(&s.admin), ContractState::Claiming);
    respond_success_with(
        &e,
        &s,
        vec![
            &e,
            ResponseAnswer::ClaimRewards(ClaimRewardsAnswer {
                rewards: 0,
                delegations: Some(vec![
                    &e,
                    ValidatorAmount {
                        validator: String::from_str(&e, VALIDATOR),
                        amount: 900_000,
                    },
                ]),
            }),
        ],
    );
    s.client.tick(&s.admin);

    let ledger = s.client.ledger();
    assert_eq!(ledger.total_bonded, 900_000);
    assert_eq!(ledger.slashed_total, 100_000);
    assert_eq!(s.client.exchange_rate(), 900_000_000_000_000_000);
    assert_eq!(
        s.client
            .delegations()
            .get(String::from_str(&e, VALIDATOR)),
        Some(900_000)
    );
}

#[test]
fn test_bond_rejected_after_total_slashing() {
    let e = Env::default();
    let s = setup(&e);
    s.client.bond(&s.user, &s.base.address, &1_000_000, &None, &None);
    run_to_idle(&e, &s);

    assert_eq!(s.client.tick(&s.admin), ContractState::Claiming);
    respond_success_with(
        &e,
        &s,
        vec![
            &e,
            ResponseAnswer::ClaimRewards(ClaimRewardsAnswer {
                rewards: 0,
                delegations: Some(soroban_sdk::Vec::new(&e)),
            }),
        ],
    );
    s.client.tick(&s.admin);

    let ledger = s.client.ledger();
    assert_eq!(ledger.total_bonded, 0);
    assert_eq!(ledger.total_dasset_supply, 1_000_000);

    let other = Address::generate(&e);
    s.base_admin.mint(&other, &10_000);
    let result = s.client.try_bond(&other, &s.base.address, &10_000, &None, &None);
    assert_eq!(result, Err(Ok(ContractError::NoBacking)));
    assert_eq!(s.dasset.balance(&other), 0);
    assert_eq!(s.base.balance(&other), 10_000);
}

// ═══════════════════════════════════════════════════════════════════
// 3. Validation
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_bond_zero_rejected() {
    let e = Env::default();
    let s = setup(&e);
    let result = s.client.try_bond(&s.user, &s.base.address, &0, &None, &None);
    assert_eq!(result, Err(Ok(ContractError::InvalidAmount)));
}

#[test]
fn test_bond_below_minimum_rejected() {
    let e = Env::default();
    let s = setup_with(&e, |cfg| cfg.min_bond_amount = 1_000);
    let result = s.client.try_bond(&s.user, &s.base.address, &999, &None, &None);
    assert_eq!(result, Err(Ok(ContractError::BondAmountTooLow)));
    assert_eq!(s.client.ledger().total_bonded, 0);
}

#[test]
fn test_bond_limit_enforced() {
    let e = Env::default();
    let s = setup_with(&e, |cfg| cfg.bond_limit = 1_000);
    s.client.bond(&s.user, &s.base.address, &600, &None, &None);
    let result = s.client.try_bond(&s.user, &s.base.address, &401, &None, &None);
    assert_eq!(result, Err(Ok(ContractError::BondLimitExceeded)));
    s.client.bond(&s.user, &s.base.address, &400, &None, &None);
    assert_eq!(s.client.ledger().total_bonded, 1_000);
}

#[test]
fn test_bond_unknown_token_rejected() {
    let e = Env::default();
    let s = setup(&e);
    let other = e
        .register_stellar_asset_contract_v2(s.admin.clone())
        .address();
    let result = s.client.try_bond(&s.user, &other, &100, &None, &None);
    assert_eq!(result, Err(Ok(ContractError::UnsupportedToken)));
}

// ═══════════════════════════════════════════════════════════════════
// 4. LSM shares
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_lsm_share_bond_transfer_and_redeem() {
    let e = Env::default();
    let s = setup(&e);
    let share_token = e
        .register_stellar_asset_contract_v2(s.admin.clone())
        .address();
    StellarAssetClient::new(&e, &share_token).mint(&s.user, &50_000);
    let validator = String::from_str(&e, "valoper2");
    s.client
        .set_lsm_share_token(&s.admin, &share_token, &Some(validator.clone()));

    let minted = s.client.bond(&s.user, &share_token, &50_000, &None, &None);
    assert_eq!(minted, 50_000);
    assert_eq!(
        s.client.pending_lsm_shares().get(share_token.clone()).unwrap().amount,
        50_000
    );
    // LSM shares are not base tokens waiting for transfer.
    assert_eq!(s.client.ledger().pending_native_transfer, 0);

    assert_eq!(s.client.tick(&s.admin), ContractState::Transferring);
    match s.puppeteer.last_request().unwrap().kind {
        RequestKind::IbcTransfer(msg) => {
            assert_eq!(msg.token, share_token);
            assert_eq!(msg.amount, 50_000);
        }
        other => panic!("unexpected request {:?}", other),
    }
    respond_success(&e, &s);

    assert_eq!(s.client.tick(&s.admin), ContractState::Redeeming);
    assert!(s.client.pending_lsm_shares().is_empty());
    assert_eq!(
        s.client.lsm_shares_to_redeem().get(share_token.clone()).unwrap().amount,
        50_000
    );
    respond_success(&e, &s);

    s.client.tick(&s.admin);
    assert!(s.client.lsm_shares_to_redeem().is_empty());
    assert_eq!(s.client.delegations().get(validator), Some(50_000));
}

#[test]
fn test_removed_lsm_token_no_longer_accepted() {
    let e = Env::default();
    let s = setup(&e);
    let share_token = Address::generate(&e);
    s.client.set_lsm_share_token(
        &s.admin,
        &share_token,
        &Some(String::from_str(&e, "valoper2")),
    );
    s.client.set_lsm_share_token(&s.admin, &share_token, &None);

    assert!(s.client.lsm_share_tokens().is_empty());
    let result = s.client.try_bond(&s.user, &share_token, &100, &None, &None);
    assert_eq!(result, Err(Ok(ContractError::UnsupportedToken)));
}

// ═══════════════════════════════════════════════════════════════════
// 5. LSM redeem gating
// ═══════════════════════════════════════════════════════════════════

/// Registers a share token for `validator`, mints `amount` to the user,
/// bonds it and acknowledges its transfer to the ICA.
fn bond_and_transfer_shares(e: &Env, s: &Setup, validator: &str, amount: i128) -> Address {
    let share_token = e
        .register_stellar_asset_contract_v2(s.admin.clone())
        .address();
    StellarAssetClient::new(e, &share_token).mint(&s.user, &amount);
    s.client.set_lsm_share_token(
        &s.admin,
        &share_token,
        &Some(String::from_str(e, validator)),
    );
    s.client.bond(&s.user, &share_token, &amount, &None, &None);

    assert_eq!(s.client.tick(&s.admin), ContractState::Transferring);
    respond_success(e, s);
    share_token
}

#[test]
fn test_shares_below_threshold_held_until_count_reached() {
    let e = Env::default();
    let s = setup_with(&e, |cfg| {
        cfg.lsm_redeem_threshold = 2;
        cfg.lsm_redeem_max_interval = 86_400;
    });

    let first = bond_and_transfer_shares(&e, &s, "valoper2", 50_000);
    assert_eq!(s.client.tick(&s.admin), ContractState::Idle);
    assert_eq!(s.client.lsm_shares_to_redeem().len(), 1);
    assert_eq!(s.puppeteer.request_count(), 1);

    let second = bond_and_transfer_shares(&e, &s, "valoper3", 30_000);
    assert_eq!(s.client.tick(&s.admin), ContractState::Redeeming);
    match s.puppeteer.last_request().unwrap().kind {
        RequestKind::RedeemShares(msg) => {
            assert_eq!(msg.items.len(), 2);
            let tokens: std::vec::Vec<Address> = msg.items.iter().map(|i| i.token).collect();
            assert!(tokens.contains(&first));
            assert!(tokens.contains(&second));
        }
        other => panic!("unexpected request {:?}", other),
    }
    respond_success(&e, &s);
    s.client.tick(&s.admin);

    assert!(s.client.lsm_shares_to_redeem().is_empty());
    let delegations = s.client.delegations();
    assert_eq!(delegations.get(String::from_str(&e, "valoper2")), Some(50_000));
    assert_eq!(delegations.get(String::from_str(&e, "valoper3")), Some(30_000));
}

#[test]
fn test_shares_below_threshold_redeemed_after_interval() {
    let e = Env::default();
    let s = setup_with(&e, |cfg| {
        cfg.lsm_redeem_threshold = 5;
        cfg.lsm_redeem_max_interval = 3_600;
    });

    bond_and_transfer_shares(&e, &s, "valoper2", 50_000);
    assert_eq!(s.client.tick(&s.admin), ContractState::Idle);

    advance_time(&e, 3_599);
    assert_eq!(s.client.tick(&s.admin), ContractState::Idle);
    assert_eq!(s.client.lsm_shares_to_redeem().len(), 1);

    advance_time(&e, 1);
    assert_eq!(s.client.tick(&s.admin), ContractState::Redeeming);
    respond_success(&e, &s);
    s.client.tick(&s.admin);

    assert!(s.client.lsm_shares_to_redeem().is_empty());
    assert_eq!(
        s.client.delegations().get(String::from_str(&e, "valoper2")),
        Some(50_000)
    );
}
