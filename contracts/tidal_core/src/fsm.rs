//! # Core State Machine
//!
//! `tick` advances the core through a fixed pipeline of remote operations.
//! Each step issues at most one puppeteer request; the next `tick` consumes
//! its response before anything else is issued.
//!
//! ## Pipeline
//!
//! | # | State                      | Issued when                                   |
//! |---|----------------------------|-----------------------------------------------|
//! | 1 | `Transferring`             | base tokens or LSM shares are held locally    |
//! | 2 | `Redeeming`                | LSM shares on the ICA reach count or age      |
//! | 3 | `NonNativeRewardsTransfer` | a configured denom balance reaches its minimum|
//! | 4 | `Claiming`                 | delegations exist or a batch is withdrawable  |
//! | 5 | `StakingRewards`           | claimed rewards await delegation              |
//! | 6 | `StakingBond`              | transferred bond funds await delegation       |
//! | 7 | `Unbonding`                | a frozen batch awaits undelegation            |
//!
//! After a success response the search resumes at the state following the
//! one that issued the request. An error response is recorded and leaves the
//! state in place; the following tick retries from that same state.
//!
//! A batch is undelegated only once the remote delegations cover it. While
//! bonded funds are still on their way to the validators, `Unbonding` is
//! skipped so the next cycle can stake them first.
//!
//! When a batch withdrawal fails, the batch moves to `WithdrawingEmergency`
//! and the same tick asks the puppeteer to send the batch funds to
//! `emergency_address`.

use soroban_sdk::{token::TokenClient, vec, Env, Map, String, Vec};
use tidal_errors::ContractError;

use crate::config;
use crate::events;
use crate::ledger::{self, Ledger};
use crate::math;
use crate::pausable::{self, PauseAction};
use crate::puppeteer::{
    self, BatchTransferAnswer, BatchWithdrawal, ClaimRewardsMsg, DelegateFee, DelegateMsg,
    FeeTransfer, IbcTransferMsg, LsmRedeemItem, RedeemSharesMsg, RemoteCoin,
    RemoteTransferItem, RequestKind, ResponseAnswer, ResponseHookErrorMsg, ResponseHookMsg,
    ResponseHookSuccessMsg, TransferMsg, TransferReadyBatchesMsg, TxStatus, UndelegateMsg,
    ValidatorAmount,
};
use crate::strategy::StrategyClient;
use crate::types::{Config, ContractState, DataKey};
use crate::unbond_batch::{self, UnbondBatchStatus};

const PIPELINE: [ContractState; 7] = [
    ContractState::Transferring,
    ContractState::Redeeming,
    ContractState::NonNativeRewardsTransfer,
    ContractState::Claiming,
    ContractState::StakingRewards,
    ContractState::StakingBond,
    ContractState::Unbonding,
];

fn stage(state: ContractState) -> usize {
    PIPELINE.iter().position(|s| *s == state).unwrap_or(0)
}

// ─── Storage ───────────────────────────────────────────────────────────────

pub fn contract_state(e: &Env) -> ContractState {
    e.storage()
        .instance()
        .get(&DataKey::State)
        .unwrap_or(ContractState::Idle)
}

fn set_state(e: &Env, to: ContractState) {
    let from = contract_state(e);
    if from != to {
        e.storage().instance().set(&DataKey::State, &to);
        events::emit_state_changed(e, from, to);
    }
}

pub fn last_idle_tick(e: &Env) -> u64 {
    e.storage()
        .instance()
        .get(&DataKey::LastIdleTick)
        .unwrap_or(0)
}

fn set_last_idle_tick(e: &Env, now: u64) {
    e.storage().instance().set(&DataKey::LastIdleTick, &now);
}

fn last_lsm_redeem(e: &Env) -> u64 {
    e.storage()
        .instance()
        .get(&DataKey::LastLsmRedeem)
        .unwrap_or(0)
}

// ─── Tick ──────────────────────────────────────────────────────────────────

pub fn tick(e: &Env) -> Result<ContractState, ContractError> {
    let cfg = config::load(e)?;
    if puppeteer::tx_state(e).status != TxStatus::Idle {
        return Err(ContractError::PuppeteerResponseNotReceived);
    }
    pausable::require_not_paused(e, PauseAction::Tick)?;

    let now = e.ledger().timestamp();
    let state = contract_state(e);
    let start = if state == ContractState::Idle {
        if now < last_idle_tick(e).saturating_add(cfg.idle_min_interval) {
            return Err(ContractError::IdleIntervalNotReached);
        }
        set_last_idle_tick(e, now);
        0
    } else {
        match puppeteer::take_response(e) {
            Some(ResponseHookMsg::Success(msg)) => {
                apply_success(e, &cfg, state, &msg)?;
                stage(state) + 1
            }
            Some(ResponseHookMsg::Failure(msg)) => {
                apply_error(e, &cfg, state, &msg)?;
                return Ok(state);
            }
            None => stage(state),
        }
    };

    for next in PIPELINE.iter().skip(start) {
        if try_issue(e, &cfg, *next)? {
            set_state(e, *next);
            return Ok(*next);
        }
    }

    set_state(e, ContractState::Idle);
    set_last_idle_tick(e, now);
    Ok(ContractState::Idle)
}

fn try_issue(e: &Env, cfg: &Config, state: ContractState) -> Result<bool, ContractError> {
    match state {
        ContractState::Idle => Ok(false),
        ContractState::Transferring => issue_transfer(e, cfg),
        ContractState::Redeeming => issue_redeem(e, cfg),
        ContractState::NonNativeRewardsTransfer => issue_non_native_transfer(e, cfg),
        ContractState::Claiming => issue_claim(e, cfg),
        ContractState::StakingRewards => issue_stake_rewards(e, cfg),
        ContractState::StakingBond => issue_stake_bond(e, cfg),
        ContractState::Unbonding => issue_unbond(e, cfg),
    }
}

// ─── Issuing ───────────────────────────────────────────────────────────────

fn issue_transfer(e: &Env, cfg: &Config) -> Result<bool, ContractError> {
    let self_address = e.current_contract_address();
    let mut l = ledger::load(e);

    if l.pending_native_transfer > 0 {
        let amount = l.pending_native_transfer;
        l.pending_native_transfer = 0;
        l.in_flight = math::add_i128(l.in_flight, amount)?;
        ledger::save(e, &l);
        TokenClient::new(e, &cfg.base_token).transfer(&self_address, &cfg.puppeteer, &amount);
        puppeteer::issue(
            e,
            cfg,
            RequestKind::IbcTransfer(IbcTransferMsg {
                token: cfg.base_token.clone(),
                amount,
            }),
        )?;
        return Ok(true);
    }

    // Shares stay in the pending map until the transfer is acknowledged.
    let pending = ledger::pending_lsm_shares(e);
    if let Some((token, share)) = pending.iter().next() {
        TokenClient::new(e, &token).transfer(&self_address, &cfg.puppeteer, &share.amount);
        puppeteer::issue(
            e,
            cfg,
            RequestKind::IbcTransfer(IbcTransferMsg {
                token,
                amount: share.amount,
            }),
        )?;
        return Ok(true);
    }
    Ok(false)
}

fn issue_redeem(e: &Env, cfg: &Config) -> Result<bool, ContractError> {
    let to_redeem = ledger::lsm_shares_to_redeem(e);
    if to_redeem.is_empty() {
        return Ok(false);
    }
    let now = e.ledger().timestamp();
    let due = to_redeem.len() >= cfg.lsm_redeem_threshold
        || now >= last_lsm_redeem(e).saturating_add(cfg.lsm_redeem_max_interval);
    if !due {
        return Ok(false);
    }

    let mut items = Vec::new(e);
    for (token, share) in to_redeem.iter() {
        items.push_back(LsmRedeemItem {
            token,
            validator: share.validator,
            amount: share.amount,
        });
    }
    puppeteer::issue(e, cfg, RequestKind::RedeemShares(RedeemSharesMsg { items }))?;
    Ok(true)
}

fn issue_non_native_transfer(e: &Env, cfg: &Config) -> Result<bool, ContractError> {
    let balances = ledger::remote_balances(e);
    let mut items = Vec::new(e);
    for receiver in config::non_native_receivers(e).iter() {
        let balance = balances.get(receiver.denom.clone()).unwrap_or(0);
        if balance <= 0 || balance < receiver.min_amount {
            continue;
        }
        let fee = math::bps(balance, receiver.fee_bps)?;
        items.push_back(RemoteTransferItem {
            recipient: receiver.address.clone(),
            coin: RemoteCoin {
                denom: receiver.denom.clone(),
                amount: math::sub_i128(balance, fee)?,
            },
        });
        if fee > 0 {
            items.push_back(RemoteTransferItem {
                recipient: receiver.fee_address.clone(),
                coin: RemoteCoin {
                    denom: receiver.denom.clone(),
                    amount: fee,
                },
            });
        }
    }
    if items.is_empty() {
        return Ok(false);
    }
    puppeteer::issue(e, cfg, RequestKind::Transfer(TransferMsg { items }))?;
    Ok(true)
}

fn issue_claim(e: &Env, cfg: &Config) -> Result<bool, ContractError> {
    let mut validators: Vec<String> = Vec::new(e);
    for (validator, amount) in ledger::delegations(e).iter() {
        if amount > 0 {
            validators.push_back(validator);
        }
    }

    let withdrawal = match unbond_batch::next_ready_for_withdrawal(e, cfg) {
        Some(mut batch) => {
            unbond_batch::transition(e, &mut batch, UnbondBatchStatus::Withdrawing)?;
            BatchWithdrawal::Transfer(TransferReadyBatchesMsg {
                batch_ids: vec![e, batch.id],
                amount: batch.expected_native_asset_amount,
                recipient: cfg.withdrawal_manager.clone(),
            })
        }
        None => BatchWithdrawal::NoBatches,
    };

    if validators.is_empty() && withdrawal.transfer().is_none() {
        return Ok(false);
    }
    puppeteer::issue(
        e,
        cfg,
        RequestKind::ClaimRewardsAndTransfer(ClaimRewardsMsg {
            validators,
            withdrawal,
        }),
    )?;
    Ok(true)
}

fn issue_stake_rewards(e: &Env, cfg: &Config) -> Result<bool, ContractError> {
    let l = ledger::load(e);
    if l.pending_rewards <= 0 {
        return Ok(false);
    }
    let items = StrategyClient::new(e, &cfg.strategy).calc_deposit(&l.pending_rewards);
    if items.is_empty() {
        return Ok(false);
    }
    let fee = if l.pending_fee > 0 {
        DelegateFee::Send(FeeTransfer {
            recipient: cfg.fee_address.clone(),
            amount: l.pending_fee,
        })
    } else {
        DelegateFee::NoFee
    };
    puppeteer::issue(e, cfg, RequestKind::Delegate(DelegateMsg { items, fee }))?;
    Ok(true)
}

fn issue_stake_bond(e: &Env, cfg: &Config) -> Result<bool, ContractError> {
    let l = ledger::load(e);
    if l.ica_pending_native <= 0 {
        return Ok(false);
    }
    let items = StrategyClient::new(e, &cfg.strategy).calc_deposit(&l.ica_pending_native);
    if items.is_empty() {
        return Ok(false);
    }
    puppeteer::issue(
        e,
        cfg,
        RequestKind::Delegate(DelegateMsg {
            items,
            fee: DelegateFee::NoFee,
        }),
    )?;
    Ok(true)
}

fn issue_unbond(e: &Env, cfg: &Config) -> Result<bool, ContractError> {
    unbond_batch::maybe_switch(e, cfg)?;
    let batch = match unbond_batch::next_to_unbond(e) {
        Some(batch) => batch,
        None => return Ok(false),
    };
    let amount = match undelegatable(e, batch.expected_native_asset_amount)? {
        Some(amount) => amount,
        None => return Ok(false),
    };
    let items = StrategyClient::new(e, &cfg.strategy).calc_withdraw(&amount);
    puppeteer::issue(
        e,
        cfg,
        RequestKind::Undelegate(UndelegateMsg {
            batch_id: batch.id,
            items,
        }),
    )?;
    Ok(true)
}

/// Amount to undelegate for a batch expecting `expected`. `None` while part
/// of the backing has not reached the validators yet. Once nothing is in
/// transit, a shortfall left by slashing is undelegated as far as it goes.
fn undelegatable(e: &Env, expected: i128) -> Result<Option<i128>, ContractError> {
    let delegated = ledger::total_delegated(&ledger::delegations(e))?;
    if delegated >= expected {
        return Ok(Some(expected));
    }
    if stake_in_transit(e) || delegated <= 0 {
        return Ok(None);
    }
    Ok(Some(delegated))
}

fn stake_in_transit(e: &Env) -> bool {
    let l = ledger::load(e);
    l.pending_native_transfer > 0
        || l.in_flight > 0
        || l.ica_pending_native > 0
        || l.pending_rewards > 0
        || !ledger::pending_lsm_shares(e).is_empty()
        || !ledger::lsm_shares_to_redeem(e).is_empty()
}

// ─── Success effects ───────────────────────────────────────────────────────

fn apply_success(
    e: &Env,
    cfg: &Config,
    state: ContractState,
    msg: &ResponseHookSuccessMsg,
) -> Result<(), ContractError> {
    match (state, &msg.transaction) {
        (ContractState::Transferring, RequestKind::IbcTransfer(t)) => {
            on_transferred(e, cfg, t)?
        }
        (ContractState::Redeeming, RequestKind::RedeemShares(r)) => on_redeemed(e, r)?,
        (ContractState::NonNativeRewardsTransfer, RequestKind::Transfer(t)) => {
            on_non_native_transferred(e, t)
        }
        (ContractState::Claiming, RequestKind::ClaimRewardsAndTransfer(c)) => {
            on_claimed(e, cfg, c, &msg.answers)?
        }
        (ContractState::StakingRewards, RequestKind::Delegate(d)) => {
            on_rewards_staked(e, d)?
        }
        (ContractState::StakingBond, RequestKind::Delegate(d)) => on_bond_staked(e, d)?,
        (ContractState::Unbonding, RequestKind::Undelegate(u)) => on_undelegated(e, cfg, u)?,
        _ => {}
    }

    for answer in msg.answers.iter() {
        if let ResponseAnswer::Balances(coins) = answer {
            ledger::refresh_remote_balances(e, &coins);
        }
    }
    Ok(())
}

fn on_transferred(e: &Env, cfg: &Config, t: &IbcTransferMsg) -> Result<(), ContractError> {
    if t.token == cfg.base_token {
        let mut l = ledger::load(e);
        l.in_flight = math::debit(l.in_flight, t.amount)?;
        l.ica_pending_native = math::add_i128(l.ica_pending_native, t.amount)?;
        ledger::save(e, &l);
        return Ok(());
    }

    let mut pending = ledger::pending_lsm_shares(e);
    let mut to_redeem = ledger::lsm_shares_to_redeem(e);
    let validator = ledger::debit_share(&mut pending, &t.token, t.amount)?;
    ledger::credit_share(&mut to_redeem, &t.token, &validator, t.amount)?;
    ledger::save_pending_lsm_shares(e, &pending);
    ledger::save_lsm_shares_to_redeem(e, &to_redeem);
    Ok(())
}

fn on_redeemed(e: &Env, r: &RedeemSharesMsg) -> Result<(), ContractError> {
    let mut to_redeem = ledger::lsm_shares_to_redeem(e);
    let mut delegations = ledger::delegations(e);
    let mut redeemed = Vec::new(e);
    for item in r.items.iter() {
        ledger::debit_share(&mut to_redeem, &item.token, item.amount)?;
        redeemed.push_back(ValidatorAmount {
            validator: item.validator,
            amount: item.amount,
        });
    }
    ledger::credit_delegations(&mut delegations, &redeemed)?;
    ledger::save_lsm_shares_to_redeem(e, &to_redeem);
    ledger::save_delegations(e, &delegations);
    e.storage()
        .instance()
        .set(&DataKey::LastLsmRedeem, &e.ledger().timestamp());
    Ok(())
}

fn on_non_native_transferred(e: &Env, t: &TransferMsg) {
    let mut balances = ledger::remote_balances(e);
    for item in t.items.iter() {
        let current = balances.get(item.coin.denom.clone()).unwrap_or(0);
        balances.set(item.coin.denom, current.saturating_sub(item.coin.amount).max(0));
    }
    ledger::save_remote_balances(e, &balances);
}

fn on_claimed(
    e: &Env,
    cfg: &Config,
    c: &ClaimRewardsMsg,
    answers: &Vec<ResponseAnswer>,
) -> Result<(), ContractError> {
    let mut settled = false;
    for answer in answers.iter() {
        match answer {
            ResponseAnswer::ClaimRewards(claim) => {
                let mut l = ledger::load(e);
                if claim.rewards > 0 {
                    let fee = math::bps(claim.rewards, cfg.fee_bps)?;
                    l.pending_fee = math::add_i128(l.pending_fee, fee)?;
                    l.pending_rewards = math::add_i128(
                        l.pending_rewards,
                        math::sub_i128(claim.rewards, fee)?,
                    )?;
                }
                if let Some(snapshot) = claim.delegations {
                    reconcile_delegations(e, &mut l, &snapshot)?;
                }
                ledger::save(e, &l);
            }
            ResponseAnswer::BatchTransfer(answer) => {
                if let Some(issued) = c.withdrawal.transfer() {
                    let ids = issued_ids(e, &answer, &issued.batch_ids);
                    if !ids.is_empty() {
                        settle_batches(e, &ids, answer.received)?;
                        settled = true;
                    }
                }
            }
            ResponseAnswer::Balances(_) => {}
        }
    }

    if !settled {
        if let Some(transfer) = c.withdrawal.transfer() {
            settle_batches(e, &transfer.batch_ids, transfer.amount)?;
        }
    }
    Ok(())
}

/// Batch ids of `answer` that were part of the issued transfer.
fn issued_ids(e: &Env, answer: &BatchTransferAnswer, issued: &Vec<u64>) -> Vec<u64> {
    let mut ids = Vec::new(e);
    for id in answer.batch_ids.iter() {
        if issued.contains(id) && !ids.contains(id) {
            ids.push_back(id);
        }
    }
    ids
}

/// Replaces the delegation view with a remote snapshot. Stake missing from
/// the snapshot is a confirmed slashing loss.
fn reconcile_delegations(
    e: &Env,
    l: &mut Ledger,
    snapshot: &Vec<ValidatorAmount>,
) -> Result<(), ContractError> {
    let known = ledger::total_delegated(&ledger::delegations(e))?;
    let mut fresh: Map<String, i128> = Map::new(e);
    ledger::credit_delegations(&mut fresh, snapshot)?;
    let observed = ledger::total_delegated(&fresh)?;
    if observed < known {
        l.confirm_slashing(e, math::sub_i128(known, observed)?)?;
    }
    ledger::save_delegations(e, &fresh);
    Ok(())
}

/// Splits `received` across batches in proportion to their expected amounts.
fn settle_batches(e: &Env, batch_ids: &Vec<u64>, received: i128) -> Result<(), ContractError> {
    if batch_ids.len() == 1 {
        if let Some(id) = batch_ids.get(0) {
            return unbond_batch::settle_withdrawn(e, id, received);
        }
    }

    let mut total_expected = 0i128;
    for id in batch_ids.iter() {
        let batch = unbond_batch::load(e, id)?;
        total_expected = math::add_i128(total_expected, batch.expected_native_asset_amount)?;
    }
    for id in batch_ids.iter() {
        let batch = unbond_batch::load(e, id)?;
        let share = if total_expected == 0 {
            0
        } else {
            math::mul_div_floor(received, batch.expected_native_asset_amount, total_expected)?
        };
        unbond_batch::settle_withdrawn(e, id, share)?;
    }
    Ok(())
}

fn on_rewards_staked(e: &Env, d: &DelegateMsg) -> Result<(), ContractError> {
    let delegated = sum_amounts(&d.items)?;
    let mut l = ledger::load(e);
    let moved = delegated.min(l.pending_rewards);
    l.pending_rewards = math::debit(l.pending_rewards, moved)?;
    l.total_bonded = math::add_i128(l.total_bonded, moved)?;
    if let Some(fee) = d.fee.transfer() {
        l.pending_fee = math::debit(l.pending_fee, fee.amount.min(l.pending_fee))?;
    }
    ledger::save(e, &l);

    let mut delegations = ledger::delegations(e);
    ledger::credit_delegations(&mut delegations, &d.items)?;
    ledger::save_delegations(e, &delegations);
    Ok(())
}

fn on_bond_staked(e: &Env, d: &DelegateMsg) -> Result<(), ContractError> {
    let delegated = sum_amounts(&d.items)?;
    let mut l = ledger::load(e);
    l.ica_pending_native = math::debit(l.ica_pending_native, delegated.min(l.ica_pending_native))?;
    ledger::save(e, &l);

    let mut delegations = ledger::delegations(e);
    ledger::credit_delegations(&mut delegations, &d.items)?;
    ledger::save_delegations(e, &delegations);
    Ok(())
}

fn on_undelegated(e: &Env, cfg: &Config, u: &UndelegateMsg) -> Result<(), ContractError> {
    let mut batch = unbond_batch::load(e, u.batch_id)?;
    if matches!(
        batch.status,
        UnbondBatchStatus::UnbondRequested | UnbondBatchStatus::UnbondFailed
    ) {
        batch.expected_release_time =
            math::add_u64(e.ledger().timestamp(), cfg.unbonding_period)?;
        unbond_batch::transition(e, &mut batch, UnbondBatchStatus::Unbonding)?;

        let mut delegations = ledger::delegations(e);
        ledger::debit_delegations(&mut delegations, &u.items);
        ledger::save_delegations(e, &delegations);
    }
    Ok(())
}

fn sum_amounts(items: &Vec<ValidatorAmount>) -> Result<i128, ContractError> {
    let mut total = 0i128;
    for item in items.iter() {
        total = math::add_i128(total, item.amount)?;
    }
    Ok(total)
}

// ─── Error effects ─────────────────────────────────────────────────────────

fn apply_error(
    e: &Env,
    cfg: &Config,
    state: ContractState,
    msg: &ResponseHookErrorMsg,
) -> Result<(), ContractError> {
    match (state, &msg.transaction) {
        (ContractState::Transferring, RequestKind::IbcTransfer(t)) => {
            // The puppeteer refunds a failed transfer; LSM shares never left
            // the pending map.
            if t.token == cfg.base_token {
                let mut l = ledger::load(e);
                l.in_flight = math::debit(l.in_flight, t.amount)?;
                l.pending_native_transfer = math::add_i128(l.pending_native_transfer, t.amount)?;
                ledger::save(e, &l);
            }
        }
        (ContractState::Claiming, RequestKind::ClaimRewardsAndTransfer(c)) => {
            if let Some(transfer) = c.withdrawal.transfer() {
                let mut stranded = 0i128;
                for id in transfer.batch_ids.iter() {
                    let mut batch = unbond_batch::load(e, id)?;
                    if batch.status == UnbondBatchStatus::Withdrawing {
                        unbond_batch::transition(
                            e,
                            &mut batch,
                            UnbondBatchStatus::WithdrawingEmergency,
                        )?;
                        stranded =
                            math::add_i128(stranded, batch.expected_native_asset_amount)?;
                    }
                }
                if stranded > 0 {
                    issue_emergency_transfer(e, cfg, stranded)?;
                }
            }
        }
        (ContractState::Unbonding, RequestKind::Undelegate(u)) => {
            let mut batch = unbond_batch::load(e, u.batch_id)?;
            if batch.status == UnbondBatchStatus::UnbondRequested {
                unbond_batch::transition(e, &mut batch, UnbondBatchStatus::UnbondFailed)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn issue_emergency_transfer(e: &Env, cfg: &Config, amount: i128) -> Result<(), ContractError> {
    let items = vec![
        e,
        RemoteTransferItem {
            recipient: cfg.emergency_address.clone(),
            coin: RemoteCoin {
                denom: cfg.remote_denom.clone(),
                amount,
            },
        },
    ];
    puppeteer::issue(e, cfg, RequestKind::Transfer(TransferMsg { items }))?;
    Ok(())
}
