//! # Unbond Batches
//!
//! Unbond requests are aggregated into time-boxed batches that travel
//! through the remote unbonding period together.
//!
//! ## Lifecycle
//!
//! ```text
//! New -> UnbondRequested -> Unbonding -> Withdrawing -> Withdrawn
//!              |                ^              |
//!              v                |              v
//!         UnbondFailed ---------+     WithdrawingEmergency -> WithdrawnEmergency
//! ```
//!
//! Statuses only move forward along these edges. Every change goes through
//! [`transition`], which stamps the time and emits `batch_status`.
//!
//! ## Storage
//!
//! | Key                          | Tier           |
//! |------------------------------|----------------|
//! | `DataKey::CurrentBatch`      | `instance()`   |
//! | `DataKey::OldestActiveBatch` | `instance()`   |
//! | `DataKey::Batch(id)`         | `persistent()` |

use soroban_sdk::{contracttype, Address, Env, Vec};
use tidal_errors::ContractError;

use crate::events;
use crate::ledger;
use crate::math;
use crate::types::{Config, DataKey};

/// Minimum ledger sequence TTL before a bump is requested (~1 day at 5 s/ledger).
const BUMP_THRESHOLD: u32 = 17_280;
/// Target TTL after a bump (~30 days).
const BUMP_TARGET: u32 = 518_400;

const DEFAULT_LIST_LIMIT: u32 = 10;
const MAX_LIST_LIMIT: u32 = 100;

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnbondBatchStatus {
    /// Accepting unbond requests.
    New,
    UnbondRequested,
    UnbondFailed,
    Unbonding,
    Withdrawing,
    Withdrawn,
    WithdrawingEmergency,
    WithdrawnEmergency,
}

impl UnbondBatchStatus {
    pub fn can_transition_to(self, to: UnbondBatchStatus) -> bool {
        use UnbondBatchStatus::*;
        matches!(
            (self, to),
            (New, UnbondRequested)
                | (UnbondRequested, Unbonding)
                | (UnbondRequested, UnbondFailed)
                | (UnbondFailed, Unbonding)
                | (Unbonding, Withdrawing)
                | (Withdrawing, Withdrawn)
                | (Withdrawing, WithdrawingEmergency)
                | (WithdrawingEmergency, WithdrawnEmergency)
        )
    }

    pub fn is_final(self) -> bool {
        matches!(
            self,
            UnbondBatchStatus::Withdrawn | UnbondBatchStatus::WithdrawnEmergency
        )
    }
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnbondItem {
    pub sender: Address,
    /// Burned derivative amount.
    pub amount: i128,
    /// Native amount fixed when the request was made.
    pub expected_amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StatusTimestamps {
    pub new: u64,
    pub unbond_requested: Option<u64>,
    pub unbond_failed: Option<u64>,
    pub unbonding: Option<u64>,
    pub withdrawing: Option<u64>,
    pub withdrawn: Option<u64>,
    pub withdrawing_emergency: Option<u64>,
    pub withdrawn_emergency: Option<u64>,
}

impl StatusTimestamps {
    fn stamp(&mut self, status: UnbondBatchStatus, now: u64) {
        match status {
            UnbondBatchStatus::New => self.new = now,
            UnbondBatchStatus::UnbondRequested => self.unbond_requested = Some(now),
            UnbondBatchStatus::UnbondFailed => self.unbond_failed = Some(now),
            UnbondBatchStatus::Unbonding => self.unbonding = Some(now),
            UnbondBatchStatus::Withdrawing => self.withdrawing = Some(now),
            UnbondBatchStatus::Withdrawn => self.withdrawn = Some(now),
            UnbondBatchStatus::WithdrawingEmergency => self.withdrawing_emergency = Some(now),
            UnbondBatchStatus::WithdrawnEmergency => self.withdrawn_emergency = Some(now),
        }
    }
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnbondBatch {
    pub id: u64,
    pub total_dasset_amount: i128,
    pub expected_native_asset_amount: i128,
    pub unbond_items: Vec<UnbondItem>,
    pub status: UnbondBatchStatus,
    pub status_timestamps: StatusTimestamps,
    /// Set when the undelegation is confirmed; 0 before that.
    pub expected_release_time: u64,
    pub unbonded_amount: Option<i128>,
    pub withdrawn_amount: Option<i128>,
    /// Fixed point, `PRECISION` == no loss.
    pub slashing_effect: Option<i128>,
}

// ─── Storage ───────────────────────────────────────────────────────────────

pub fn load(e: &Env, batch_id: u64) -> Result<UnbondBatch, ContractError> {
    let key = DataKey::Batch(batch_id);
    let storage = e.storage().persistent();
    let batch: UnbondBatch = storage.get(&key).ok_or(ContractError::BatchNotFound)?;
    storage.extend_ttl(&key, BUMP_THRESHOLD, BUMP_TARGET);
    Ok(batch)
}

pub fn save(e: &Env, batch: &UnbondBatch) {
    let key = DataKey::Batch(batch.id);
    e.storage().persistent().set(&key, batch);
    e.storage()
        .persistent()
        .extend_ttl(&key, BUMP_THRESHOLD, BUMP_TARGET);
}

pub fn current_id(e: &Env) -> u64 {
    e.storage()
        .instance()
        .get(&DataKey::CurrentBatch)
        .unwrap_or(0)
}

fn oldest_active_id(e: &Env) -> u64 {
    e.storage()
        .instance()
        .get(&DataKey::OldestActiveBatch)
        .unwrap_or(0)
}

/// Creates batch `batch_id` in `New` and makes it the current batch.
pub fn open(e: &Env, batch_id: u64) {
    let batch = UnbondBatch {
        id: batch_id,
        total_dasset_amount: 0,
        expected_native_asset_amount: 0,
        unbond_items: Vec::new(e),
        status: UnbondBatchStatus::New,
        status_timestamps: StatusTimestamps {
            new: e.ledger().timestamp(),
            ..StatusTimestamps::default()
        },
        expected_release_time: 0,
        unbonded_amount: None,
        withdrawn_amount: None,
        slashing_effect: None,
    };
    save(e, &batch);
    e.storage().instance().set(&DataKey::CurrentBatch, &batch_id);
}

/// The only way a batch status changes. Persists the batch.
pub fn transition(
    e: &Env,
    batch: &mut UnbondBatch,
    to: UnbondBatchStatus,
) -> Result<(), ContractError> {
    let from = batch.status;
    if !from.can_transition_to(to) {
        return Err(ContractError::InvalidBatchTransition);
    }
    batch.status = to;
    batch.status_timestamps.stamp(to, e.ledger().timestamp());
    save(e, batch);
    events::emit_batch_status(e, batch.id, from, to);

    if to.is_final() {
        advance_oldest_active(e);
    }
    Ok(())
}

fn advance_oldest_active(e: &Env) {
    let current = current_id(e);
    let mut id = oldest_active_id(e);
    while id < current {
        match load(e, id) {
            Ok(batch) if batch.status.is_final() => id += 1,
            _ => break,
        }
    }
    e.storage().instance().set(&DataKey::OldestActiveBatch, &id);
}

// ─── Requests ──────────────────────────────────────────────────────────────

/// Appends an unbond request to the current batch. Returns the batch id.
pub fn add_unbond_request(
    e: &Env,
    sender: &Address,
    amount: i128,
    expected_amount: i128,
) -> Result<u64, ContractError> {
    let mut batch = load(e, current_id(e))?;
    if batch.status != UnbondBatchStatus::New {
        return Err(ContractError::InvalidBatchStatus);
    }
    batch.total_dasset_amount = math::add_i128(batch.total_dasset_amount, amount)?;
    batch.expected_native_asset_amount =
        math::add_i128(batch.expected_native_asset_amount, expected_amount)?;
    batch.unbond_items.push_back(UnbondItem {
        sender: sender.clone(),
        amount,
        expected_amount,
    });
    save(e, &batch);
    Ok(batch.id)
}

/// Freezes the current batch and opens the next one. Returns the new id.
pub fn switch_current(e: &Env) -> Result<u64, ContractError> {
    let mut batch = load(e, current_id(e))?;
    if batch.unbond_items.is_empty() {
        return Err(ContractError::EmptyBatch);
    }
    transition(e, &mut batch, UnbondBatchStatus::UnbondRequested)?;
    let next = math::add_u64(batch.id, 1)?;
    open(e, next);
    events::emit_batch_switched(e, batch.id, next);
    Ok(next)
}

/// Switches the current batch once its collection window has elapsed.
pub fn maybe_switch(e: &Env, cfg: &Config) -> Result<bool, ContractError> {
    let batch = load(e, current_id(e))?;
    if batch.unbond_items.is_empty() {
        return Ok(false);
    }
    let switch_at = math::add_u64(batch.status_timestamps.new, cfg.unbond_batch_switch_time)?;
    if e.ledger().timestamp() < switch_at {
        return Ok(false);
    }
    switch_current(e)?;
    Ok(true)
}

// ─── Scans ─────────────────────────────────────────────────────────────────

fn find_active<F>(e: &Env, pred: F) -> Option<UnbondBatch>
where
    F: Fn(&UnbondBatch) -> bool,
{
    let current = current_id(e);
    let mut id = oldest_active_id(e);
    while id < current {
        if let Ok(batch) = load(e, id) {
            if pred(&batch) {
                return Some(batch);
            }
        }
        id += 1;
    }
    None
}

/// Oldest frozen batch whose undelegation has not been confirmed yet.
pub fn next_to_unbond(e: &Env) -> Option<UnbondBatch> {
    find_active(e, |b| {
        matches!(
            b.status,
            UnbondBatchStatus::UnbondRequested | UnbondBatchStatus::UnbondFailed
        )
    })
}

/// Oldest `Unbonding` batch past its release time plus the safe period.
pub fn next_ready_for_withdrawal(e: &Env, cfg: &Config) -> Option<UnbondBatch> {
    let now = e.ledger().timestamp();
    find_active(e, |b| {
        b.status == UnbondBatchStatus::Unbonding
            && now >= b.expected_release_time.saturating_add(cfg.unbonding_safe_period)
    })
}

// ─── Settlement ────────────────────────────────────────────────────────────

/// Records the amount delivered for a `Withdrawing` batch. Applying it a
/// second time is a no-op.
pub fn settle_withdrawn(e: &Env, batch_id: u64, received: i128) -> Result<(), ContractError> {
    let mut batch = load(e, batch_id)?;
    if batch.unbonded_amount.is_some() {
        return Ok(());
    }
    if batch.status != UnbondBatchStatus::Withdrawing {
        return Err(ContractError::InvalidBatchStatus);
    }
    let received = received.max(0);
    batch.slashing_effect = Some(ledger::slashing_effect(
        received,
        batch.expected_native_asset_amount,
    )?);
    batch.unbonded_amount = Some(received);
    batch.withdrawn_amount = Some(received);
    transition(e, &mut batch, UnbondBatchStatus::Withdrawn)
}

/// Settles a batch whose withdrawal failed with the amount recovered by the
/// operator.
pub fn process_emergency(
    e: &Env,
    batch_id: u64,
    unbonded_amount: i128,
) -> Result<UnbondBatch, ContractError> {
    let mut batch = load(e, batch_id)?;
    if batch.status != UnbondBatchStatus::WithdrawingEmergency {
        return Err(ContractError::InvalidBatchStatus);
    }
    if unbonded_amount <= 0 {
        return Err(ContractError::InvalidAmount);
    }
    if unbonded_amount > batch.expected_native_asset_amount {
        return Err(ContractError::UnbondedAmountExceedsExpected);
    }
    batch.slashing_effect = Some(ledger::slashing_effect(
        unbonded_amount,
        batch.expected_native_asset_amount,
    )?);
    batch.unbonded_amount = Some(unbonded_amount);
    batch.withdrawn_amount = Some(unbonded_amount);
    transition(e, &mut batch, UnbondBatchStatus::WithdrawnEmergency)?;
    events::emit_emergency_batch_processed(e, batch_id, unbonded_amount);
    Ok(batch)
}

/// Native amount a request with `expected_amount` receives from a settled batch.
pub fn payout(e: &Env, batch_id: u64, expected_amount: i128) -> Result<i128, ContractError> {
    let batch = load(e, batch_id)?;
    if !batch.status.is_final() {
        return Err(ContractError::BatchNotWithdrawn);
    }
    let effect = batch.slashing_effect.ok_or(ContractError::BatchNotWithdrawn)?;
    ledger::apply_slashing_effect(expected_amount, effect)
}

pub fn list(e: &Env, start_after: Option<u64>, limit: Option<u32>) -> Vec<UnbondBatch> {
    let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let current = current_id(e);
    let mut id = match start_after {
        Some(after) => after.saturating_add(1),
        None => 0,
    };
    let mut out = Vec::new(e);
    while id <= current && out.len() < limit {
        if let Ok(batch) = load(e, id) {
            out.push_back(batch);
        }
        id += 1;
    }
    out
}
