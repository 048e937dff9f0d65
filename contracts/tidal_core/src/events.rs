use soroban_sdk::{Address, Env, String, Symbol};

use crate::puppeteer::RequestKind;
use crate::types::{ContractState, Pause};
use crate::unbond_batch::UnbondBatchStatus;

/// Emitted when base tokens or LSM shares are bonded.
///
/// # Topics
/// * `Symbol` - "bond"
/// * `Address` - The receiver of the minted derivative
///
/// # Data
/// * `Address` - Bonded token
/// * `i128` - Bonded amount
/// * `i128` - Minted derivative amount
/// * `Option<String>` - Referral tag passed by the caller
pub fn emit_bond(
    e: &Env,
    receiver: &Address,
    token: &Address,
    amount: i128,
    minted: i128,
    referral: &Option<String>,
) {
    let topics = (Symbol::new(e, "bond"), receiver.clone());
    let data = (token.clone(), amount, minted, referral.clone());
    e.events().publish(topics, data);
}

/// Emitted when derivative tokens are burned into an unbond batch.
///
/// # Topics
/// * `Symbol` - "unbond"
/// * `Address` - The unbonding account
///
/// # Data
/// * `u64` - Batch id the request was written to
/// * `i128` - Burned derivative amount
/// * `i128` - Native amount fixed at request time
pub fn emit_unbond(e: &Env, sender: &Address, batch_id: u64, amount: i128, expected: i128) {
    let topics = (Symbol::new(e, "unbond"), sender.clone());
    e.events().publish(topics, (batch_id, amount, expected));
}

pub fn emit_state_changed(e: &Env, from: ContractState, to: ContractState) {
    e.events()
        .publish((Symbol::new(e, "state_changed"),), (from, to));
}

pub fn emit_request_issued(e: &Env, request_id: u64, kind: &RequestKind) {
    e.events()
        .publish((Symbol::new(e, "request_issued"), request_id), kind.clone());
}

pub fn emit_response_received(e: &Env, request_id: u64, success: bool) {
    e.events()
        .publish((Symbol::new(e, "response_received"), request_id), success);
}

/// Emitted when a puppeteer response does not match the outstanding request.
pub fn emit_response_ignored(e: &Env, request_id: u64) {
    e.events()
        .publish((Symbol::new(e, "response_ignored"), request_id), ());
}

pub fn emit_batch_status(
    e: &Env,
    batch_id: u64,
    from: UnbondBatchStatus,
    to: UnbondBatchStatus,
) {
    e.events()
        .publish((Symbol::new(e, "batch_status"), batch_id), (from, to));
}

pub fn emit_batch_switched(e: &Env, frozen_id: u64, new_id: u64) {
    e.events()
        .publish((Symbol::new(e, "batch_switched"),), (frozen_id, new_id));
}

pub fn emit_config_updated(e: &Env, admin: &Address) {
    e.events()
        .publish((Symbol::new(e, "config_updated"),), admin.clone());
}

pub fn emit_pause_changed(e: &Env, pause: &Pause) {
    e.events()
        .publish((Symbol::new(e, "pause_changed"),), pause.clone());
}

pub fn emit_emergency_batch_processed(e: &Env, batch_id: u64, unbonded_amount: i128) {
    e.events().publish(
        (Symbol::new(e, "emergency_batch_processed"), batch_id),
        unbonded_amount,
    );
}

/// Emitted when a delegation snapshot reports less stake than the ledger holds.
///
/// # Data
/// * `i128` - Confirmed loss
/// * `i128` - Total bonded amount after the loss is applied
pub fn emit_slashing_detected(e: &Env, loss: i128, total_bonded: i128) {
    e.events()
        .publish((Symbol::new(e, "slashing_detected"),), (loss, total_bonded));
}
