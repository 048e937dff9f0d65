//! # Tidal Liquid Staking Core
//!
//! Issues a derivative token against native stake held on a remote chain
//! through an interchain account (ICA). The ICA is driven by a separate
//! puppeteer contract; the core decides what to do and when.
//!
//! ## Flow
//!
//! - `bond` takes base tokens (or accepted LSM shares) and mints the
//!   derivative at the current exchange rate.
//! - `unbond` burns the derivative and books the request into the current
//!   unbond batch at a native amount fixed at request time.
//! - `tick` moves funds and stake through the pipeline documented in
//!   [`fsm`], one puppeteer request at a time.
//! - `puppeteer_hook` delivers the outcome of that request.
//!
//! ## Storage Layout
//!
//! | Key                                 | Tier           |
//! |-------------------------------------|----------------|
//! | Admin, Config, State, Pause         | `instance()`   |
//! | TxState, LastResponse, counters     | `instance()`   |
//! | Ledger and remote-view maps         | `instance()`   |
//! | `DataKey::Batch(id)`                | `persistent()` |

#![no_std]

pub mod config;
pub mod events;
pub mod fsm;
pub mod ledger;
pub mod math;
pub mod pausable;
pub mod puppeteer;
pub mod strategy;
pub mod types;
pub mod unbond_batch;

use soroban_sdk::{
    contract, contractimpl,
    token::{StellarAssetClient, TokenClient},
    Address, Env, Map, String, Vec,
};
pub use tidal_errors::ContractError;

use ledger::{Ledger, LsmShare};
use pausable::PauseAction;
use puppeteer::{ResponseHookMsg, TxState};
use types::{Config, ConfigOptional, ContractState, DataKey, NonNativeRewardsItem, Pause};
use unbond_batch::UnbondBatch;


#[cfg(test)]
mod test_batches;

#[cfg(test)]
mod test_bond;





// ─── Helpers ───────────────────────────────────────────────────────────────

fn require_admin(e: &Env, caller: &Address) -> Result<(), ContractError> {
    caller.require_auth();
    let stored: Address = e
        .storage()
        .instance()
        .get(&DataKey::Admin)
        .ok_or(ContractError::NotInitialized)?;
    if stored != *caller {
        return Err(ContractError::NotAdmin);
    }
    Ok(())
}

// ─── Contract ──────────────────────────────────────────────────────────────

#[contract]
pub struct TidalCore;

#[contractimpl]
impl TidalCore {
    // ── Setup ──────────────────────────────────────────────────────────────

    /// One-time initialization. Opens unbond batch 0, leaves the state
    /// machine in `Idle` and starts the LSM redeem interval. The core must be
    /// the mint admin of `config.token`.
    pub fn initialize(e: Env, admin: Address, config: Config) -> Result<(), ContractError> {
        if e.storage().instance().has(&DataKey::Admin) {
            return Err(ContractError::AlreadyInitialized);
        }
        config::validate(&config)?;
        e.storage().instance().set(&DataKey::Admin, &admin);
        config::save(&e, &config);
        e.storage()
            .instance()
            .set(&DataKey::State, &ContractState::Idle);
        e.storage()
            .instance()
            .set(&DataKey::LastLsmRedeem, &e.ledger().timestamp());
        unbond_batch::open(&e, 0);
        Ok(())
    }

    // ── Staking ────────────────────────────────────────────────────────────

    /// Bond `amount` of `token` and mint the derivative to `receiver`
    /// (defaults to `sender`). `token` is the base token or a registered LSM
    /// share token. Returns the minted amount.
    pub fn bond(
        e: Env,
        sender: Address,
        token: Address,
        amount: i128,
        receiver: Option<Address>,
        referral: Option<String>,
    ) -> Result<i128, ContractError> {
        sender.require_auth();
        pausable::require_not_paused(&e, PauseAction::Bond)?;
        let cfg = config::load(&e)?;
        if amount <= 0 {
            return Err(ContractError::InvalidAmount);
        }

        let lsm_validator = if token == cfg.base_token {
            None
        } else {
            Some(
                ledger::lsm_share_tokens(&e)
                    .get(token.clone())
                    .ok_or(ContractError::UnsupportedToken)?,
            )
        };
        let min_amount = if lsm_validator.is_some() {
            cfg.lsm_min_bond_amount
        } else {
            cfg.min_bond_amount
        };
        if amount < min_amount {
            return Err(ContractError::BondAmountTooLow);
        }

        let mut l = ledger::load(&e);
        if cfg.bond_limit > 0 && math::add_i128(l.total_bonded, amount)? > cfg.bond_limit {
            return Err(ContractError::BondLimitExceeded);
        }
        let minted = l.record_bond(amount, lsm_validator.is_none())?;
        ledger::save(&e, &l);

        if let Some(validator) = &lsm_validator {
            let mut pending = ledger::pending_lsm_shares(&e);
            ledger::credit_share(&mut pending, &token, validator, amount)?;
            ledger::save_pending_lsm_shares(&e, &pending);
        }

        TokenClient::new(&e, &token).transfer(&sender, &e.current_contract_address(), &amount);
        let receiver = receiver.unwrap_or_else(|| sender.clone());
        StellarAssetClient::new(&e, &cfg.token).mint(&receiver, &minted);

        events::emit_bond(&e, &receiver, &token, amount, minted, &referral);
        Ok(minted)
    }

    /// Burn `amount` of the derivative into the current unbond batch.
    /// Returns the batch id.
    pub fn unbond(e: Env, sender: Address, amount: i128) -> Result<u64, ContractError> {
        sender.require_auth();
        pausable::require_not_paused(&e, PauseAction::Unbond)?;
        let cfg = config::load(&e)?;
        if amount <= 0 {
            return Err(ContractError::InvalidAmount);
        }

        let mut l = ledger::load(&e);
        let expected = l.record_unbond(amount)?;
        ledger::save(&e, &l);
        let batch_id = unbond_batch::add_unbond_request(&e, &sender, amount, expected)?;

        TokenClient::new(&e, &cfg.token).burn(&sender, &amount);

        events::emit_unbond(&e, &sender, batch_id, amount, expected);
        Ok(batch_id)
    }

    // ── State machine ──────────────────────────────────────────────────────

    /// Advance the state machine by one step. Callable by anyone.
    pub fn tick(e: Env, caller: Address) -> Result<ContractState, ContractError> {
        caller.require_auth();
        fsm::tick(&e)
    }

    /// Response callback from the puppeteer. Returns `false` when the
    /// response does not answer the outstanding request and was ignored.
    pub fn puppeteer_hook(
        e: Env,
        caller: Address,
        msg: ResponseHookMsg,
    ) -> Result<bool, ContractError> {
        caller.require_auth();
        let cfg = config::load(&e)?;
        if caller != cfg.puppeteer {
            return Err(ContractError::NotPuppeteer);
        }
        Ok(puppeteer::record_response(&e, msg))
    }

    // ── Admin ──────────────────────────────────────────────────────────────

    pub fn update_config(
        e: Env,
        admin: Address,
        update: ConfigOptional,
    ) -> Result<(), ContractError> {
        require_admin(&e, &admin)?;
        let merged = config::merge(config::load(&e)?, update)?;
        config::save(&e, &merged);
        events::emit_config_updated(&e, &admin);
        Ok(())
    }

    pub fn update_non_native_receivers(
        e: Env,
        admin: Address,
        items: Vec<NonNativeRewardsItem>,
    ) -> Result<(), ContractError> {
        require_admin(&e, &admin)?;
        config::set_non_native_receivers(&e, &items)?;
        events::emit_config_updated(&e, &admin);
        Ok(())
    }

    /// Accept `token` as LSM shares of `validator`, or stop accepting it
    /// when `validator` is `None`.
    pub fn set_lsm_share_token(
        e: Env,
        admin: Address,
        token: Address,
        validator: Option<String>,
    ) -> Result<(), ContractError> {
        require_admin(&e, &admin)?;
        let mut tokens = ledger::lsm_share_tokens(&e);
        match validator {
            Some(v) => tokens.set(token, v),
            None => {
                tokens.remove(token);
            }
        }
        ledger::set_lsm_share_tokens(&e, &tokens);
        Ok(())
    }

    /// Freeze the current batch ahead of its switch time. Returns the id of
    /// the newly opened batch.
    pub fn switch_unbond_batch(e: Env, admin: Address) -> Result<u64, ContractError> {
        require_admin(&e, &admin)?;
        unbond_batch::switch_current(&e)
    }

    /// Settle a batch stuck in `WithdrawingEmergency` with the amount the
    /// operator recovered.
    pub fn process_emergency_batch(
        e: Env,
        admin: Address,
        batch_id: u64,
        unbonded_amount: i128,
    ) -> Result<UnbondBatch, ContractError> {
        require_admin(&e, &admin)?;
        unbond_batch::process_emergency(&e, batch_id, unbonded_amount)
    }

    pub fn set_pause(e: Env, admin: Address, pause: Pause) -> Result<(), ContractError> {
        require_admin(&e, &admin)?;
        pausable::set_pause(&e, &pause);
        Ok(())
    }

    pub fn pause(e: Env, admin: Address) -> Result<(), ContractError> {
        require_admin(&e, &admin)?;
        pausable::pause_all(&e);
        Ok(())
    }

    pub fn unpause(e: Env, admin: Address) -> Result<(), ContractError> {
        require_admin(&e, &admin)?;
        pausable::unpause_all(&e);
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────────────────

    pub fn config(e: Env) -> Result<Config, ContractError> {
        config::load(&e)
    }

    /// Native asset per derivative token, scaled by 1e18.
    pub fn exchange_rate(e: Env) -> Result<i128, ContractError> {
        ledger::load(&e).exchange_rate()
    }

    pub fn contract_state(e: Env) -> ContractState {
        fsm::contract_state(&e)
    }

    pub fn last_idle_tick(e: Env) -> u64 {
        fsm::last_idle_tick(&e)
    }

    pub fn unbond_batch(e: Env, batch_id: u64) -> Result<UnbondBatch, ContractError> {
        unbond_batch::load(&e, batch_id)
    }

    pub fn unbond_batches(e: Env, start_after: Option<u64>, limit: Option<u32>) -> Vec<UnbondBatch> {
        unbond_batch::list(&e, start_after, limit)
    }

    pub fn current_unbond_batch(e: Env) -> u64 {
        unbond_batch::current_id(&e)
    }

    /// Native amount owed to a request of `expected_amount` in a settled batch.
    pub fn unbond_payout(e: Env, batch_id: u64, expected_amount: i128) -> Result<i128, ContractError> {
        unbond_batch::payout(&e, batch_id, expected_amount)
    }

    pub fn last_puppeteer_response(e: Env) -> Option<ResponseHookMsg> {
        puppeteer::last_response(&e)
    }

    pub fn tx_state(e: Env) -> TxState {
        puppeteer::tx_state(&e)
    }

    pub fn pause_info(e: Env) -> Pause {
        pausable::pause_info(&e)
    }

    pub fn ledger(e: Env) -> Ledger {
        ledger::load(&e)
    }

    pub fn delegations(e: Env) -> Map<String, i128> {
        ledger::delegations(&e)
    }

    pub fn pending_lsm_shares(e: Env) -> Map<Address, LsmShare> {
        ledger::pending_lsm_shares(&e)
    }

    pub fn lsm_shares_to_redeem(e: Env) -> Map<Address, LsmShare> {
        ledger::lsm_shares_to_redeem(&e)
    }

    pub fn lsm_share_tokens(e: Env) -> Map<Address, String> {
        ledger::lsm_share_tokens(&e)
    }

    pub fn non_native_receivers(e: Env) -> Vec<NonNativeRewardsItem> {
        config::non_native_receivers(&e)
    }

    pub fn remote_balances(e: Env) -> Map<String, i128> {
        ledger::remote_balances(&e)
    }
}
