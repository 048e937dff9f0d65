//! # Exchange-Rate Ledger
//!
//! Tracks the native backing of the derivative token and converts between
//! the two. The backing is `total_bonded + pending_rewards`; everything else
//! in [`Ledger`] is bookkeeping for funds moving between the core, the
//! puppeteer and the remote chain.
//!
//! All conversions floor toward zero.

use soroban_sdk::{contracttype, Address, Env, Map, String, Vec};
use tidal_errors::ContractError;

use crate::events;
use crate::math::{self, PRECISION};
use crate::puppeteer::{RemoteCoin, ValidatorAmount};
use crate::types::DataKey;

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Ledger {
    /// Native amount backing outstanding derivative tokens.
    pub total_bonded: i128,
    /// Claimed rewards net of fee, not yet delegated.
    pub pending_rewards: i128,
    /// Protocol fee accumulated on the ICA, sent with the next rewards delegation.
    pub pending_fee: i128,
    pub total_dasset_supply: i128,
    /// Base tokens held by the core awaiting transfer to the ICA.
    pub pending_native_transfer: i128,
    /// Base tokens handed to the puppeteer whose transfer is unacknowledged.
    pub in_flight: i128,
    /// Base tokens on the ICA awaiting delegation.
    pub ica_pending_native: i128,
    pub slashed_total: i128,
}

/// LSM shares of a single share token.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LsmShare {
    pub validator: String,
    pub amount: i128,
}

pub fn load(e: &Env) -> Ledger {
    e.storage()
        .instance()
        .get(&DataKey::Ledger)
        .unwrap_or_default()
}

pub fn save(e: &Env, ledger: &Ledger) {
    e.storage().instance().set(&DataKey::Ledger, ledger);
}

// ─── Conversions ───────────────────────────────────────────────────────────

/// Native asset per derivative token, scaled by `PRECISION`.
pub fn calc_exchange_rate(ledger: &Ledger) -> Result<i128, ContractError> {
    if ledger.total_dasset_supply == 0 {
        return Ok(PRECISION);
    }
    let backing = backing(ledger)?;
    math::mul_div_floor(backing, PRECISION, ledger.total_dasset_supply)
}

fn backing(ledger: &Ledger) -> Result<i128, ContractError> {
    math::add_i128(ledger.total_bonded, ledger.pending_rewards)
}

/// Derivative tokens minted for `amount` of native asset. The first bond
/// mints 1:1; a supply left without backing accepts no new bonds.
pub fn calc_mint(amount: i128, supply: i128, backing: i128) -> Result<i128, ContractError> {
    if supply == 0 {
        return Ok(amount);
    }
    if backing <= 0 {
        return Err(ContractError::NoBacking);
    }
    math::mul_div_floor(amount, supply, backing)
}

/// Native amount owed for burning `dasset_amount` derivative tokens.
pub fn calc_expected(
    dasset_amount: i128,
    supply: i128,
    backing: i128,
) -> Result<i128, ContractError> {
    math::mul_div_floor(dasset_amount, backing, supply)
}

/// `min(1, received / expected)` in fixed point.
pub fn slashing_effect(received: i128, expected: i128) -> Result<i128, ContractError> {
    if expected <= 0 {
        return Err(ContractError::ZeroExpectedAmount);
    }
    if received >= expected {
        return Ok(PRECISION);
    }
    math::mul_div_floor(received, PRECISION, expected)
}

pub fn apply_slashing_effect(expected: i128, effect: i128) -> Result<i128, ContractError> {
    math::mul_div_floor(expected, effect, PRECISION)
}

// ─── Bond / unbond accounting ──────────────────────────────────────────────

impl Ledger {
    pub fn exchange_rate(&self) -> Result<i128, ContractError> {
        calc_exchange_rate(self)
    }

    /// Books `amount` of native value and returns the derivative amount to mint.
    /// `native` is false for LSM shares, which are held separately until redeemed.
    pub fn record_bond(&mut self, amount: i128, native: bool) -> Result<i128, ContractError> {
        let minted = calc_mint(amount, self.total_dasset_supply, backing(self)?)?;
        if minted <= 0 {
            return Err(ContractError::InvalidAmount);
        }
        self.total_bonded = math::add_i128(self.total_bonded, amount)?;
        self.total_dasset_supply = math::add_i128(self.total_dasset_supply, minted)?;
        if native {
            self.pending_native_transfer = math::add_i128(self.pending_native_transfer, amount)?;
        }
        Ok(minted)
    }

    /// Removes burned derivative tokens and the native amount they were
    /// worth. Returns that native amount.
    pub fn record_unbond(&mut self, dasset_amount: i128) -> Result<i128, ContractError> {
        if dasset_amount <= 0 || dasset_amount > self.total_dasset_supply {
            return Err(ContractError::InvalidAmount);
        }
        let expected = calc_expected(dasset_amount, self.total_dasset_supply, backing(self)?)?;
        if expected <= 0 {
            return Err(ContractError::ZeroExpectedAmount);
        }

        let from_bonded = expected.min(self.total_bonded);
        self.total_bonded = math::debit(self.total_bonded, from_bonded)?;
        self.pending_rewards =
            math::debit(self.pending_rewards, math::sub_i128(expected, from_bonded)?)?;
        self.total_dasset_supply = math::debit(self.total_dasset_supply, dasset_amount)?;
        Ok(expected)
    }

    /// Books a loss observed on the remote delegations. The loss never takes
    /// `total_bonded` below zero.
    pub fn confirm_slashing(&mut self, e: &Env, loss: i128) -> Result<(), ContractError> {
        if loss <= 0 {
            return Ok(());
        }
        let applied = loss.min(self.total_bonded);
        self.total_bonded = math::debit(self.total_bonded, applied)?;
        self.slashed_total = math::add_i128(self.slashed_total, applied)?;
        events::emit_slashing_detected(e, applied, self.total_bonded);
        Ok(())
    }
}

// ─── LSM shares ────────────────────────────────────────────────────────────

pub fn lsm_share_tokens(e: &Env) -> Map<Address, String> {
    e.storage()
        .instance()
        .get(&DataKey::LsmShareTokens)
        .unwrap_or_else(|| Map::new(e))
}

pub fn set_lsm_share_tokens(e: &Env, tokens: &Map<Address, String>) {
    e.storage().instance().set(&DataKey::LsmShareTokens, tokens);
}

pub fn pending_lsm_shares(e: &Env) -> Map<Address, LsmShare> {
    load_shares(e, DataKey::PendingLsmShares)
}

pub fn lsm_shares_to_redeem(e: &Env) -> Map<Address, LsmShare> {
    load_shares(e, DataKey::LsmSharesToRedeem)
}

fn load_shares(e: &Env, key: DataKey) -> Map<Address, LsmShare> {
    e.storage()
        .instance()
        .get(&key)
        .unwrap_or_else(|| Map::new(e))
}

pub fn save_pending_lsm_shares(e: &Env, shares: &Map<Address, LsmShare>) {
    e.storage().instance().set(&DataKey::PendingLsmShares, shares);
}

pub fn save_lsm_shares_to_redeem(e: &Env, shares: &Map<Address, LsmShare>) {
    e.storage().instance().set(&DataKey::LsmSharesToRedeem, shares);
}

pub fn credit_share(
    shares: &mut Map<Address, LsmShare>,
    token: &Address,
    validator: &String,
    amount: i128,
) -> Result<(), ContractError> {
    let current = shares.get(token.clone()).map(|s| s.amount).unwrap_or(0);
    shares.set(
        token.clone(),
        LsmShare {
            validator: validator.clone(),
            amount: math::add_i128(current, amount)?,
        },
    );
    Ok(())
}

/// Debits `amount` from the share entry of `token`, dropping emptied entries.
/// Returns the validator the shares belong to.
pub fn debit_share(
    shares: &mut Map<Address, LsmShare>,
    token: &Address,
    amount: i128,
) -> Result<String, ContractError> {
    let share = shares.get(token.clone()).ok_or(ContractError::InvalidAmount)?;
    let left = math::debit(share.amount, amount)?;
    if left == 0 {
        shares.remove(token.clone());
    } else {
        shares.set(
            token.clone(),
            LsmShare {
                validator: share.validator.clone(),
                amount: left,
            },
        );
    }
    Ok(share.validator)
}

// ─── Remote view ───────────────────────────────────────────────────────────

pub fn delegations(e: &Env) -> Map<String, i128> {
    e.storage()
        .instance()
        .get(&DataKey::Delegations)
        .unwrap_or_else(|| Map::new(e))
}

pub fn save_delegations(e: &Env, delegations: &Map<String, i128>) {
    e.storage().instance().set(&DataKey::Delegations, delegations);
}

pub fn total_delegated(delegations: &Map<String, i128>) -> Result<i128, ContractError> {
    let mut total = 0i128;
    for (_, amount) in delegations.iter() {
        total = math::add_i128(total, amount)?;
    }
    Ok(total)
}

pub fn credit_delegations(
    delegations: &mut Map<String, i128>,
    items: &Vec<ValidatorAmount>,
) -> Result<(), ContractError> {
    for item in items.iter() {
        let current = delegations.get(item.validator.clone()).unwrap_or(0);
        delegations.set(item.validator, math::add_i128(current, item.amount)?);
    }
    Ok(())
}

/// Removes undelegated amounts. A validator never goes below zero; the
/// remote side is authoritative and corrects the view with the next snapshot.
pub fn debit_delegations(delegations: &mut Map<String, i128>, items: &Vec<ValidatorAmount>) {
    for item in items.iter() {
        let current = delegations.get(item.validator.clone()).unwrap_or(0);
        let left = current.saturating_sub(item.amount);
        if left <= 0 {
            delegations.remove(item.validator);
        } else {
            delegations.set(item.validator, left);
        }
    }
}

pub fn remote_balances(e: &Env) -> Map<String, i128> {
    e.storage()
        .instance()
        .get(&DataKey::RemoteBalances)
        .unwrap_or_else(|| Map::new(e))
}

pub fn save_remote_balances(e: &Env, balances: &Map<String, i128>) {
    e.storage().instance().set(&DataKey::RemoteBalances, balances);
}

/// Replaces the known non-native balances with a fresh report from the ICA.
pub fn refresh_remote_balances(e: &Env, coins: &Vec<RemoteCoin>) {
    let mut balances = Map::new(e);
    for coin in coins.iter() {
        balances.set(coin.denom, coin.amount);
    }
    save_remote_balances(e, &balances);
}
