use soroban_sdk::{Env, Vec};
use tidal_errors::ContractError;

use crate::math::BPS_DENOMINATOR;
use crate::types::{Config, ConfigOptional, DataKey, NonNativeRewardsItem};

pub fn load(e: &Env) -> Result<Config, ContractError> {
    e.storage()
        .instance()
        .get(&DataKey::Config)
        .ok_or(ContractError::NotInitialized)
}

pub fn save(e: &Env, cfg: &Config) {
    e.storage().instance().set(&DataKey::Config, cfg);
}

pub fn validate(cfg: &Config) -> Result<(), ContractError> {
    if cfg.fee_bps as i128 > BPS_DENOMINATOR {
        return Err(ContractError::InvalidFeeBps);
    }
    if cfg.bond_limit < 0 || cfg.min_bond_amount < 0 || cfg.lsm_min_bond_amount < 0 {
        return Err(ContractError::InvalidConfig);
    }
    Ok(())
}

/// Merges `update` into `cfg`; the result is validated before it is returned.
pub fn merge(mut cfg: Config, update: ConfigOptional) -> Result<Config, ContractError> {
    if let Some(v) = update.base_token {
        cfg.base_token = v;
    }
    if let Some(v) = update.remote_denom {
        cfg.remote_denom = v;
    }
    if let Some(v) = update.token {
        cfg.token = v;
    }
    if let Some(v) = update.puppeteer {
        cfg.puppeteer = v;
    }
    if let Some(v) = update.strategy {
        cfg.strategy = v;
    }
    if let Some(v) = update.validators_set {
        cfg.validators_set = v;
    }
    if let Some(v) = update.withdrawal_voucher {
        cfg.withdrawal_voucher = v;
    }
    if let Some(v) = update.withdrawal_manager {
        cfg.withdrawal_manager = v;
    }
    if let Some(v) = update.idle_min_interval {
        cfg.idle_min_interval = v;
    }
    if let Some(v) = update.unbond_batch_switch_time {
        cfg.unbond_batch_switch_time = v;
    }
    if let Some(v) = update.unbonding_period {
        cfg.unbonding_period = v;
    }
    if let Some(v) = update.unbonding_safe_period {
        cfg.unbonding_safe_period = v;
    }
    if let Some(v) = update.bond_limit {
        cfg.bond_limit = v;
    }
    if let Some(v) = update.min_bond_amount {
        cfg.min_bond_amount = v;
    }
    if let Some(v) = update.lsm_min_bond_amount {
        cfg.lsm_min_bond_amount = v;
    }
    if let Some(v) = update.lsm_redeem_threshold {
        cfg.lsm_redeem_threshold = v;
    }
    if let Some(v) = update.lsm_redeem_max_interval {
        cfg.lsm_redeem_max_interval = v;
    }
    if let Some(v) = update.fee_bps {
        cfg.fee_bps = v;
    }
    if let Some(v) = update.fee_address {
        cfg.fee_address = v;
    }
    if let Some(v) = update.remote_timeout {
        cfg.remote_timeout = v;
    }
    if let Some(v) = update.emergency_address {
        cfg.emergency_address = v;
    }
    validate(&cfg)?;
    Ok(cfg)
}

pub fn non_native_receivers(e: &Env) -> Vec<NonNativeRewardsItem> {
    e.storage()
        .instance()
        .get(&DataKey::NonNativeReceivers)
        .unwrap_or_else(|| Vec::new(e))
}

pub fn set_non_native_receivers(
    e: &Env,
    items: &Vec<NonNativeRewardsItem>,
) -> Result<(), ContractError> {
    for item in items.iter() {
        if item.fee_bps as i128 > BPS_DENOMINATOR {
            return Err(ContractError::InvalidFeeBps);
        }
        if item.min_amount < 0 {
            return Err(ContractError::InvalidConfig);
        }
    }
    e.storage()
        .instance()
        .set(&DataKey::NonNativeReceivers, items);
    Ok(())
}
