use soroban_sdk::{contractclient, Env, Vec};

use crate::puppeteer::ValidatorAmount;

/// Distribution math across the validator set. The core only asks how to
/// split an amount; the strategy owns validator weights.
#[contractclient(name = "StrategyClient")]
pub trait StrategyInterface {
    fn calc_deposit(env: Env, amount: i128) -> Vec<ValidatorAmount>;
    fn calc_withdraw(env: Env, amount: i128) -> Vec<ValidatorAmount>;
}
