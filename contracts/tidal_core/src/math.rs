//! Overflow-safe arithmetic helpers for ledger calculations.
//!
//! All functions use checked arithmetic and return a `ContractError` on
//! overflow, underflow or division by zero. Amounts are non-negative `i128`,
//! so plain integer division rounds toward zero (floor).

use tidal_errors::ContractError;

/// Fixed-point scale for exchange rates and slashing effects (1.0 == 1e18).
pub const PRECISION: i128 = 1_000_000_000_000_000_000;

/// Basis-point denominator.
pub const BPS_DENOMINATOR: i128 = 10_000;

#[inline]
pub fn add_i128(a: i128, b: i128) -> Result<i128, ContractError> {
    a.checked_add(b).ok_or(ContractError::Overflow)
}

#[inline]
pub fn sub_i128(a: i128, b: i128) -> Result<i128, ContractError> {
    a.checked_sub(b).ok_or(ContractError::Underflow)
}

/// Subtracts `amount` from a non-negative balance, refusing to go below zero.
#[inline]
pub fn debit(balance: i128, amount: i128) -> Result<i128, ContractError> {
    if amount > balance {
        return Err(ContractError::Underflow);
    }
    sub_i128(balance, amount)
}

#[inline]
pub fn add_u64(a: u64, b: u64) -> Result<u64, ContractError> {
    a.checked_add(b).ok_or(ContractError::Overflow)
}

/// `floor(a * b / c)` with a checked intermediate product.
#[inline]
pub fn mul_div_floor(a: i128, b: i128, c: i128) -> Result<i128, ContractError> {
    if c == 0 {
        return Err(ContractError::DivisionByZero);
    }
    let product = a.checked_mul(b).ok_or(ContractError::Overflow)?;
    product.checked_div(c).ok_or(ContractError::Overflow)
}

/// Basis-point share of an amount: `floor(amount * bps / 10_000)`.
#[inline]
pub fn bps(amount: i128, bps: u32) -> Result<i128, ContractError> {
    mul_div_floor(amount, bps as i128, BPS_DENOMINATOR)
}
