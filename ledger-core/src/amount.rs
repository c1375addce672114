//! Money amounts
//!
//! Money is an exact [`Decimal`] with two decimal places. Binary floats
//! never touch a balance.

use crate::error::{Error, Result};
use rust_decimal::Decimal;

/// Money amount (exact decimal)
pub type Amount = Decimal;

/// Decimal places carried by every stored amount
pub const MONEY_SCALE: u32 = 2;

/// Largest amount or balance the `NUMERIC(15,2)` column holds:
/// 9,999,999,999,999.99
pub const MAX_AMOUNT: Amount = Decimal::from_parts(2_764_472_319, 232_830, 0, false, 2);

/// Check that `amount` is a positive value representable in cents.
///
/// Trailing zeros are ignored, so `10.500` is accepted while `10.505`
/// is rejected.
pub fn validate_amount(amount: Amount) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(format!(
            "Amount must be positive, got {}",
            amount
        )));
    }

    if amount.normalize().scale() > MONEY_SCALE {
        return Err(Error::InvalidAmount(format!(
            "Amount {} has more than {} decimal places",
            amount, MONEY_SCALE
        )));
    }

    if amount > MAX_AMOUNT {
        return Err(Error::InvalidAmount(format!(
            "Amount {} exceeds the maximum of {}",
            amount, MAX_AMOUNT
        )));
    }

    Ok(())
}

/// `balance + amount`, refusing totals above [`MAX_AMOUNT`]
pub fn credit(balance: Amount, amount: Amount) -> Result<Amount> {
    match balance.checked_add(amount) {
        Some(total) if total <= MAX_AMOUNT => Ok(total),
        _ => Err(Error::InvalidAmount(format!(
            "Balance would exceed the maximum of {}",
            MAX_AMOUNT
        ))),
    }
}

/// Rescale to the stored money scale. Callers validate first.
pub fn to_money(amount: Amount) -> Amount {
    let mut amount = amount.normalize();
    amount.rescale(MONEY_SCALE);
    amount
}
