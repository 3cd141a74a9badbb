// Amount conversion between human decimal units and on-chain integer units
// Every network carries its own precision, so conversions always take the
// target network's decimals rather than a cached integer amount
//
// Numan Thabit 2025 Nov

use alloy_primitives::U256;
use anyhow::{ensure, Context, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::MAX_DECIMALS;

/// `round(amount * 10^decimals)` as an unsigned integer.
pub fn to_units(amount: Decimal, decimals: u32) -> Result<U256> {
    ensure!(
        decimals <= MAX_DECIMALS,
        "precision {decimals} exceeds {MAX_DECIMALS}"
    );
    ensure!(amount > Decimal::ZERO, "amount {amount} must be positive");
    let factor = Decimal::from_i128_with_scale(10i128.pow(decimals), 0);
    let scaled = amount
        .checked_mul(factor)
        .with_context(|| format!("amount {amount} overflows at precision {decimals}"))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let units = scaled
        .to_u128()
        .with_context(|| format!("amount {amount} is not representable"))?;
    ensure!(
        units > 0,
        "amount {amount} rounds to zero at precision {decimals}"
    );
    Ok(U256::from(units))
}

/// Integer units back to a human amount. Values beyond what a `Decimal`
/// can hold (e.g. unlimited allowances) saturate at `Decimal::MAX`.
pub fn from_units(units: U256, decimals: u32) -> Decimal {
    let Ok(raw) = u128::try_from(units) else {
        return Decimal::MAX;
    };
    let Ok(mantissa) = i128::try_from(raw) else {
        return Decimal::MAX;
    };
    match Decimal::try_from_i128_with_scale(mantissa, decimals) {
        Ok(value) => value.normalize(),
        Err(_) => {
            // mantissa beyond 96 bits: drop precision before giving up
            let whole = raw / 10u128.pow(decimals.min(MAX_DECIMALS));
            i128::try_from(whole)
                .ok()
                .and_then(|w| Decimal::try_from_i128_with_scale(w, 0).ok())
                .unwrap_or(Decimal::MAX)
        }
    }
}
