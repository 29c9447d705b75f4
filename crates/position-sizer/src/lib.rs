use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SizingError {
    #[error("Invalid price: {0} (must be > 0)")]
    InvalidPrice(Decimal),

    #[error("Invalid risk fraction: {0} (must be in (0, 1])")]
    InvalidRiskFraction(f64),

    #[error("Position size overflow (cash {cash}, price {last_price})")]
    Overflow { cash: Decimal, last_price: Decimal },
}

/// Output of one sizing pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingResult {
    /// Cash reported by the broker
    pub cash: Decimal,

    /// Reference price the quantity was computed against
    pub last_price: Decimal,

    /// Whole units to trade, never negative
    pub quantity: u64,
}

/// Cash-at-risk position sizer
///
/// Commits a fixed fraction of available cash to each trade:
///   quantity = round(cash * risk_fraction / last_price)
///
/// Rounding is half-to-even (2.5 -> 2, 3.5 -> 4). Negative cash sizes to
/// zero rather than a negative quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CashAtRiskSizer {
    /// Fraction of cash committed per trade (e.g., 0.5 = 50%)
    pub risk_fraction: f64,
}

impl Default for CashAtRiskSizer {
    fn default() -> Self {
        Self { risk_fraction: 0.5 }
    }
}

impl CashAtRiskSizer {
    pub fn new(risk_fraction: f64) -> Result<Self, SizingError> {
        validate_risk_fraction(risk_fraction)?;
        Ok(Self { risk_fraction })
    }

    pub fn size(&self, cash: Decimal, last_price: Decimal) -> Result<SizingResult, SizingError> {
        size(cash, last_price, self.risk_fraction)
    }
}

pub fn validate_risk_fraction(risk_fraction: f64) -> Result<(), SizingError> {
    // NaN fails both comparisons
    if risk_fraction > 0.0 && risk_fraction <= 1.0 {
        Ok(())
    } else {
        Err(SizingError::InvalidRiskFraction(risk_fraction))
    }
}

/// Compute the trade quantity for `cash` at `last_price`.
///
/// Pure: the caller fetches cash and price.
pub fn size(
    cash: Decimal,
    last_price: Decimal,
    risk_fraction: f64,
) -> Result<SizingResult, SizingError> {
    if last_price <= Decimal::ZERO {
        return Err(SizingError::InvalidPrice(last_price));
    }
    validate_risk_fraction(risk_fraction)?;

    let fraction =
        Decimal::from_f64(risk_fraction).ok_or(SizingError::InvalidRiskFraction(risk_fraction))?;

    let overflow = || SizingError::Overflow { cash, last_price };
    let committed = cash.max(Decimal::ZERO).checked_mul(fraction).ok_or_else(overflow)?;
    let raw = committed.checked_div(last_price).ok_or_else(overflow)?;
    let quantity = raw
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
        .to_u64()
        .ok_or_else(overflow)?;

    Ok(SizingResult {
        cash,
        last_price,
        quantity,
    })
}
