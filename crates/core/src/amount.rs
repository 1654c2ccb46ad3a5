//! Amount - Non-negative decimal wrapper for money
//!
//! Every monetary value in PayGate (caps, charges, fees, refunds) MUST be
//! non-negative. This is enforced at the type level.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur when constructing amounts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount cannot be negative: {0}")]
    NegativeAmount(Decimal),
}

/// A non-negative decimal amount of money, in major currency units (dollars).
///
/// # Invariant
/// The inner value is always >= 0. This is enforced by the constructor.
///
/// # Example
/// ```
/// use paygate_core::Amount;
/// use rust_decimal::Decimal;
///
/// let cap = Amount::new(Decimal::new(2000, 0)).unwrap();
/// let charge = Amount::new(Decimal::new(1500, 0)).unwrap();
/// assert_eq!(cap.checked_sub(&charge).unwrap().value(), Decimal::new(500, 0));
///
/// // Negative amounts are rejected
/// assert!(Amount::new(Decimal::new(-1, 0)).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Zero amount constant
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a new Amount from a Decimal.
    ///
    /// Returns an error if the value is negative.
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value < Decimal::ZERO {
            Err(AmountError::NegativeAmount(value))
        } else {
            Ok(Self(value))
        }
    }

    /// Create an Amount without validation.
    ///
    /// # Safety
    /// The caller MUST ensure the value is non-negative.
    /// Use only for trusted sources (e.g., rows read from validated storage).
    #[inline]
    pub const fn new_unchecked(value: Decimal) -> Self {
        Self(value)
    }

    /// Get the inner Decimal value
    #[inline]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    /// Check if the amount is zero
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Checked addition - None on decimal overflow
    pub fn checked_add(&self, other: &Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction - None if the result would be negative
    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        let result = self.0.checked_sub(other.0)?;
        if result < Decimal::ZERO {
            None
        } else {
            Some(Amount(result))
        }
    }

    /// Subtraction clamped at zero. Used where a shortfall should read as
    /// "nothing remaining" rather than an error.
    pub fn saturating_sub(&self, other: &Amount) -> Amount {
        self.checked_sub(other).unwrap_or(Amount::ZERO)
    }

    /// Multiply by a non-negative rate, rounded to cents.
    ///
    /// Returns None for negative rates or on overflow. Used for fee math
    /// (e.g. a 2.9% processor rate).
    pub fn scaled(&self, rate: Decimal) -> Option<Amount> {
        if rate < Decimal::ZERO {
            return None;
        }
        self.0.checked_mul(rate).map(|v| Amount(v.round_dp(2)))
    }

    /// Ratio of this amount to `total`, or zero when `total` is zero.
    ///
    /// Used for usage-limit monitoring (charged / authorized).
    pub fn ratio_of(&self, total: &Amount) -> Decimal {
        if total.is_zero() {
            Decimal::ZERO
        } else {
            self.0 / total.0
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_positive() {
        let amount = Amount::new(dec!(100)).unwrap();
        assert_eq!(amount.value(), dec!(100));
    }

    #[test]
    fn test_amount_negative_rejected() {
        let result = Amount::new(dec!(-100));
        assert!(matches!(result, Err(AmountError::NegativeAmount(_))));
    }

    #[test]
    fn test_checked_sub_prevents_negative() {
        let a = Amount::new(dec!(50)).unwrap();
        let b = Amount::new(dec!(100)).unwrap();
        assert!(a.checked_sub(&b).is_none());
        assert_eq!(a.saturating_sub(&b), Amount::ZERO);
    }

    #[test]
    fn test_checked_add() {
        let a = Amount::new(dec!(1500)).unwrap();
        let b = Amount::new(dec!(2500)).unwrap();
        assert_eq!(a.checked_add(&b).unwrap().value(), dec!(4000));
    }

    #[test]
    fn test_scaled_rounds_to_cents() {
        let amount = Amount::new(dec!(1500)).unwrap();
        let fee = amount.scaled(dec!(0.029)).unwrap();
        assert_eq!(fee.value(), dec!(43.50));

        // Negative rates are rejected
        assert!(amount.scaled(dec!(-0.01)).is_none());
    }

    #[test]
    fn test_ratio_of() {
        let charged = Amount::new(dec!(4000)).unwrap();
        let authorized = Amount::new(dec!(5000)).unwrap();
        assert_eq!(charged.ratio_of(&authorized), dec!(0.8));
        assert_eq!(charged.ratio_of(&Amount::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_serde_roundtrip() {
        let amount = Amount::new(dec!(123.45)).unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        let parsed: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(amount, parsed);
    }

    #[test]
    fn test_serde_rejects_negative() {
        let result: Result<Amount, _> = serde_json::from_str("\"-5\"");
        assert!(result.is_err());
    }
}
