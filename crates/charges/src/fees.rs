//! Fee model
//!
//! Informational only: fees are computed for receipts and notifications
//! and never affect the authorization math beyond being part of `amount`.

use paygate_core::Amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Platform fee configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Processor percentage rate (e.g. 0.029 for 2.9%)
    #[serde(default = "default_processor_rate")]
    pub processor_rate: Decimal,

    /// Fixed processor fee per charge
    #[serde(default = "default_processor_fixed")]
    pub processor_fixed: Decimal,

    /// Flat platform fee per charge
    #[serde(default = "default_platform_flat")]
    pub platform_flat: Decimal,
}

fn default_processor_rate() -> Decimal {
    Decimal::new(29, 3) // 2.9%
}

fn default_processor_fixed() -> Decimal {
    Decimal::new(30, 2) // $0.30
}

fn default_platform_flat() -> Decimal {
    Decimal::new(250, 2) // $2.50
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            processor_rate: default_processor_rate(),
            processor_fixed: default_processor_fixed(),
            platform_flat: default_platform_flat(),
        }
    }
}

impl FeeSchedule {
    /// Compute the fee breakdown for a charge amount
    pub fn breakdown(&self, amount: Amount) -> FeeBreakdown {
        let percentage = amount.scaled(self.processor_rate).unwrap_or(Amount::ZERO);
        let processor_fee = percentage
            .checked_add(&Amount::new_unchecked(self.processor_fixed))
            .unwrap_or(percentage);
        FeeBreakdown {
            processor_fee,
            platform_fee: Amount::new_unchecked(self.platform_flat),
        }
    }
}

/// Per-charge fee breakdown, surfaced in receipts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub processor_fee: Amount,
    pub platform_fee: Amount,
}

impl FeeBreakdown {
    pub fn total(&self) -> Amount {
        self.processor_fee
            .checked_add(&self.platform_fee)
            .unwrap_or(self.processor_fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_breakdown() {
        let schedule = FeeSchedule::default();
        let fees = schedule.breakdown(Amount::new(dec!(1500)).unwrap());

        // 1500 * 0.029 + 0.30 = 43.80
        assert_eq!(fees.processor_fee.value(), dec!(43.80));
        assert_eq!(fees.platform_fee.value(), dec!(2.50));
        assert_eq!(fees.total().value(), dec!(46.30));
    }

    #[test]
    fn test_zero_amount() {
        let fees = FeeSchedule::default().breakdown(Amount::ZERO);
        assert_eq!(fees.processor_fee.value(), dec!(0.30));
        assert_eq!(fees.total().value(), dec!(2.80));
    }

    #[test]
    fn test_serde_roundtrip() {
        let fees = FeeSchedule::default().breakdown(Amount::new(dec!(100)).unwrap());
        let json = serde_json::to_string(&fees).unwrap();
        let parsed: FeeBreakdown = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, fees);
    }

    #[test]
    fn test_partial_config() {
        let json = r#"{ "platform_flat": "5.00" }"#;
        let schedule: FeeSchedule = serde_json::from_str(json).unwrap();
        assert_eq!(schedule.platform_flat, dec!(5.00));
        assert_eq!(schedule.processor_rate, dec!(0.029)); // default
    }
}
