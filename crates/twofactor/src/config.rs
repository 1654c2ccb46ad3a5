//! Two-factor configuration
//!
//! All thresholds are configurable via file, not hardcoded. Defaults are
//! conservative (stricter verification).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Gate-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorConfig {
    /// Amount above which verification is required (user settings may
    /// override per user)
    #[serde(default = "default_amount_threshold")]
    pub amount_threshold: Decimal,

    /// Minutes a verification code stays valid
    #[serde(default = "default_otp_ttl_minutes")]
    pub otp_ttl_minutes: i64,

    /// Wrong entries tolerated per code before it is burned
    #[serde(default = "default_max_code_attempts")]
    pub max_code_attempts: u32,

    /// Verification attempts allowed per user per window
    #[serde(default = "default_rate_limit_attempts")]
    pub rate_limit_attempts: u32,

    /// Sliding rate-limit window in minutes
    #[serde(default = "default_rate_limit_window_minutes")]
    pub rate_limit_window_minutes: i64,

    /// Days a trusted device bypasses verification
    #[serde(default = "default_device_trust_days")]
    pub device_trust_days: i64,

    /// Successful payments per day before activity reads as unusual
    #[serde(default = "default_daily_payment_threshold")]
    pub daily_payment_threshold: u32,

    /// Multiple of the recent average above which an amount is unusual
    #[serde(default = "default_average_multiplier")]
    pub average_multiplier: Decimal,
}

fn default_amount_threshold() -> Decimal {
    Decimal::new(100, 0)
}

fn default_otp_ttl_minutes() -> i64 {
    10
}

fn default_max_code_attempts() -> u32 {
    3
}

fn default_rate_limit_attempts() -> u32 {
    5
}

fn default_rate_limit_window_minutes() -> i64 {
    15
}

fn default_device_trust_days() -> i64 {
    30
}

fn default_daily_payment_threshold() -> u32 {
    5
}

fn default_average_multiplier() -> Decimal {
    Decimal::new(3, 0)
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            amount_threshold: default_amount_threshold(),
            otp_ttl_minutes: default_otp_ttl_minutes(),
            max_code_attempts: default_max_code_attempts(),
            rate_limit_attempts: default_rate_limit_attempts(),
            rate_limit_window_minutes: default_rate_limit_window_minutes(),
            device_trust_days: default_device_trust_days(),
            daily_payment_threshold: default_daily_payment_threshold(),
            average_multiplier: default_average_multiplier(),
        }
    }
}

impl TwoFactorConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn otp_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.otp_ttl_minutes)
    }

    pub fn rate_limit_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.rate_limit_window_minutes)
    }

    pub fn device_trust_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.device_trust_days)
    }
}

/// How a user's codes are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    #[default]
    Email,
    Sms,
}

/// Per-user security preferences, with platform defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecuritySettings {
    /// Require verification for every payment regardless of amount
    #[serde(default)]
    pub always_2fa: bool,

    /// Per-user override of the platform amount threshold
    #[serde(default)]
    pub threshold_override: Option<Decimal>,

    #[serde(default)]
    pub method: DeliveryMethod,
}

impl SecuritySettings {
    /// Effective threshold for this user
    pub fn threshold(&self, config: &TwoFactorConfig) -> Decimal {
        self.threshold_override.unwrap_or(config.amount_threshold)
    }
}
