//! Monitoring configuration
//!
//! Rule thresholds mirror the platform's abuse patterns: bursts of
//! failed verifications, payment velocity, high-value consents,
//! repeated rail failures, revocation spikes, and address churn.

use paygate_audit::Severity;
use serde::{Deserialize, Serialize};

/// The built-in alert rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// >= N failed verification attempts per user per window
    FailedTwoFactorBurst,
    /// >= N charge attempts per client per window
    PaymentVelocity,
    /// Authorization with a total cap at or above $N
    HighValueAuthorization,
    /// >= N failed charges per contract per window
    RepeatedPaymentFailures,
    /// >= N revocations platform-wide per window
    RevocationSpike,
    /// > N distinct addresses per user per window
    GeographicAnomaly,
    /// Risk scorer flagged a transaction at the critical threshold
    HighRiskScore,
    /// total_charged approaching total_authorized (usage sweep)
    UsageLimit,
    /// Elevated rail failure rate (hourly sweep)
    RailFailurePattern,
    /// Payment method expiring soon (daily sweep)
    AuthorizationExpiring,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::FailedTwoFactorBurst => "failed_two_factor_burst",
            RuleKind::PaymentVelocity => "payment_velocity",
            RuleKind::HighValueAuthorization => "high_value_authorization",
            RuleKind::RepeatedPaymentFailures => "repeated_payment_failures",
            RuleKind::RevocationSpike => "revocation_spike",
            RuleKind::GeographicAnomaly => "geographic_anomaly",
            RuleKind::HighRiskScore => "high_risk_score",
            RuleKind::UsageLimit => "usage_limit",
            RuleKind::RailFailurePattern => "rail_failure_pattern",
            RuleKind::AuthorizationExpiring => "authorization_expiring",
        }
    }
}

/// One alert rule: severity, threshold, window, cooldown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub kind: RuleKind,
    pub severity: Severity,
    pub enabled: bool,
    /// Count threshold; dollars for `HighValueAuthorization`
    pub threshold: u32,
    pub window_minutes: i64,
    /// Minutes before the same rule+subject may fire again.
    /// Zero means fire once per subject, ever.
    pub cooldown_minutes: i64,
}

/// Monitoring service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,

    /// Days of warning before a payment method expires
    #[serde(default = "default_expiry_warning_days")]
    pub expiry_warning_days: i64,

    /// total_charged / total_authorized ratio that triggers a usage alert
    #[serde(default = "default_usage_alert_ratio")]
    pub usage_alert_ratio: rust_decimal::Decimal,

    /// Failed charges per hour that indicate a rail problem
    #[serde(default = "default_rail_failure_threshold")]
    pub rail_failure_threshold: u32,

    /// Where non-user alerts are delivered
    #[serde(default = "default_alert_recipient")]
    pub alert_recipient: String,

    // Sweep schedules
    #[serde(default = "default_expiry_sweep_hours")]
    pub expiry_sweep_hours: u64,
    #[serde(default = "default_usage_sweep_hours")]
    pub usage_sweep_hours: u64,
    #[serde(default = "default_rail_sweep_minutes")]
    pub rail_sweep_minutes: u64,
    #[serde(default = "default_rules_sweep_minutes")]
    pub rules_sweep_minutes: u64,
}

fn default_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig {
            kind: RuleKind::FailedTwoFactorBurst,
            severity: Severity::Warning,
            enabled: true,
            threshold: 3,
            window_minutes: 60,
            cooldown_minutes: 30,
        },
        RuleConfig {
            kind: RuleKind::PaymentVelocity,
            severity: Severity::Warning,
            enabled: true,
            threshold: 5,
            window_minutes: 15,
            cooldown_minutes: 60,
        },
        RuleConfig {
            kind: RuleKind::HighValueAuthorization,
            severity: Severity::Warning,
            enabled: true,
            threshold: 10_000,
            window_minutes: 0,
            cooldown_minutes: 0,
        },
        RuleConfig {
            kind: RuleKind::RepeatedPaymentFailures,
            severity: Severity::Warning,
            enabled: true,
            threshold: 3,
            window_minutes: 360,
            cooldown_minutes: 60,
        },
        RuleConfig {
            kind: RuleKind::RevocationSpike,
            severity: Severity::Warning,
            enabled: true,
            threshold: 10,
            window_minutes: 1440,
            cooldown_minutes: 120,
        },
        RuleConfig {
            kind: RuleKind::GeographicAnomaly,
            severity: Severity::Warning,
            enabled: true,
            threshold: 3,
            window_minutes: 60,
            cooldown_minutes: 30,
        },
        RuleConfig {
            kind: RuleKind::HighRiskScore,
            severity: Severity::Critical,
            enabled: true,
            threshold: 1,
            window_minutes: 5,
            cooldown_minutes: 15,
        },
    ]
}

fn default_expiry_warning_days() -> i64 {
    30
}

fn default_usage_alert_ratio() -> rust_decimal::Decimal {
    rust_decimal::Decimal::new(8, 1) // 0.8
}

fn default_rail_failure_threshold() -> u32 {
    3
}

fn default_alert_recipient() -> String {
    "security-ops".to_string()
}

fn default_expiry_sweep_hours() -> u64 {
    24
}

fn default_usage_sweep_hours() -> u64 {
    24 * 7
}

fn default_rail_sweep_minutes() -> u64 {
    60
}

fn default_rules_sweep_minutes() -> u64 {
    5
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            expiry_warning_days: default_expiry_warning_days(),
            usage_alert_ratio: default_usage_alert_ratio(),
            rail_failure_threshold: default_rail_failure_threshold(),
            alert_recipient: default_alert_recipient(),
            expiry_sweep_hours: default_expiry_sweep_hours(),
            usage_sweep_hours: default_usage_sweep_hours(),
            rail_sweep_minutes: default_rail_sweep_minutes(),
            rules_sweep_minutes: default_rules_sweep_minutes(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn rule(&self, kind: RuleKind) -> Option<&RuleConfig> {
        self.rules.iter().find(|r| r.kind == kind && r.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_rule_set() {
        let config = MonitorConfig::default();
        assert_eq!(config.rules.len(), 7);

        let velocity = config.rule(RuleKind::PaymentVelocity).unwrap();
        assert_eq!(velocity.threshold, 5);
        assert_eq!(velocity.window_minutes, 15);

        let high_risk = config.rule(RuleKind::HighRiskScore).unwrap();
        assert_eq!(high_risk.severity, Severity::Critical);

        let high_value = config.rule(RuleKind::HighValueAuthorization).unwrap();
        assert_eq!(high_value.threshold, 10_000);
        assert_eq!(high_value.cooldown_minutes, 0);
    }

    #[test]
    fn test_disabled_rule_not_returned() {
        let mut config = MonitorConfig::default();
        for rule in &mut config.rules {
            if rule.kind == RuleKind::RevocationSpike {
                rule.enabled = false;
            }
        }
        assert!(config.rule(RuleKind::RevocationSpike).is_none());
        assert!(config.rule(RuleKind::PaymentVelocity).is_some());
    }

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.expiry_warning_days, 30);
        assert_eq!(config.usage_alert_ratio, dec!(0.8));
        assert_eq!(config.rules_sweep_minutes, 5);
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{ "expiry_warning_days": 14 }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.expiry_warning_days, 14);
        assert_eq!(config.rules.len(), 7); // default rules
    }
}
