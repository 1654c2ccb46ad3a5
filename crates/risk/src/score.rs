//! Additive risk scoring
//!
//! Each trigger contributes a fixed number of points; the total is
//! clamped to [0, 10]. Adding a trigger can never lower the score.

use paygate_core::Amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// Score at or above which a transaction is considered high risk
pub const HIGH_RISK_SCORE: u8 = 8;

/// Maximum possible score
const MAX_SCORE: u8 = 10;

/// Amount above which the high-amount trigger fires
const HIGH_AMOUNT: Decimal = Decimal::from_parts(500, 0, 0, false, 0);

/// Amount above which the elevated-amount trigger fires
const ELEVATED_AMOUNT: Decimal = Decimal::from_parts(200, 0, 0, false, 0);

/// Everything the scorer knows about one payment attempt.
///
/// Missing knowledge (no fingerprint, no location) scores AGAINST the
/// transaction; lookups that feed this struct may fail open because an
/// absent value only raises the score.
#[derive(Debug, Clone, Default)]
pub struct RiskContext {
    /// Payment amount
    pub amount: Amount,
    /// No prior successful charge for this client
    pub is_first_payment: bool,
    /// Device fingerprint, if the client presented one
    pub device_fingerprint: Option<String>,
    /// Failed payment attempts in the recent window
    pub recent_failure_count: u32,
    /// Whether the originating location has been seen before
    pub known_location: bool,
    /// Raw user agent, if any
    pub user_agent: Option<String>,
}

/// A trigger that contributed points to the score
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskTrigger {
    FirstPayment,
    HighAmount,
    ElevatedAmount,
    UnknownDevice,
    RecentFailures,
    UnknownLocation,
    SuspiciousUserAgent,
}

/// The scorer's verdict for one transaction context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Total score, clamped to [0, 10]
    pub score: u8,
    /// Triggers that fired, in evaluation order
    pub triggers: Vec<RiskTrigger>,
}

impl RiskAssessment {
    /// Whether this assessment crosses the critical-alert threshold
    pub fn is_high_risk(&self) -> bool {
        self.score >= HIGH_RISK_SCORE
    }
}

/// Score a transaction context.
///
/// Point table:
/// - first payment: +2
/// - amount > $500: +3, else amount > $200: +1
/// - no device fingerprint: +2
/// - N recent failures: +N
/// - unknown location: +1
/// - missing or bot-like user agent: +2
pub fn score_transaction(ctx: &RiskContext) -> RiskAssessment {
    let mut score: u32 = 0;
    let mut triggers = Vec::new();

    if ctx.is_first_payment {
        score += 2;
        triggers.push(RiskTrigger::FirstPayment);
    }

    if ctx.amount.value() > HIGH_AMOUNT {
        score += 3;
        triggers.push(RiskTrigger::HighAmount);
    } else if ctx.amount.value() > ELEVATED_AMOUNT {
        score += 1;
        triggers.push(RiskTrigger::ElevatedAmount);
    }

    if ctx.device_fingerprint.is_none() {
        score += 2;
        triggers.push(RiskTrigger::UnknownDevice);
    }

    if ctx.recent_failure_count > 0 {
        score += ctx.recent_failure_count;
        triggers.push(RiskTrigger::RecentFailures);
    }

    if !ctx.known_location {
        score += 1;
        triggers.push(RiskTrigger::UnknownLocation);
    }

    let suspicious_agent = match &ctx.user_agent {
        None => true,
        Some(ua) => ua.is_empty() || ua.to_ascii_lowercase().contains("bot"),
    };
    if suspicious_agent {
        score += 2;
        triggers.push(RiskTrigger::SuspiciousUserAgent);
    }

    RiskAssessment {
        score: score.min(MAX_SCORE as u32) as u8,
        triggers,
    }
}
