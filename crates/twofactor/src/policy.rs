//! The 2FA decision policy
//!
//! Pure rule evaluation, first match wins:
//! 1. first payment -> required
//! 2. user preference always-2FA -> required
//! 3. amount above the user's threshold -> required
//! 4. unusual activity -> required
//! 5. trusted device -> bypass
//! 6. otherwise -> bypass
//!
//! The gate feeds in the device-trust lookups and activity snapshot; the
//! policy itself touches no storage.

use paygate_core::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{SecuritySettings, TwoFactorConfig};

/// Request-scoped context for one payment approval
#[derive(Debug, Clone, Default)]
pub struct PaymentContext {
    /// Client-presented device identifier, if any
    pub device_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Recent-activity summary for the paying client.
///
/// Produced from charge history by the caller; a failed lookup may fail
/// open with `ActivitySnapshot::default()` because the policy only uses
/// it to ESCALATE to verification, never to skip it.
#[derive(Debug, Clone, Default)]
pub struct ActivitySnapshot {
    /// Successful payments so far today
    pub payments_today: u32,
    /// Average successful payment over the recent window, if any history
    pub recent_average: Option<Amount>,
}

/// Which unusual-activity heuristic fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnusualActivity {
    HighDailyCount,
    AboveRecentAverage,
    NewDeviceOrLocation,
}

/// Why the gate decided the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    FirstPayment,
    UserPreference,
    AmountThreshold,
    UnusualActivity(UnusualActivity),
    TrustedDevice,
    BelowThreshold,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DecisionReason::FirstPayment => "first payment requires verification",
            DecisionReason::UserPreference => "user requires verification for every payment",
            DecisionReason::AmountThreshold => "amount above verification threshold",
            DecisionReason::UnusualActivity(UnusualActivity::HighDailyCount) => {
                "multiple payments today"
            }
            DecisionReason::UnusualActivity(UnusualActivity::AboveRecentAverage) => {
                "amount significantly above recent average"
            }
            DecisionReason::UnusualActivity(UnusualActivity::NewDeviceOrLocation) => {
                "payment from a new device or location"
            }
            DecisionReason::TrustedDevice => "trusted device",
            DecisionReason::BelowThreshold => "below verification threshold",
        };
        write!(f, "{}", text)
    }
}

/// The gate's verdict for one payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwoFactorDecision {
    pub required: bool,
    pub reason: DecisionReason,
}

impl TwoFactorDecision {
    fn required(reason: DecisionReason) -> Self {
        Self {
            required: true,
            reason,
        }
    }

    fn bypassed(reason: DecisionReason) -> Self {
        Self {
            required: false,
            reason,
        }
    }
}

/// Evaluate the decision rules in order.
///
/// `is_first_payment` comes from charge history; `fingerprint_known` is
/// whether the computed device/location fingerprint has been seen before;
/// `device_trusted` is whether the presented device id holds an unexpired
/// trust grant.
#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    config: &TwoFactorConfig,
    settings: &SecuritySettings,
    amount: Amount,
    ctx: &PaymentContext,
    activity: &ActivitySnapshot,
    is_first_payment: bool,
    fingerprint_known: bool,
    device_trusted: bool,
) -> TwoFactorDecision {
    if is_first_payment {
        return TwoFactorDecision::required(DecisionReason::FirstPayment);
    }

    if settings.always_2fa {
        return TwoFactorDecision::required(DecisionReason::UserPreference);
    }

    if amount.value() > settings.threshold(config) {
        return TwoFactorDecision::required(DecisionReason::AmountThreshold);
    }

    if let Some(unusual) = detect_unusual_activity(config, amount, ctx, activity, fingerprint_known)
    {
        return TwoFactorDecision::required(DecisionReason::UnusualActivity(unusual));
    }

    if ctx.device_id.is_some() && device_trusted {
        return TwoFactorDecision::bypassed(DecisionReason::TrustedDevice);
    }

    TwoFactorDecision::bypassed(DecisionReason::BelowThreshold)
}

fn detect_unusual_activity(
    config: &TwoFactorConfig,
    amount: Amount,
    ctx: &PaymentContext,
    activity: &ActivitySnapshot,
    fingerprint_known: bool,
) -> Option<UnusualActivity> {
    if activity.payments_today >= config.daily_payment_threshold {
        return Some(UnusualActivity::HighDailyCount);
    }

    if let Some(average) = activity.recent_average {
        if !average.is_zero() {
            let multiple = amount.value() / average.value();
            if multiple > config.average_multiplier {
                return Some(UnusualActivity::AboveRecentAverage);
            }
        }
    }

    // A fingerprint can only be computed when the request carries an
    // address; an unseen one reads as a new device or location.
    if ctx.ip_address.is_some() && !fingerprint_known {
        return Some(UnusualActivity::NewDeviceOrLocation);
    }

    None
}
