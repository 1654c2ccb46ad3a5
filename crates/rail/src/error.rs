//! External-collaborator errors

use thiserror::Error;

/// Payment processor failures.
///
/// The executor surfaces these to end users as a generic "payment
/// processing failed" while the specific variant is preserved in the
/// audit log for support and admin use.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RailError {
    #[error("charge declined: {0}")]
    Declined(String),

    #[error("payment method expired")]
    MethodExpired,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("processor timed out")]
    Timeout,

    #[error("processor unavailable: {0}")]
    Unavailable(String),

    #[error("unknown charge: {0}")]
    UnknownCharge(String),
}

impl RailError {
    /// Whether a retry may succeed without operator intervention
    pub fn is_transient(&self) -> bool {
        matches!(self, RailError::Timeout | RailError::Unavailable(_))
    }

    /// Coarse category for client-facing failure notifications
    pub fn category(&self) -> &'static str {
        match self {
            RailError::Declined(_) => "declined",
            RailError::MethodExpired => "expired_method",
            RailError::InsufficientFunds => "insufficient_funds",
            RailError::Timeout | RailError::Unavailable(_) => "processor_unavailable",
            RailError::UnknownCharge(_) => "unknown_charge",
        }
    }
}

/// Notification delivery failures. Always best-effort: these are logged
/// and never block the core state machine.
#[derive(Debug, Error, Clone)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}
