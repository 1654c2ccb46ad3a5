//! Authorization ledger errors

use crate::store::StoreError;
use paygate_core::Amount;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Bad input - the caller can correct and retry
    #[error("Invalid authorization request: {0}")]
    Validation(String),

    /// No active authorization covers the requested charge
    #[error("No active authorization: {0}")]
    NoAuthorization(String),

    /// A single charge above the per-milestone cap
    #[error("Charge of {requested} exceeds per-milestone cap of {cap}")]
    PerMilestoneCapExceeded { requested: Amount, cap: Amount },

    /// The increment would push total_charged past total_authorized
    #[error("Charge of {requested} would exceed remaining authorization ({charged} of {authorized} used)")]
    TotalCapExceeded {
        requested: Amount,
        charged: Amount,
        authorized: Amount,
    },

    #[error("Authorization not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Whether this is one of the two cap violations
    pub fn is_cap_exceeded(&self) -> bool {
        matches!(
            self,
            LedgerError::PerMilestoneCapExceeded { .. } | LedgerError::TotalCapExceeded { .. }
        )
    }
}
