//! Charge executor errors

use paygate_audit::AuditError;
use paygate_ledger::LedgerError;
use paygate_rail::RailError;
use paygate_twofactor::TwoFactorError;
use thiserror::Error;

use crate::store::ChargeStoreError;

#[derive(Debug, Error)]
pub enum ChargeError {
    #[error("Milestone not found: {0}")]
    MilestoneNotFound(String),

    /// Wrong milestone status for the requested transition
    #[error("Invalid milestone state: {0}")]
    InvalidState(String),

    /// The gate requires a verification code that was not supplied
    #[error("Verification required: {0}")]
    VerificationRequired(String),

    /// A code was supplied but did not verify
    #[error("Verification failed")]
    VerificationFailed,

    /// NoAuthorization and cap violations propagate from the ledger
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Processor failure. Displayed generically; the specific reason is
    /// preserved in the audit log.
    #[error("Payment processing failed")]
    Rail(#[source] RailError),

    #[error("Store error: {0}")]
    Store(#[from] ChargeStoreError),

    #[error("Two-factor error: {0}")]
    TwoFactor(#[from] TwoFactorError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}
