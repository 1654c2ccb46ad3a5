//! Two-factor gate errors

use paygate_audit::AuditError;
use paygate_rail::NotifyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TwoFactorError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Code delivery failed: {0}")]
    Delivery(#[from] NotifyError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}
