//! Dispute manager errors

use chrono::{DateTime, Utc};
use paygate_audit::AuditError;
use paygate_charges::ChargeStoreError;
use paygate_rail::RailError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DisputeError {
    #[error("Charge not found: {0}")]
    ChargeNotFound(String),

    /// The charge is not in a disputable state (never settled, already
    /// refunded, or already under dispute)
    #[error("Invalid dispute state: {0}")]
    InvalidState(String),

    /// The post-charge dispute window has closed
    #[error("Dispute window closed at {deadline}")]
    WindowClosed { deadline: DateTime<Utc> },

    /// Resolving an already-resolved dispute; guards double refunds
    #[error("Dispute already resolved: {0}")]
    AlreadyResolved(String),

    #[error("Invalid resolution request: {0}")]
    Validation(String),

    /// Refund failure at the processor; surfaced generically to users
    #[error("Refund processing failed")]
    Rail(#[source] RailError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Charge store error: {0}")]
    ChargeStore(#[from] ChargeStoreError),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}
