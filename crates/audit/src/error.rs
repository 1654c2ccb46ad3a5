//! Audit log errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit entry not found: {0}")]
    NotFound(String),

    #[error("Integrity hash mismatch for audit entry {0}")]
    Integrity(String),
}
