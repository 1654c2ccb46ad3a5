//! Integrity hashing for audit events

use crate::event::AuditEvent;
use sha2::{Digest, Sha256};

/// Calculate the SHA-256 integrity hash of an event (excluding the hash
/// field itself).
///
/// Covers the fields that make an event meaningful for compliance review:
/// user, type, action, timestamp, and the structured details payload.
pub fn compute_event_hash(event: &AuditEvent) -> String {
    let mut hasher = Sha256::new();

    hasher.update(event.user_id.as_bytes());
    hasher.update(event.event_type.as_ref().as_bytes());
    hasher.update(event.action.as_bytes());
    hasher.update(event.timestamp.to_rfc3339().as_bytes());
    hasher.update(event.details.to_string().as_bytes());

    hex::encode(hasher.finalize())
}

/// Recompute and compare an event's hash
pub fn verify_event_hash(event: &AuditEvent) -> bool {
    event.hash == compute_event_hash(event)
}
