//! PayGate Audit Log
//!
//! Append-only, tamper-evident record of every security-relevant event on
//! the platform. Each event carries a SHA-256 integrity hash over its
//! payload; the log is JSONL on disk and is never mutated, only appended.
//!
//! Compliance-relevant events are retained for seven years by default;
//! non-compliance events for two. Cleanup only identifies entries past
//! their retention window - deletion is an operator action.

pub mod error;
pub mod event;
pub mod hash;
pub mod log;

pub use error::AuditError;
pub use event::{AuditEvent, EventDraft, EventType, Severity};
pub use hash::compute_event_hash;
pub use log::{AuditLog, ComplianceMetrics, TrailFilter};
