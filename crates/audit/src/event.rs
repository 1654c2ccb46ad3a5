//! Audit event types
//!
//! Events are append-only and immutable once written. The `hash` field is
//! filled in by the log at append time; everything else is supplied by the
//! component that observed the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use strum_macros::{AsRefStr, Display};

/// Retention for compliance-relevant events (financial records)
pub const RETENTION_COMPLIANCE_YEARS: u8 = 7;

/// Retention for everything else
pub const RETENTION_DEFAULT_YEARS: u8 = 2;

/// What happened
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    AuthorizationCreated,
    AuthorizationRevoked,
    AuthorizationExpired,
    AuthorizationSuspended,
    PaymentAttempt,
    PaymentSuccess,
    PaymentFailed,
    PaymentRefunded,
    TwoFactorSent,
    TwoFactorBypassed,
    TwoFactorSuccess,
    TwoFactorFailed,
    DeviceTrusted,
    DisputeOpened,
    DisputeResolved,
    RiskFlagged,
    AlertFired,
    AdminAction,
}

impl EventType {
    /// Whether events of this type default to the long compliance retention
    pub fn is_compliance_relevant(&self) -> bool {
        !matches!(
            self,
            EventType::TwoFactorSent | EventType::TwoFactorBypassed | EventType::DeviceTrusted
        )
    }
}

/// Severity levels - ordered from lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Info = 0,
    Warning = 1,
    Error = 2,
    Critical = 3,
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

/// A fully materialized audit event as stored in the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique audit id (AUD-XXXXXXXX)
    pub id: String,
    /// User the event concerns
    pub user_id: String,
    /// Contract, if the event is scoped to one
    pub contract_id: Option<String>,
    /// Affected entity (authorization, charge, dispute, code, ...)
    pub entity_id: Option<String>,
    pub event_type: EventType,
    /// Human-readable description of the action
    pub action: String,
    /// Structured event payload
    pub details: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub severity: Severity,
    pub compliance_relevant: bool,
    pub retention_years: u8,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 integrity hash, assigned at append time
    pub hash: String,
}

impl AuditEvent {
    /// Timestamp after which this entry is past retention
    pub fn retention_deadline(&self) -> DateTime<Utc> {
        self.timestamp + chrono::Duration::days(365 * self.retention_years as i64)
    }
}

/// An event as handed to the log, before id/timestamp/hash assignment
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub user_id: String,
    pub contract_id: Option<String>,
    pub entity_id: Option<String>,
    pub event_type: EventType,
    pub action: String,
    pub details: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub severity: Severity,
    pub compliance_relevant: bool,
    pub retention_years: u8,
}

impl EventDraft {
    /// Start a draft with type-derived retention defaults
    pub fn new(event_type: EventType, user_id: impl Into<String>, action: impl Into<String>) -> Self {
        let compliance_relevant = event_type.is_compliance_relevant();
        Self {
            user_id: user_id.into(),
            contract_id: None,
            entity_id: None,
            event_type,
            action: action.into(),
            details: Value::Null,
            ip_address: None,
            user_agent: None,
            severity: Severity::Info,
            compliance_relevant,
            retention_years: if compliance_relevant {
                RETENTION_COMPLIANCE_YEARS
            } else {
                RETENTION_DEFAULT_YEARS
            },
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn contract(mut self, contract_id: impl Into<String>) -> Self {
        self.contract_id = Some(contract_id.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn source(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&EventType::PaymentFailed).unwrap();
        assert_eq!(json, "\"payment_failed\"");
        assert_eq!(EventType::DisputeOpened.as_ref(), "dispute_opened");
    }

    #[test]
    fn test_draft_defaults() {
        let draft = EventDraft::new(EventType::PaymentSuccess, "client-1", "charge settled");
        assert!(draft.compliance_relevant);
        assert_eq!(draft.retention_years, RETENTION_COMPLIANCE_YEARS);
        assert_eq!(draft.severity, Severity::Info);

        let draft = EventDraft::new(EventType::TwoFactorBypassed, "client-1", "trusted device");
        assert!(!draft.compliance_relevant);
        assert_eq!(draft.retention_years, RETENTION_DEFAULT_YEARS);
    }

    #[test]
    fn test_draft_builder() {
        let draft = EventDraft::new(EventType::DisputeOpened, "client-1", "dispute opened")
            .severity(Severity::Warning)
            .entity("DSP-123")
            .contract("contract-9")
            .details(json!({ "reason": "incomplete work" }))
            .source(Some("10.0.0.1".to_string()), None);

        assert_eq!(draft.severity, Severity::Warning);
        assert_eq!(draft.entity_id.as_deref(), Some("DSP-123"));
        assert_eq!(draft.contract_id.as_deref(), Some("contract-9"));
        assert_eq!(draft.details["reason"], "incomplete work");
        assert_eq!(draft.ip_address.as_deref(), Some("10.0.0.1"));
    }
}
