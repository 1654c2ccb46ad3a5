//! Dispute records

use chrono::{DateTime, Utc};
use paygate_core::Amount;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    Investigating,
    Resolved,
    Closed,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "open",
            DisputeStatus::Investigating => "investigating",
            DisputeStatus::Resolved => "resolved",
            DisputeStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(DisputeStatus::Open),
            "investigating" => Some(DisputeStatus::Investigating),
            "resolved" => Some(DisputeStatus::Resolved),
            "closed" => Some(DisputeStatus::Closed),
            _ => None,
        }
    }

    /// Whether an admin can still act on the dispute
    pub fn is_actionable(&self) -> bool {
        matches!(self, DisputeStatus::Open | DisputeStatus::Investigating)
    }
}

/// A contested charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    /// Unique id (DSP-XXXXXXXX)
    pub id: String,
    pub payment_id: String,
    pub contract_id: String,
    pub client_id: String,
    pub freelancer_id: String,
    pub amount: Amount,
    pub reason: String,
    pub status: DisputeStatus,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub refund_amount: Option<Amount>,
}

impl Dispute {
    pub(crate) fn open(
        payment_id: impl Into<String>,
        contract_id: impl Into<String>,
        client_id: impl Into<String>,
        freelancer_id: impl Into<String>,
        amount: Amount,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("DSP-{}", &uuid::Uuid::new_v4().to_string()[..8].to_uppercase()),
            payment_id: payment_id.into(),
            contract_id: contract_id.into(),
            client_id: client_id.into(),
            freelancer_id: freelancer_id.into(),
            amount,
            reason: reason.into(),
            status: DisputeStatus::Open,
            opened_at: now,
            resolved_at: None,
            resolution: None,
            refund_amount: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_open_defaults() {
        let dispute = Dispute::open(
            "CHG-1",
            "contract-1",
            "client-1",
            "freelancer-1",
            Amount::new(dec!(1500)).unwrap(),
            "incomplete work",
            Utc::now(),
        );
        assert!(dispute.id.starts_with("DSP-"));
        assert_eq!(dispute.status, DisputeStatus::Open);
        assert!(dispute.resolved_at.is_none());
        assert!(dispute.refund_amount.is_none());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            DisputeStatus::Open,
            DisputeStatus::Investigating,
            DisputeStatus::Resolved,
            DisputeStatus::Closed,
        ] {
            assert_eq!(DisputeStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_actionable() {
        assert!(DisputeStatus::Open.is_actionable());
        assert!(DisputeStatus::Investigating.is_actionable());
        assert!(!DisputeStatus::Resolved.is_actionable());
        assert!(!DisputeStatus::Closed.is_actionable());
    }
}
