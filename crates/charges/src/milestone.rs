//! Milestone records
//!
//! Milestones are owned by external contract CRUD; the core only
//! observes their status machine and holds the fields it needs:
//! pending -> in_progress -> submitted -> approved -> paid, with a
//! `payment_released` gate set by the executor on success.

use chrono::{DateTime, Utc};
use paygate_core::Amount;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Submitted,
    Approved,
    Paid,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneStatus::Pending => "pending",
            MilestoneStatus::InProgress => "in_progress",
            MilestoneStatus::Submitted => "submitted",
            MilestoneStatus::Approved => "approved",
            MilestoneStatus::Paid => "paid",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MilestoneStatus::Pending),
            "in_progress" => Some(MilestoneStatus::InProgress),
            "submitted" => Some(MilestoneStatus::Submitted),
            "approved" => Some(MilestoneStatus::Approved),
            "paid" => Some(MilestoneStatus::Paid),
            _ => None,
        }
    }

    /// Legal forward transitions in the status machine
    pub fn can_transition_to(&self, next: MilestoneStatus) -> bool {
        matches!(
            (self, next),
            (MilestoneStatus::Pending, MilestoneStatus::InProgress)
                | (MilestoneStatus::InProgress, MilestoneStatus::Submitted)
                | (MilestoneStatus::Submitted, MilestoneStatus::Approved)
                | (MilestoneStatus::Approved, MilestoneStatus::Paid)
        )
    }
}

/// The core-observed slice of a milestone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub contract_id: String,
    pub title: String,
    pub amount: Amount,
    pub status: MilestoneStatus,
    pub payment_released: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Milestone {
    pub fn new(
        id: impl Into<String>,
        contract_id: impl Into<String>,
        title: impl Into<String>,
        amount: Amount,
    ) -> Self {
        Self {
            id: id.into(),
            contract_id: contract_id.into(),
            title: title.into(),
            amount,
            status: MilestoneStatus::Pending,
            payment_released: false,
            approved_at: None,
            paid_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            MilestoneStatus::Pending,
            MilestoneStatus::InProgress,
            MilestoneStatus::Submitted,
            MilestoneStatus::Approved,
            MilestoneStatus::Paid,
        ] {
            assert_eq!(MilestoneStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(MilestoneStatus::from_str("done"), None);
    }

    #[test]
    fn test_transitions() {
        assert!(MilestoneStatus::Submitted.can_transition_to(MilestoneStatus::Approved));
        assert!(MilestoneStatus::Approved.can_transition_to(MilestoneStatus::Paid));
        // No skipping and no going back
        assert!(!MilestoneStatus::Pending.can_transition_to(MilestoneStatus::Approved));
        assert!(!MilestoneStatus::Paid.can_transition_to(MilestoneStatus::Approved));
        assert!(!MilestoneStatus::Approved.can_transition_to(MilestoneStatus::Submitted));
    }

    #[test]
    fn test_new_milestone_defaults() {
        let milestone = Milestone::new("ms-1", "contract-1", "Design", Amount::new(dec!(1500)).unwrap());
        assert_eq!(milestone.status, MilestoneStatus::Pending);
        assert!(!milestone.payment_released);
        assert!(milestone.approved_at.is_none());
    }
}
