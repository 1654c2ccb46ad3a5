//! Charge records

use chrono::{DateTime, Utc};
use paygate_core::{Amount, PaymentMethod};
use serde::{Deserialize, Serialize};

use crate::fees::FeeBreakdown;

/// Hours after settlement during which a charge can be disputed
pub const DISPUTE_WINDOW_HOURS: i64 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Refunded,
}

impl ChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Pending => "pending",
            ChargeStatus::Processing => "processing",
            ChargeStatus::Succeeded => "succeeded",
            ChargeStatus::Failed => "failed",
            ChargeStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ChargeStatus::Pending),
            "processing" => Some(ChargeStatus::Processing),
            "succeeded" => Some(ChargeStatus::Succeeded),
            "failed" => Some(ChargeStatus::Failed),
            "refunded" => Some(ChargeStatus::Refunded),
            _ => None,
        }
    }
}

/// One attempted or completed transfer against an authorization for one
/// milestone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charge {
    /// Unique id (CHG-XXXXXXXX)
    pub id: String,
    pub contract_id: String,
    pub milestone_id: String,
    pub authorization_id: String,
    pub client_id: String,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub status: ChargeStatus,
    /// Processor-assigned id, present once the rail replied
    pub external_charge_id: Option<String>,
    /// Rail failure detail; audit-facing, not client-facing
    pub failure_reason: Option<String>,
    pub fees: FeeBreakdown,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Charge {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        contract_id: impl Into<String>,
        milestone_id: impl Into<String>,
        authorization_id: impl Into<String>,
        client_id: impl Into<String>,
        amount: Amount,
        method: PaymentMethod,
        fees: FeeBreakdown,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("CHG-{}", &uuid::Uuid::new_v4().to_string()[..8].to_uppercase()),
            contract_id: contract_id.into(),
            milestone_id: milestone_id.into(),
            authorization_id: authorization_id.into(),
            client_id: client_id.into(),
            amount,
            method,
            status: ChargeStatus::Processing,
            external_charge_id: None,
            failure_reason: None,
            fees,
            created_at: now,
            settled_at: None,
        }
    }

    /// Deadline for opening a dispute: settlement + 48h. None until the
    /// charge settles. Independent of notification delivery.
    pub fn dispute_deadline(&self) -> Option<DateTime<Utc>> {
        self.settled_at
            .map(|at| at + chrono::Duration::hours(DISPUTE_WINDOW_HOURS))
    }

    /// A non-failed charge occupies its milestone's single charge slot
    pub fn is_non_failed(&self) -> bool {
        self.status != ChargeStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::FeeSchedule;
    use rust_decimal_macros::dec;

    fn charge() -> Charge {
        let amount = Amount::new(dec!(1500)).unwrap();
        Charge::create(
            "contract-1",
            "ms-1",
            "AUTH-1",
            "client-1",
            amount,
            PaymentMethod::Card,
            FeeSchedule::default().breakdown(amount),
            Utc::now(),
        )
    }

    #[test]
    fn test_create_defaults() {
        let charge = charge();
        assert!(charge.id.starts_with("CHG-"));
        assert_eq!(charge.status, ChargeStatus::Processing);
        assert!(charge.external_charge_id.is_none());
        assert!(charge.dispute_deadline().is_none());
    }

    #[test]
    fn test_dispute_deadline() {
        let mut charge = charge();
        let settled = Utc::now();
        charge.settled_at = Some(settled);
        assert_eq!(
            charge.dispute_deadline(),
            Some(settled + chrono::Duration::hours(48))
        );
    }

    #[test]
    fn test_non_failed() {
        let mut charge = charge();
        assert!(charge.is_non_failed());
        charge.status = ChargeStatus::Failed;
        assert!(!charge.is_non_failed());
        charge.status = ChargeStatus::Refunded;
        assert!(charge.is_non_failed());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ChargeStatus::Pending,
            ChargeStatus::Processing,
            ChargeStatus::Succeeded,
            ChargeStatus::Failed,
            ChargeStatus::Refunded,
        ] {
            assert_eq!(ChargeStatus::from_str(status.as_str()), Some(status));
        }
    }
}
