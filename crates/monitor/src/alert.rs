//! Alert records

use chrono::{DateTime, Utc};
use paygate_audit::Severity;
use serde::{Deserialize, Serialize};

use crate::config::RuleKind;

/// A fired alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique id (ALR-XXXXXXXX)
    pub id: String,
    pub rule: RuleKind,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    /// User the alert concerns, if user-scoped
    pub user_id: Option<String>,
    /// Contract the alert concerns, if contract-scoped
    pub contract_id: Option<String>,
    pub fired_at: DateTime<Utc>,
}

impl Alert {
    pub(crate) fn fire(
        rule: RuleKind,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("ALR-{}", &uuid::Uuid::new_v4().to_string()[..8].to_uppercase()),
            rule,
            severity,
            title: title.into(),
            description: description.into(),
            user_id: None,
            contract_id: None,
            fired_at: now,
        }
    }

    pub(crate) fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub(crate) fn for_contract(mut self, contract_id: impl Into<String>) -> Self {
        self.contract_id = Some(contract_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire() {
        let alert = Alert::fire(
            RuleKind::PaymentVelocity,
            Severity::Warning,
            "Payment velocity abuse",
            "6 attempts in 15 minutes",
            Utc::now(),
        )
        .for_user("client-1");

        assert!(alert.id.starts_with("ALR-"));
        assert_eq!(alert.rule, RuleKind::PaymentVelocity);
        assert_eq!(alert.user_id.as_deref(), Some("client-1"));
        assert!(alert.contract_id.is_none());
    }
}
