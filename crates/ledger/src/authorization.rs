//! Authorization records

use chrono::{DateTime, Utc};
use paygate_core::{Amount, PaymentMethod};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Status of a standing authorization
///
/// `Revoked` and `Expired` are terminal; `Suspended` blocks charges but
/// can be lifted by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Active,
    Revoked,
    Expired,
    Suspended,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::Active => "active",
            AuthorizationStatus::Revoked => "revoked",
            AuthorizationStatus::Expired => "expired",
            AuthorizationStatus::Suspended => "suspended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AuthorizationStatus::Active),
            "revoked" => Some(AuthorizationStatus::Revoked),
            "expired" => Some(AuthorizationStatus::Expired),
            "suspended" => Some(AuthorizationStatus::Suspended),
            _ => None,
        }
    }

    /// Terminal statuses admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthorizationStatus::Revoked | AuthorizationStatus::Expired)
    }
}

/// Consent context captured when the client authorized
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsentMetadata {
    pub terms_version: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Parameters for creating an authorization
#[derive(Debug, Clone)]
pub struct NewAuthorization {
    pub contract_id: String,
    pub client_id: String,
    /// Processor-side reference for the consented payment method
    pub payment_method_ref: String,
    pub method: PaymentMethod,
    pub max_per_milestone: Amount,
    pub total_authorized: Amount,
    pub consent: ConsentMetadata,
    /// Payment-method expiry, if the method carries one (card expiry date)
    pub expires_at: Option<DateTime<Utc>>,
}

/// A client's standing consent to be charged for one contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    /// Unique id (AUTH-XXXXXXXX)
    pub id: String,
    pub contract_id: String,
    pub client_id: String,
    pub payment_method_ref: String,
    pub method: PaymentMethod,
    pub max_per_milestone: Amount,
    pub total_authorized: Amount,
    /// Accumulated successful charges; maintained only by the ledger
    pub total_charged: Amount,
    pub terms_version: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub status: AuthorizationStatus,
    pub authorized_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Authorization {
    pub(crate) fn create(params: NewAuthorization, now: DateTime<Utc>) -> Self {
        let id = format!("AUTH-{}", &uuid::Uuid::new_v4().to_string()[..8].to_uppercase());
        Self {
            id,
            contract_id: params.contract_id,
            client_id: params.client_id,
            payment_method_ref: params.payment_method_ref,
            method: params.method,
            max_per_milestone: params.max_per_milestone,
            total_authorized: params.total_authorized,
            total_charged: Amount::ZERO,
            terms_version: params.consent.terms_version,
            ip_address: params.consent.ip_address,
            user_agent: params.consent.user_agent,
            status: AuthorizationStatus::Active,
            authorized_at: now,
            revoked_at: None,
            expires_at: params.expires_at,
            last_used_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AuthorizationStatus::Active
    }

    /// Uncharged balance remaining under the total cap
    pub fn remaining(&self) -> Amount {
        self.total_authorized.saturating_sub(&self.total_charged)
    }

    /// Fraction of the total cap consumed, in [0, 1]
    pub fn usage_ratio(&self) -> Decimal {
        self.total_charged.ratio_of(&self.total_authorized)
    }

    /// Whether the payment method expiry has passed
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at < now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> NewAuthorization {
        NewAuthorization {
            contract_id: "contract-1".to_string(),
            client_id: "client-1".to_string(),
            payment_method_ref: "pm_123".to_string(),
            method: PaymentMethod::Card,
            max_per_milestone: Amount::new(dec!(2000)).unwrap(),
            total_authorized: Amount::new(dec!(5000)).unwrap(),
            consent: ConsentMetadata {
                terms_version: "2025-06".to_string(),
                ip_address: Some("10.0.0.1".to_string()),
                user_agent: Some("Mozilla/5.0".to_string()),
            },
            expires_at: None,
        }
    }

    #[test]
    fn test_create_defaults() {
        let auth = Authorization::create(params(), Utc::now());
        assert!(auth.id.starts_with("AUTH-"));
        assert_eq!(auth.status, AuthorizationStatus::Active);
        assert_eq!(auth.total_charged, Amount::ZERO);
        assert_eq!(auth.remaining().value(), dec!(5000));
        assert!(auth.revoked_at.is_none());
    }

    #[test]
    fn test_usage_ratio() {
        let mut auth = Authorization::create(params(), Utc::now());
        auth.total_charged = Amount::new(dec!(4000)).unwrap();
        assert_eq!(auth.usage_ratio(), dec!(0.8));
        assert_eq!(auth.remaining().value(), dec!(1000));
    }

    #[test]
    fn test_expiry_check() {
        let now = Utc::now();
        let mut auth = Authorization::create(params(), now);
        assert!(!auth.is_past_expiry(now));

        auth.expires_at = Some(now - chrono::Duration::days(1));
        assert!(auth.is_past_expiry(now));

        auth.expires_at = Some(now + chrono::Duration::days(30));
        assert!(!auth.is_past_expiry(now));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            AuthorizationStatus::Active,
            AuthorizationStatus::Revoked,
            AuthorizationStatus::Expired,
            AuthorizationStatus::Suspended,
        ] {
            assert_eq!(AuthorizationStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(AuthorizationStatus::from_str("frozen"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(AuthorizationStatus::Revoked.is_terminal());
        assert!(AuthorizationStatus::Expired.is_terminal());
        assert!(!AuthorizationStatus::Active.is_terminal());
        assert!(!AuthorizationStatus::Suspended.is_terminal());
    }
}
