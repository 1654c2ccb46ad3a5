//! Authorization ledger - business rules over the store
//!
//! Enforces single-active-per-contract, cap validation at creation, the
//! atomic charge accounting, and idempotent revocation. Writes an audit
//! event for every state change.

use chrono::{DateTime, Utc};
use paygate_core::Amount;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use paygate_audit::{AuditLog, EventDraft, EventType, Severity};

use crate::authorization::{Authorization, AuthorizationStatus, NewAuthorization};
use crate::error::LedgerError;
use crate::store::{AuthorizationStore, ChargeAttempt};

/// Result of a revocation request
#[derive(Debug, Clone)]
pub enum RevokeOutcome {
    /// Authorization transitioned to revoked; carries the final record
    /// (including the remaining uncharged balance for the client notice)
    Revoked(Authorization),
    /// Authorization was already revoked or expired - a no-op, not an error
    AlreadyTerminal(AuthorizationStatus),
}

/// The authorization ledger
pub struct AuthorizationLedger {
    store: AuthorizationStore,
    audit: Arc<AuditLog>,
}

impl AuthorizationLedger {
    pub fn new(store: AuthorizationStore, audit: Arc<AuditLog>) -> Self {
        Self { store, audit }
    }

    /// Create a standing authorization for a contract.
    ///
    /// Fails if either cap is non-positive, the per-milestone cap exceeds
    /// the total, or the contract already has an active authorization.
    pub fn create_authorization(
        &self,
        params: NewAuthorization,
    ) -> Result<Authorization, LedgerError> {
        self.create_authorization_at(params, Utc::now())
    }

    pub fn create_authorization_at(
        &self,
        params: NewAuthorization,
        now: DateTime<Utc>,
    ) -> Result<Authorization, LedgerError> {
        if params.max_per_milestone.is_zero() {
            return Err(LedgerError::Validation(
                "per-milestone cap must be positive".to_string(),
            ));
        }
        if params.total_authorized.is_zero() {
            return Err(LedgerError::Validation(
                "total authorized amount must be positive".to_string(),
            ));
        }
        if params.max_per_milestone > params.total_authorized {
            return Err(LedgerError::Validation(
                "per-milestone cap cannot exceed total authorized amount".to_string(),
            ));
        }
        if self
            .store
            .get_active_for_contract(&params.contract_id)?
            .is_some()
        {
            return Err(LedgerError::Validation(format!(
                "contract {} already has an active authorization",
                params.contract_id
            )));
        }

        let auth = Authorization::create(params, now);
        self.store.insert(&auth)?;

        self.append_audit(
            EventDraft::new(
                EventType::AuthorizationCreated,
                &auth.client_id,
                "payment authorization created",
            )
            .entity(&auth.id)
            .contract(&auth.contract_id)
            .source(auth.ip_address.clone(), auth.user_agent.clone())
            .details(json!({
                "method": auth.method,
                "max_per_milestone": auth.max_per_milestone,
                "total_authorized": auth.total_authorized,
                "terms_version": auth.terms_version,
            })),
        );

        info!(authorization = %auth.id, contract = %auth.contract_id, "authorization created");
        Ok(auth)
    }

    /// Fetch an authorization by id
    pub fn get(&self, id: &str) -> Result<Authorization, LedgerError> {
        self.store.get(id).map_err(Into::into)
    }

    /// The single active authorization for a contract, if any
    pub fn get_active(&self, contract_id: &str) -> Result<Option<Authorization>, LedgerError> {
        self.store
            .get_active_for_contract(contract_id)
            .map_err(Into::into)
    }

    /// Atomically record a successful-charge increment against the caps.
    ///
    /// Returns the new running total. Must be called before the rail is
    /// invoked; pair with [`release_charge`](Self::release_charge) if the
    /// rail then fails.
    pub fn record_charge(&self, id: &str, amount: Amount) -> Result<Amount, LedgerError> {
        self.record_charge_at(id, amount, Utc::now())
    }

    pub fn record_charge_at(
        &self,
        id: &str,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Amount, LedgerError> {
        match self.store.try_record_charge(id, amount, now)? {
            ChargeAttempt::Recorded { new_total } => {
                info!(authorization = %id, %amount, %new_total, "charge recorded");
                Ok(new_total)
            }
            ChargeAttempt::NotActive(status) => Err(LedgerError::NoAuthorization(format!(
                "authorization {} is {}",
                id,
                status.as_str()
            ))),
            ChargeAttempt::OverPerMilestone { cap } => {
                Err(LedgerError::PerMilestoneCapExceeded {
                    requested: amount,
                    cap,
                })
            }
            ChargeAttempt::OverTotal {
                total_charged,
                total_authorized,
            } => Err(LedgerError::TotalCapExceeded {
                requested: amount,
                charged: total_charged,
                authorized: total_authorized,
            }),
        }
    }

    /// Compensating decrement after a rail failure
    pub fn release_charge(&self, id: &str, amount: Amount) -> Result<(), LedgerError> {
        let new_total = self.store.release_charge(id, amount)?;
        warn!(authorization = %id, %amount, %new_total, "charge released after rail failure");
        Ok(())
    }

    /// Revoke an authorization. Idempotent: revoking an already-terminal
    /// authorization is a no-op.
    pub fn revoke(&self, id: &str, reason: &str) -> Result<RevokeOutcome, LedgerError> {
        self.revoke_at(id, reason, Utc::now())
    }

    pub fn revoke_at(
        &self,
        id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<RevokeOutcome, LedgerError> {
        let auth = self.store.get(id)?;
        if auth.status.is_terminal() {
            return Ok(RevokeOutcome::AlreadyTerminal(auth.status));
        }

        self.store
            .update_status(id, AuthorizationStatus::Revoked, Some(now))?;
        let mut revoked = auth;
        revoked.status = AuthorizationStatus::Revoked;
        revoked.revoked_at = Some(now);

        self.append_audit(
            EventDraft::new(
                EventType::AuthorizationRevoked,
                &revoked.client_id,
                "payment authorization revoked",
            )
            .severity(Severity::Warning)
            .entity(&revoked.id)
            .contract(&revoked.contract_id)
            .details(json!({
                "reason": reason,
                "remaining_uncharged": revoked.remaining(),
                "total_charged": revoked.total_charged,
            })),
        );

        info!(authorization = %id, reason, "authorization revoked");
        Ok(RevokeOutcome::Revoked(revoked))
    }

    /// Suspend an active authorization (auto-remediation). Idempotent:
    /// already-suspended is a no-op; terminal statuses are left alone.
    pub fn suspend(&self, id: &str, reason: &str) -> Result<bool, LedgerError> {
        let auth = self.store.get(id)?;
        if auth.status != AuthorizationStatus::Active {
            return Ok(false);
        }

        self.store
            .update_status(id, AuthorizationStatus::Suspended, None)?;

        self.append_audit(
            EventDraft::new(
                EventType::AuthorizationSuspended,
                &auth.client_id,
                "payment authorization suspended",
            )
            .severity(Severity::Warning)
            .entity(&auth.id)
            .contract(&auth.contract_id)
            .details(json!({ "reason": reason })),
        );

        warn!(authorization = %id, reason, "authorization suspended");
        Ok(true)
    }

    /// Transition a past-expiry authorization to `Expired` and flag the
    /// contract. Returns the updated record, or None if it was no longer
    /// active.
    pub fn mark_expired(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Authorization>, LedgerError> {
        let auth = self.store.get(id)?;
        if auth.status != AuthorizationStatus::Active {
            return Ok(None);
        }

        self.store
            .update_status(id, AuthorizationStatus::Expired, None)?;
        self.store
            .set_contract_flag(&auth.contract_id, "payment_authorization_expired", now)?;

        let mut expired = auth;
        expired.status = AuthorizationStatus::Expired;

        self.append_audit(
            EventDraft::new(
                EventType::AuthorizationExpired,
                &expired.client_id,
                "payment authorization expired",
            )
            .severity(Severity::Warning)
            .entity(&expired.id)
            .contract(&expired.contract_id)
            .details(json!({ "expires_at": expired.expires_at })),
        );

        Ok(Some(expired))
    }

    /// All active authorizations (monitoring)
    pub fn list_active(&self) -> Result<Vec<Authorization>, LedgerError> {
        self.store.list_active().map_err(Into::into)
    }

    /// Active authorizations expiring within `days` (monitoring)
    pub fn list_expiring_within(
        &self,
        now: DateTime<Utc>,
        days: i64,
    ) -> Result<Vec<Authorization>, LedgerError> {
        self.store.list_expiring_within(now, days).map_err(Into::into)
    }

    /// Active authorizations already past expiry (monitoring)
    pub fn list_expired_as_of(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Authorization>, LedgerError> {
        self.store.list_expired_as_of(now).map_err(Into::into)
    }

    /// Whether a contract flag has been set
    pub fn has_contract_flag(&self, contract_id: &str, flag: &str) -> Result<bool, LedgerError> {
        self.store
            .has_contract_flag(contract_id, flag)
            .map_err(Into::into)
    }

    /// Audit writes must never fail ledger operations; degrade to a log line.
    fn append_audit(&self, draft: EventDraft) {
        if let Err(e) = self.audit.append(draft) {
            warn!(error = %e, "failed to write audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::ConsentMetadata;
    use paygate_core::PaymentMethod;
    use rust_decimal_macros::dec;

    fn amount(v: rust_decimal::Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    fn test_ledger() -> (AuthorizationLedger, Arc<AuditLog>) {
        let audit = Arc::new(AuditLog::in_memory());
        let ledger = AuthorizationLedger::new(
            AuthorizationStore::in_memory().unwrap(),
            Arc::clone(&audit),
        );
        (ledger, audit)
    }

    fn params(contract: &str) -> NewAuthorization {
        NewAuthorization {
            contract_id: contract.to_string(),
            client_id: "client-1".to_string(),
            payment_method_ref: "pm_123".to_string(),
            method: PaymentMethod::Card,
            max_per_milestone: amount(dec!(2000)),
            total_authorized: amount(dec!(5000)),
            consent: ConsentMetadata {
                terms_version: "2025-06".to_string(),
                ip_address: None,
                user_agent: None,
            },
            expires_at: None,
        }
    }

    #[test]
    fn test_create_and_fetch() {
        let (ledger, audit) = test_ledger();
        let auth = ledger.create_authorization(params("contract-1")).unwrap();

        let active = ledger.get_active("contract-1").unwrap().unwrap();
        assert_eq!(active.id, auth.id);
        assert_eq!(audit.count_since(EventType::AuthorizationCreated, active.authorized_at - chrono::Duration::hours(1)), 1);
    }

    #[test]
    fn test_create_rejects_zero_caps() {
        let (ledger, _) = test_ledger();

        let mut bad = params("contract-1");
        bad.max_per_milestone = Amount::ZERO;
        assert!(matches!(
            ledger.create_authorization(bad),
            Err(LedgerError::Validation(_))
        ));

        let mut bad = params("contract-1");
        bad.total_authorized = Amount::ZERO;
        assert!(matches!(
            ledger.create_authorization(bad),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_create_rejects_per_milestone_above_total() {
        let (ledger, _) = test_ledger();
        let mut bad = params("contract-1");
        bad.max_per_milestone = amount(dec!(9000));
        assert!(matches!(
            ledger.create_authorization(bad),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_single_active_per_contract() {
        let (ledger, _) = test_ledger();
        ledger.create_authorization(params("contract-1")).unwrap();

        let result = ledger.create_authorization(params("contract-1"));
        assert!(matches!(result, Err(LedgerError::Validation(_))));

        // A revoked authorization frees the slot
        let active = ledger.get_active("contract-1").unwrap().unwrap();
        ledger.revoke(&active.id, "client request").unwrap();
        assert!(ledger.create_authorization(params("contract-1")).is_ok());
    }

    #[test]
    fn test_record_charge_cap_errors() {
        let (ledger, _) = test_ledger();
        let auth = ledger.create_authorization(params("contract-1")).unwrap();

        assert!(matches!(
            ledger.record_charge(&auth.id, amount(dec!(2500))),
            Err(LedgerError::PerMilestoneCapExceeded { .. })
        ));

        ledger.record_charge(&auth.id, amount(dec!(2000))).unwrap();
        ledger.record_charge(&auth.id, amount(dec!(2000))).unwrap();
        assert!(matches!(
            ledger.record_charge(&auth.id, amount(dec!(2000))),
            Err(LedgerError::TotalCapExceeded { .. })
        ));
    }

    #[test]
    fn test_concurrent_record_charge_respects_total_cap() {
        use std::thread;

        let (ledger, _) = test_ledger();
        let auth = ledger.create_authorization(params("contract-1")).unwrap();
        let ledger = Arc::new(ledger);

        // 5000 total cap, 10 threads each trying to charge 1000:
        // exactly 5 must win.
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let id = auth.id.clone();
                thread::spawn(move || ledger.record_charge(&id, amount(dec!(1000))).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap_or(false))
            .filter(|&ok| ok)
            .count();
        assert_eq!(successes, 5);

        let final_auth = ledger.get(&auth.id).unwrap();
        assert_eq!(final_auth.total_charged.value(), dec!(5000));
        assert!(final_auth.total_charged <= final_auth.total_authorized);
    }

    #[test]
    fn test_revoke_idempotent() {
        let (ledger, audit) = test_ledger();
        let auth = ledger.create_authorization(params("contract-1")).unwrap();

        let outcome = ledger.revoke(&auth.id, "fraud trigger").unwrap();
        assert!(matches!(outcome, RevokeOutcome::Revoked(_)));

        let outcome = ledger.revoke(&auth.id, "again").unwrap();
        assert!(matches!(
            outcome,
            RevokeOutcome::AlreadyTerminal(AuthorizationStatus::Revoked)
        ));

        // Only one revocation audit event
        let since = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(audit.count_since(EventType::AuthorizationRevoked, since), 1);
    }

    #[test]
    fn test_revoked_authorization_rejects_charges() {
        let (ledger, _) = test_ledger();
        let auth = ledger.create_authorization(params("contract-1")).unwrap();
        ledger.revoke(&auth.id, "client request").unwrap();

        assert!(matches!(
            ledger.record_charge(&auth.id, amount(dec!(100))),
            Err(LedgerError::NoAuthorization(_))
        ));
    }

    #[test]
    fn test_release_charge_roundtrip() {
        let (ledger, _) = test_ledger();
        let auth = ledger.create_authorization(params("contract-1")).unwrap();

        ledger.record_charge(&auth.id, amount(dec!(1500))).unwrap();
        ledger.release_charge(&auth.id, amount(dec!(1500))).unwrap();

        assert_eq!(ledger.get(&auth.id).unwrap().total_charged, Amount::ZERO);
    }

    #[test]
    fn test_mark_expired_flags_contract() {
        let (ledger, _) = test_ledger();
        let now = Utc::now();
        let mut p = params("contract-1");
        p.expires_at = Some(now - chrono::Duration::days(1));
        let auth = ledger.create_authorization(p).unwrap();

        let expired = ledger.mark_expired(&auth.id, now).unwrap().unwrap();
        assert_eq!(expired.status, AuthorizationStatus::Expired);
        assert!(ledger
            .has_contract_flag("contract-1", "payment_authorization_expired")
            .unwrap());

        // Second call is a no-op
        assert!(ledger.mark_expired(&auth.id, now).unwrap().is_none());

        // And no further charges are possible
        assert!(matches!(
            ledger.record_charge(&auth.id, amount(dec!(100))),
            Err(LedgerError::NoAuthorization(_))
        ));
    }

    #[test]
    fn test_suspend_idempotent() {
        let (ledger, _) = test_ledger();
        let auth = ledger.create_authorization(params("contract-1")).unwrap();

        assert!(ledger.suspend(&auth.id, "velocity abuse").unwrap());
        assert!(!ledger.suspend(&auth.id, "velocity abuse").unwrap());
        assert!(matches!(
            ledger.record_charge(&auth.id, amount(dec!(100))),
            Err(LedgerError::NoAuthorization(_))
        ));
    }
}
