//! Dispute lifecycle orchestration

use chrono::{DateTime, Utc};
use paygate_core::Amount;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use paygate_audit::{AuditLog, EventDraft, EventType, Severity};
use paygate_charges::{ChargeStatus, ChargeStore, DISPUTE_WINDOW_HOURS};
use paygate_rail::{Notification, NotificationTemplate, Notifier, PaymentRail, RailError};

use crate::dispute::Dispute;
use crate::error::DisputeError;
use crate::store::DisputeStore;

const REFUND_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens and resolves disputes against settled charges
pub struct DisputeManager {
    store: DisputeStore,
    charges: Arc<ChargeStore>,
    rail: Arc<dyn PaymentRail>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<AuditLog>,
}

impl DisputeManager {
    pub fn new(
        store: DisputeStore,
        charges: Arc<ChargeStore>,
        rail: Arc<dyn PaymentRail>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            store,
            charges,
            rail,
            notifier,
            audit,
        }
    }

    /// Open a dispute against a settled charge.
    ///
    /// Valid only while `now <= settled_at + 48h`. Freezes the freelancer
    /// payout in the same transaction that records the dispute.
    pub async fn open_dispute(
        &self,
        payment_id: &str,
        reason: &str,
        client_id: &str,
        freelancer_id: &str,
    ) -> Result<Dispute, DisputeError> {
        self.open_dispute_at(payment_id, reason, client_id, freelancer_id, Utc::now())
            .await
    }

    pub async fn open_dispute_at(
        &self,
        payment_id: &str,
        reason: &str,
        client_id: &str,
        freelancer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Dispute, DisputeError> {
        let charge = self
            .charges
            .get_charge(payment_id)
            .map_err(|_| DisputeError::ChargeNotFound(payment_id.to_string()))?;

        if charge.status != ChargeStatus::Succeeded {
            return Err(DisputeError::InvalidState(format!(
                "charge {} is {}, not a settled charge",
                charge.id,
                charge.status.as_str()
            )));
        }
        let settled_at = charge.settled_at.ok_or_else(|| {
            DisputeError::InvalidState(format!("charge {} has no settlement time", charge.id))
        })?;

        let deadline = settled_at + chrono::Duration::hours(DISPUTE_WINDOW_HOURS);
        if now > deadline {
            return Err(DisputeError::WindowClosed { deadline });
        }

        if self.store.find_actionable_by_payment(payment_id)?.is_some() {
            return Err(DisputeError::InvalidState(format!(
                "charge {} is already under dispute",
                payment_id
            )));
        }

        let dispute = Dispute::open(
            payment_id,
            &charge.contract_id,
            client_id,
            freelancer_id,
            charge.amount,
            reason,
            now,
        );
        // Record + payout freeze are one transaction: the freeze is
        // visible the instant the dispute exists.
        self.store.open_with_freeze(&dispute)?;

        self.append_audit(
            EventDraft::new(EventType::DisputeOpened, client_id, "dispute opened")
                .severity(Severity::Warning)
                .entity(&dispute.id)
                .contract(&dispute.contract_id)
                .details(json!({
                    "payment_id": payment_id,
                    "amount": dispute.amount,
                    "reason": reason,
                    "deadline": deadline,
                })),
        );

        self.notify(Notification::new(
            freelancer_id,
            NotificationTemplate::DisputeOpened,
            json!({
                "dispute_id": dispute.id,
                "payment_id": payment_id,
                "amount": dispute.amount,
                "reason": reason,
            }),
        ))
        .await;

        info!(dispute = %dispute.id, payment = %payment_id, "dispute opened, payout frozen");
        Ok(dispute)
    }

    /// Resolve a dispute, optionally refunding through the rail, and lift
    /// the payout freeze.
    ///
    /// The dispute is claimed atomically before any refund is attempted,
    /// so a second resolution attempt errors instead of double-refunding.
    pub async fn resolve_dispute(
        &self,
        dispute_id: &str,
        resolution: &str,
        refund_amount: Option<Amount>,
        admin_id: &str,
    ) -> Result<Dispute, DisputeError> {
        self.resolve_dispute_at(dispute_id, resolution, refund_amount, admin_id, Utc::now())
            .await
    }

    pub async fn resolve_dispute_at(
        &self,
        dispute_id: &str,
        resolution: &str,
        refund_amount: Option<Amount>,
        admin_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Dispute, DisputeError> {
        let dispute = self.store.get(dispute_id)?;

        if let Some(refund) = refund_amount {
            if refund > dispute.amount {
                return Err(DisputeError::Validation(format!(
                    "refund {} exceeds disputed amount {}",
                    refund, dispute.amount
                )));
            }
        }

        if !self
            .store
            .claim_resolution(dispute_id, resolution, refund_amount, now)?
        {
            return Err(DisputeError::AlreadyResolved(dispute_id.to_string()));
        }

        if let Some(refund) = refund_amount {
            self.issue_refund(&dispute, refund, admin_id).await?;
        }

        self.store.release_freeze(&dispute.payment_id, now)?;

        self.append_audit(
            EventDraft::new(EventType::DisputeResolved, admin_id, "dispute resolved")
                .entity(dispute_id)
                .contract(&dispute.contract_id)
                .details(json!({
                    "payment_id": dispute.payment_id,
                    "resolution": resolution,
                    "refund_amount": refund_amount,
                })),
        );

        self.notify(Notification::new(
            &dispute.client_id,
            NotificationTemplate::DisputeResolved,
            json!({
                "dispute_id": dispute_id,
                "resolution": resolution,
                "refund_amount": refund_amount,
            }),
        ))
        .await;

        info!(dispute = %dispute_id, "dispute resolved, payout unfrozen");
        self.store.get(dispute_id)
    }

    /// Whether the payout for a payment is currently frozen
    pub fn is_payout_frozen(&self, payment_id: &str) -> Result<bool, DisputeError> {
        self.store.is_frozen(payment_id)
    }

    /// Fetch a dispute by id
    pub fn get(&self, dispute_id: &str) -> Result<Dispute, DisputeError> {
        self.store.get(dispute_id)
    }

    /// Disputes opened since a cutoff (monitoring)
    pub fn count_opened_since(&self, since: DateTime<Utc>) -> Result<u32, DisputeError> {
        self.store.count_opened_since(since)
    }

    async fn issue_refund(
        &self,
        dispute: &Dispute,
        refund: Amount,
        admin_id: &str,
    ) -> Result<(), DisputeError> {
        let charge = self
            .charges
            .get_charge(&dispute.payment_id)
            .map_err(|_| DisputeError::ChargeNotFound(dispute.payment_id.to_string()))?;
        let external_id = charge.external_charge_id.as_deref().ok_or_else(|| {
            DisputeError::InvalidState(format!("charge {} has no processor id", charge.id))
        })?;

        let outcome = match tokio::time::timeout(
            REFUND_TIMEOUT,
            self.rail.refund(external_id, refund),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RailError::Timeout),
        };

        match outcome {
            Ok(receipt) => {
                self.charges.mark_refunded(&charge.id)?;
                self.append_audit(
                    EventDraft::new(EventType::PaymentRefunded, admin_id, "refund issued")
                        .entity(&charge.id)
                        .contract(&dispute.contract_id)
                        .details(json!({
                            "dispute_id": dispute.id,
                            "refund_id": receipt.refund_id,
                            "amount": refund,
                        })),
                );
                Ok(())
            }
            Err(rail_error) => {
                // The dispute stays resolved; the refund needs an
                // operator retry. The payout freeze is left in place by
                // the caller bailing out here.
                self.append_audit(
                    EventDraft::new(EventType::PaymentFailed, admin_id, "refund failed")
                        .severity(Severity::Error)
                        .entity(&charge.id)
                        .contract(&dispute.contract_id)
                        .details(json!({
                            "dispute_id": dispute.id,
                            "amount": refund,
                            "reason": rail_error.to_string(),
                        })),
                );
                Err(DisputeError::Rail(rail_error))
            }
        }
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.deliver(&notification).await {
            warn!(error = %e, "notification delivery failed");
        }
    }

    fn append_audit(&self, draft: EventDraft) {
        if let Err(e) = self.audit.append(draft) {
            warn!(error = %e, "failed to write audit event");
        }
    }
}
