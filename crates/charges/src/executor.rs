//! The charge execution pipeline
//!
//! ```text
//! approved milestone
//!        |
//!        v
//! state + idempotency checks ---- already paid / charge in flight? reject
//!        |
//!        v
//! active authorization lookup --- none / revoked? NoAuthorization
//!        |
//!        v
//! per-milestone cap check ------- over cap? reject before any rail call
//!        |
//!        v
//! risk score + 2FA gate --------- code required but absent/wrong? reject
//!        |
//!        v
//! atomic ledger increment ------- total cap enforced transactionally
//!        |
//!        v
//! rail call (with timeout) ------ failure? release increment, record
//!        |                        failed charge, notify
//!        v
//! charge settled: milestone paid, payment released, receipt sent
//! ```

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use paygate_audit::{AuditLog, EventDraft, EventType, Severity};
use paygate_ledger::{AuthorizationLedger, LedgerError};
use paygate_rail::{
    ChargeRequest, Notification, NotificationTemplate, Notifier, PaymentRail, RailError,
};
use paygate_risk::{score_transaction, RiskContext};
use paygate_twofactor::{ActivitySnapshot, PaymentContext, SecuritySettings, TwoFactorGate};

use crate::charge::{Charge, ChargeStatus};
use crate::error::ChargeError;
use crate::fees::FeeSchedule;
use crate::milestone::MilestoneStatus;
use crate::store::ChargeStore;

/// Default wall-clock budget for one rail call
const DEFAULT_RAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// How the caller satisfied (or didn't) the 2FA requirement
#[derive(Debug, Clone)]
pub enum TwoFactorProof {
    /// No code supplied
    None,
    /// A code to verify against this milestone
    Code(String),
    /// The code was already verified in this approval action
    /// (batch approval verifies once against the combined amount)
    Verified,
}

/// Request-scoped inputs for one charge execution
#[derive(Debug, Clone)]
pub struct ChargeRequestContext {
    /// The paying client's security preferences
    pub settings: SecuritySettings,
    /// Device/address context from the approval request
    pub payment: PaymentContext,
    /// Where receipts and failure notices go
    pub recipient: String,
    pub proof: TwoFactorProof,
}

impl ChargeRequestContext {
    pub fn new(recipient: impl Into<String>) -> Self {
        Self {
            settings: SecuritySettings::default(),
            payment: PaymentContext::default(),
            recipient: recipient.into(),
            proof: TwoFactorProof::None,
        }
    }

    pub fn with_settings(mut self, settings: SecuritySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_payment_context(mut self, payment: PaymentContext) -> Self {
        self.payment = payment;
        self
    }

    pub fn with_proof(mut self, proof: TwoFactorProof) -> Self {
        self.proof = proof;
        self
    }
}

/// Executes approved milestones against standing authorizations
pub struct ChargeExecutor {
    store: Arc<ChargeStore>,
    ledger: Arc<AuthorizationLedger>,
    gate: Arc<TwoFactorGate>,
    rail: Arc<dyn PaymentRail>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<AuditLog>,
    fees: FeeSchedule,
    rail_timeout: Duration,
}

impl ChargeExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ChargeStore>,
        ledger: Arc<AuthorizationLedger>,
        gate: Arc<TwoFactorGate>,
        rail: Arc<dyn PaymentRail>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<AuditLog>,
        fees: FeeSchedule,
    ) -> Self {
        Self {
            store,
            ledger,
            gate,
            rail,
            notifier,
            audit,
            fees,
            rail_timeout: DEFAULT_RAIL_TIMEOUT,
        }
    }

    pub fn with_rail_timeout(mut self, timeout: Duration) -> Self {
        self.rail_timeout = timeout;
        self
    }

    /// Execute a charge for an approved milestone
    pub async fn execute_charge(
        &self,
        milestone_id: &str,
        ctx: &ChargeRequestContext,
    ) -> Result<Charge, ChargeError> {
        self.execute_charge_at(milestone_id, ctx, Utc::now()).await
    }

    pub async fn execute_charge_at(
        &self,
        milestone_id: &str,
        ctx: &ChargeRequestContext,
        now: DateTime<Utc>,
    ) -> Result<Charge, ChargeError> {
        let milestone = self
            .store
            .get_milestone(milestone_id)
            .map_err(|_| ChargeError::MilestoneNotFound(milestone_id.to_string()))?;

        // Idempotency: one non-failed charge per milestone, and a paid
        // milestone never charges again. Client-facing retries after
        // network timeouts hit this path.
        if milestone.status == MilestoneStatus::Paid {
            return Err(ChargeError::InvalidState(format!(
                "milestone {} is already paid",
                milestone.id
            )));
        }
        if let Some(existing) = self.store.find_non_failed_for_milestone(&milestone.id)? {
            return Err(ChargeError::InvalidState(format!(
                "milestone {} already has charge {} ({})",
                milestone.id,
                existing.id,
                existing.status.as_str()
            )));
        }
        if milestone.status != MilestoneStatus::Approved {
            return Err(ChargeError::InvalidState(format!(
                "milestone {} is {}, not approved",
                milestone.id,
                milestone.status.as_str()
            )));
        }

        // Authorization status is checked here, at the start of the
        // attempt - not from any earlier read the caller may hold.
        let auth = self
            .ledger
            .get_active(&milestone.contract_id)?
            .ok_or_else(|| {
                LedgerError::NoAuthorization(format!(
                    "contract {} has no active authorization",
                    milestone.contract_id
                ))
            })?;

        // Per-milestone cap, before any rail interaction
        if milestone.amount > auth.max_per_milestone {
            return Err(ChargeError::Ledger(LedgerError::PerMilestoneCapExceeded {
                requested: milestone.amount,
                cap: auth.max_per_milestone,
            }));
        }

        // Client history feeding risk and the 2FA heuristics. These
        // lookups fail open to defaults: a missing average can only
        // skip an escalation, and first-payment degrades to true which
        // escalates.
        let is_first_payment = !self
            .store
            .has_succeeded_for_client(&auth.client_id)
            .unwrap_or(false);
        let activity = self.activity_snapshot(&auth.client_id, now);
        let recent_failures = self
            .store
            .count_failed_for_contract_since(&milestone.contract_id, now - chrono::Duration::hours(6))
            .unwrap_or(0);

        let assessment = score_transaction(&RiskContext {
            amount: milestone.amount,
            is_first_payment,
            device_fingerprint: ctx.payment.device_id.clone(),
            recent_failure_count: recent_failures,
            known_location: ctx.payment.ip_address.is_some(),
            user_agent: ctx.payment.user_agent.clone(),
        });
        if assessment.is_high_risk() {
            self.append_audit(
                EventDraft::new(EventType::RiskFlagged, &auth.client_id, "high risk transaction")
                    .severity(Severity::Critical)
                    .entity(&milestone.id)
                    .contract(&milestone.contract_id)
                    .details(json!({
                        "score": assessment.score,
                        "triggers": assessment.triggers,
                        "amount": milestone.amount,
                    })),
            );
        }

        let decision = self.gate.requires_2fa_at(
            &auth.client_id,
            &ctx.settings,
            milestone.amount,
            &ctx.payment,
            &activity,
            is_first_payment,
            now,
        );
        if decision.required {
            match &ctx.proof {
                TwoFactorProof::Verified => {}
                TwoFactorProof::Code(code) => {
                    if !self.gate.verify_code_at(&auth.client_id, &milestone.id, code, now) {
                        return Err(ChargeError::VerificationFailed);
                    }
                }
                TwoFactorProof::None => {
                    return Err(ChargeError::VerificationRequired(decision.reason.to_string()));
                }
            }
        }

        // Atomic cap check + increment. Failure aborts before the rail
        // is ever touched.
        self.ledger
            .record_charge_at(&auth.id, milestone.amount, now)?;

        let mut charge = Charge::create(
            &milestone.contract_id,
            &milestone.id,
            &auth.id,
            &auth.client_id,
            milestone.amount,
            auth.method,
            self.fees.breakdown(milestone.amount),
            now,
        );
        self.store.insert_charge(&charge)?;

        self.append_audit(
            EventDraft::new(EventType::PaymentAttempt, &auth.client_id, "charge dispatched")
                .entity(&charge.id)
                .contract(&milestone.contract_id)
                .source(ctx.payment.ip_address.clone(), ctx.payment.user_agent.clone())
                .details(json!({
                    "milestone_id": milestone.id,
                    "amount": milestone.amount,
                    "risk_score": assessment.score,
                })),
        );

        let request = ChargeRequest {
            authorization_ref: auth.payment_method_ref.clone(),
            amount: milestone.amount,
            method: auth.method,
            reference: charge.id.clone(),
        };
        let outcome = match tokio::time::timeout(self.rail_timeout, self.rail.charge(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(RailError::Timeout),
        };

        match outcome {
            Ok(receipt) => {
                charge.status = ChargeStatus::Succeeded;
                charge.external_charge_id = Some(receipt.charge_id.clone());
                charge.settled_at = Some(now);
                self.store.record_outcome(
                    &charge.id,
                    ChargeStatus::Succeeded,
                    Some(&receipt.charge_id),
                    None,
                    Some(now),
                )?;
                self.store.set_milestone_status(
                    &milestone.id,
                    MilestoneStatus::Paid,
                    true,
                    now,
                )?;

                self.gate.note_device_seen(&auth.client_id, &ctx.payment, now);

                self.append_audit(
                    EventDraft::new(EventType::PaymentSuccess, &auth.client_id, "charge settled")
                        .entity(&charge.id)
                        .contract(&milestone.contract_id)
                        .details(json!({
                            "milestone_id": milestone.id,
                            "amount": charge.amount,
                            "external_charge_id": receipt.charge_id,
                            "fees": charge.fees,
                        })),
                );

                // Receipt with fee breakdown and the dispute deadline.
                // The deadline holds whether or not this delivery lands.
                self.notify(Notification::new(
                    &ctx.recipient,
                    NotificationTemplate::PaymentReceipt,
                    json!({
                        "charge_id": charge.id,
                        "milestone": milestone.title,
                        "amount": charge.amount,
                        "processor_fee": charge.fees.processor_fee,
                        "platform_fee": charge.fees.platform_fee,
                        "processed_at": now,
                        "dispute_deadline": charge.dispute_deadline(),
                    }),
                ))
                .await;

                info!(charge = %charge.id, milestone = %milestone.id, "charge settled");
                Ok(charge)
            }
            Err(rail_error) => {
                // Roll back the ledger increment so a failed rail call
                // does not consume authorization budget.
                if let Err(e) = self.ledger.release_charge(&auth.id, milestone.amount) {
                    warn!(error = %e, authorization = %auth.id, "failed to release ledger increment");
                }

                charge.status = ChargeStatus::Failed;
                charge.failure_reason = Some(rail_error.to_string());
                self.store.record_outcome(
                    &charge.id,
                    ChargeStatus::Failed,
                    None,
                    Some(&rail_error.to_string()),
                    None,
                )?;

                self.append_audit(
                    EventDraft::new(EventType::PaymentFailed, &auth.client_id, "charge failed")
                        .severity(Severity::Error)
                        .entity(&charge.id)
                        .contract(&milestone.contract_id)
                        .details(json!({
                            "milestone_id": milestone.id,
                            "amount": charge.amount,
                            "reason": rail_error.to_string(),
                            "category": rail_error.category(),
                            "transient": rail_error.is_transient(),
                        })),
                );

                // Generic failure category only; the specific processor
                // reason stays in the audit log.
                self.notify(Notification::new(
                    &ctx.recipient,
                    NotificationTemplate::PaymentFailed,
                    json!({
                        "milestone": milestone.title,
                        "amount": charge.amount,
                        "category": rail_error.category(),
                    }),
                ))
                .await;

                Err(ChargeError::Rail(rail_error))
            }
        }
    }

    /// Recent-activity summary for the 2FA heuristics; fails open to
    /// defaults because it can only escalate verification, never skip it.
    fn activity_snapshot(&self, client_id: &str, now: DateTime<Utc>) -> ActivitySnapshot {
        let day_start = now - chrono::Duration::hours(24);
        let month_start = now - chrono::Duration::days(30);
        ActivitySnapshot {
            payments_today: self
                .store
                .count_succeeded_since(client_id, day_start)
                .unwrap_or(0),
            recent_average: self
                .store
                .recent_average(client_id, month_start)
                .unwrap_or(None),
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
