//! Platform context - constructs and wires all components

use chrono::{DateTime, Utc};
use paygate_core::Amount;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use paygate_audit::{AuditLog, ComplianceMetrics};
use paygate_charges::{
    Charge, ChargeError, ChargeExecutor, ChargeRequestContext, ChargeStore, FeeSchedule,
    Milestone, MilestoneStatus, TwoFactorProof,
};
use paygate_disputes::{Dispute, DisputeError, DisputeManager, DisputeStore};
use paygate_ledger::{
    Authorization, AuthorizationLedger, AuthorizationStore, LedgerError, NewAuthorization,
    RevokeOutcome,
};
use paygate_monitor::{Alert, MonitorConfig, MonitorError, MonitoringService};
use paygate_rail::{Notification, NotificationTemplate, Notifier, PaymentRail};
use paygate_twofactor::{
    DeviceStore, OtpIssue, OtpStore, PaymentContext, TwoFactorConfig, TwoFactorError,
    TwoFactorGate,
};

/// Errors surfaced by platform operations
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Charge(#[from] ChargeError),

    #[error(transparent)]
    Dispute(#[from] DisputeError),

    #[error(transparent)]
    TwoFactor(#[from] TwoFactorError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("Store error: {0}")]
    Store(#[from] paygate_charges::ChargeStoreError),

    #[error("Verification failed")]
    VerificationFailed,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit error: {0}")]
    Audit(#[from] paygate_audit::AuditError),
}

/// Per-milestone outcome of a batch approval
#[derive(Debug, Clone)]
pub struct BatchItemResult {
    pub milestone_id: String,
    pub charge_id: Option<String>,
    pub error: Option<String>,
}

/// Aggregate metrics for a compliance reporting period
#[derive(Debug, Clone)]
pub struct ComplianceReport {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub metrics: ComplianceMetrics,
    pub disputes_opened: u32,
    pub entries_past_retention: usize,
}

/// Owns and wires every platform component
pub struct PlatformContext {
    pub audit: Arc<AuditLog>,
    pub ledger: Arc<AuthorizationLedger>,
    pub gate: Arc<TwoFactorGate>,
    pub charges: Arc<ChargeStore>,
    pub executor: ChargeExecutor,
    pub disputes: DisputeManager,
    pub monitor: Arc<MonitoringService>,
    notifier: Arc<dyn Notifier>,
}

impl PlatformContext {
    /// Open a context with on-disk stores under `data_dir`
    pub fn open(
        data_dir: impl AsRef<Path>,
        rail: Arc<dyn PaymentRail>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, PlatformError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let audit = Arc::new(AuditLog::open(data_dir.join("audit.jsonl"))?);
        let auth_store = AuthorizationStore::new(data_dir.join("authorizations.db"))
            .map_err(LedgerError::from)?;
        let charge_store = Arc::new(ChargeStore::new(data_dir.join("charges.db"))?);
        let otp_store = OtpStore::new(data_dir.join("twofactor.db"))?;
        let device_store = DeviceStore::new(data_dir.join("devices.db"))?;
        let dispute_store =
            DisputeStore::new(data_dir.join("disputes.db")).map_err(PlatformError::Dispute)?;

        Self::assemble(
            audit,
            auth_store,
            charge_store,
            otp_store,
            device_store,
            dispute_store,
            rail,
            notifier,
        )
    }

    /// Fully in-memory context (tests, sandbox runs)
    pub fn in_memory(
        rail: Arc<dyn PaymentRail>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, PlatformError> {
        let audit = Arc::new(AuditLog::in_memory());
        Self::assemble(
            audit,
            AuthorizationStore::in_memory().map_err(LedgerError::from)?,
            Arc::new(ChargeStore::in_memory()?),
            OtpStore::in_memory()?,
            DeviceStore::in_memory()?,
            DisputeStore::in_memory().map_err(PlatformError::Dispute)?,
            rail,
            notifier,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        audit: Arc<AuditLog>,
        auth_store: AuthorizationStore,
        charge_store: Arc<ChargeStore>,
        otp_store: OtpStore,
        device_store: DeviceStore,
        dispute_store: DisputeStore,
        rail: Arc<dyn PaymentRail>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, PlatformError> {
        let ledger = Arc::new(AuthorizationLedger::new(auth_store, Arc::clone(&audit)));
        let gate = Arc::new(TwoFactorGate::new(
            TwoFactorConfig::default(),
            otp_store,
            device_store,
            Arc::clone(&audit),
            Arc::clone(&notifier),
        ));
        let executor = ChargeExecutor::new(
            Arc::clone(&charge_store),
            Arc::clone(&ledger),
            Arc::clone(&gate),
            Arc::clone(&rail),
            Arc::clone(&notifier),
            Arc::clone(&audit),
            FeeSchedule::default(),
        );
        let disputes = DisputeManager::new(
            dispute_store,
            Arc::clone(&charge_store),
            Arc::clone(&rail),
            Arc::clone(&notifier),
            Arc::clone(&audit),
        );
        let monitor = Arc::new(MonitoringService::new(
            MonitorConfig::default(),
            Arc::clone(&ledger),
            Arc::clone(&charge_store),
            Arc::clone(&audit),
            Arc::clone(&notifier),
        ));

        Ok(Self {
            audit,
            ledger,
            gate,
            charges: charge_store,
            executor,
            disputes,
            monitor,
            notifier,
        })
    }

    // === Authorizations ===

    pub fn create_authorization(
        &self,
        params: NewAuthorization,
    ) -> Result<Authorization, PlatformError> {
        Ok(self.ledger.create_authorization(params)?)
    }

    /// Revoke an authorization and confirm to the client with the
    /// remaining uncharged balance and next-step guidance.
    pub async fn revoke_authorization(
        &self,
        authorization_id: &str,
        reason: &str,
    ) -> Result<RevokeOutcome, PlatformError> {
        let outcome = self.ledger.revoke(authorization_id, reason)?;

        if let RevokeOutcome::Revoked(auth) = &outcome {
            self.notify(Notification::new(
                &auth.client_id,
                NotificationTemplate::AuthorizationRevoked,
                json!({
                    "authorization_id": auth.id,
                    "contract_id": auth.contract_id,
                    "reason": reason,
                    "remaining_uncharged": auth.remaining(),
                    "next_steps": "reauthorize a payment method, pay remaining milestones manually, or terminate the contract",
                }),
            ))
            .await;
        }
        Ok(outcome)
    }

    // === Milestones ===

    pub fn create_milestone(
        &self,
        id: &str,
        contract_id: &str,
        title: &str,
        amount: Amount,
    ) -> Result<Milestone, PlatformError> {
        let milestone = Milestone::new(id, contract_id, title, amount);
        self.charges.insert_milestone(&milestone)?;
        Ok(milestone)
    }

    pub fn start_milestone(&self, id: &str) -> Result<(), PlatformError> {
        self.transition_milestone(id, MilestoneStatus::InProgress)
    }

    pub fn submit_milestone(&self, id: &str) -> Result<(), PlatformError> {
        self.transition_milestone(id, MilestoneStatus::Submitted)
    }

    fn transition_milestone(
        &self,
        id: &str,
        next: MilestoneStatus,
    ) -> Result<(), PlatformError> {
        let milestone = self.charges.get_milestone(id)?;
        if !milestone.status.can_transition_to(next) {
            return Err(PlatformError::Validation(format!(
                "milestone {} cannot move from {} to {}",
                id,
                milestone.status.as_str(),
                next.as_str()
            )));
        }
        self.charges
            .set_milestone_status(id, next, milestone.payment_released, Utc::now())?;
        Ok(())
    }

    /// Approve a submitted milestone and trigger its charge.
    ///
    /// The approval and the charge are one client action; a rejected
    /// charge (cap, verification, rail) leaves the milestone approved so
    /// the client can retry once the blocker clears.
    pub async fn approve_milestone(
        &self,
        milestone_id: &str,
        ctx: ChargeRequestContext,
    ) -> Result<Charge, PlatformError> {
        self.approve_milestone_at(milestone_id, ctx, Utc::now()).await
    }

    pub async fn approve_milestone_at(
        &self,
        milestone_id: &str,
        ctx: ChargeRequestContext,
        now: DateTime<Utc>,
    ) -> Result<Charge, PlatformError> {
        let milestone = self.charges.get_milestone(milestone_id)?;
        if milestone.status == MilestoneStatus::Submitted {
            self.charges.set_milestone_status(
                milestone_id,
                MilestoneStatus::Approved,
                milestone.payment_released,
                now,
            )?;
        }
        Ok(self
            .executor
            .execute_charge_at(milestone_id, &ctx, now)
            .await?)
    }

    // === Verification codes ===

    pub async fn send_payment_otp(
        &self,
        user_id: &str,
        milestone_id: &str,
        recipient: &str,
        ctx: &PaymentContext,
    ) -> Result<OtpIssue, PlatformError> {
        let milestone = self.charges.get_milestone(milestone_id)?;
        Ok(self
            .gate
            .send_code(user_id, milestone_id, milestone.amount, recipient, ctx)
            .await?)
    }

    pub fn verify_payment_otp(&self, user_id: &str, milestone_id: &str, code: &str) -> bool {
        self.gate.verify_code(user_id, milestone_id, code)
    }

    /// Issue one code covering the combined amount of several milestones.
    /// The code is keyed to the first milestone id.
    pub async fn send_batch_otp(
        &self,
        user_id: &str,
        milestone_ids: &[String],
        recipient: &str,
        ctx: &PaymentContext,
    ) -> Result<OtpIssue, PlatformError> {
        let first = milestone_ids
            .first()
            .ok_or_else(|| PlatformError::Validation("empty batch".to_string()))?;

        let mut combined = Amount::ZERO;
        for id in milestone_ids {
            let milestone = self.charges.get_milestone(id)?;
            combined = combined
                .checked_add(&milestone.amount)
                .ok_or_else(|| PlatformError::Validation("batch amount overflow".to_string()))?;
        }

        Ok(self
            .gate
            .send_code(user_id, first, combined, recipient, ctx)
            .await?)
    }

    /// Approve a batch of milestones with a single verification code.
    ///
    /// The code is verified once against the combined amount; each
    /// milestone is then approved independently. One failure does not
    /// roll back the others - results are reported per milestone.
    pub async fn batch_approve(
        &self,
        user_id: &str,
        milestone_ids: &[String],
        code: &str,
        ctx: ChargeRequestContext,
    ) -> Result<Vec<BatchItemResult>, PlatformError> {
        let first = milestone_ids
            .first()
            .ok_or_else(|| PlatformError::Validation("empty batch".to_string()))?;

        if !self.gate.verify_code(user_id, first, code) {
            return Err(PlatformError::VerificationFailed);
        }

        let mut results = Vec::with_capacity(milestone_ids.len());
        for milestone_id in milestone_ids {
            let item_ctx = ctx.clone().with_proof(TwoFactorProof::Verified);
            match self.approve_milestone(milestone_id, item_ctx).await {
                Ok(charge) => results.push(BatchItemResult {
                    milestone_id: milestone_id.clone(),
                    charge_id: Some(charge.id),
                    error: None,
                }),
                Err(e) => results.push(BatchItemResult {
                    milestone_id: milestone_id.clone(),
                    charge_id: None,
                    error: Some(e.to_string()),
                }),
            }
        }
        Ok(results)
    }

    // === Disputes ===

    pub async fn open_dispute(
        &self,
        payment_id: &str,
        reason: &str,
        client_id: &str,
        freelancer_id: &str,
    ) -> Result<Dispute, PlatformError> {
        Ok(self
            .disputes
            .open_dispute(payment_id, reason, client_id, freelancer_id)
            .await?)
    }

    pub async fn resolve_dispute(
        &self,
        dispute_id: &str,
        resolution: &str,
        refund_amount: Option<Amount>,
        admin_id: &str,
    ) -> Result<Dispute, PlatformError> {
        Ok(self
            .disputes
            .resolve_dispute(dispute_id, resolution, refund_amount, admin_id)
            .await?)
    }

    // === Reporting & monitoring ===

    pub fn compliance_report(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<ComplianceReport, PlatformError> {
        let metrics = self.audit.compliance_metrics(period_start, period_end);
        let disputes_opened = self.disputes.count_opened_since(period_start)?;
        let entries_past_retention = self.audit.cleanup_old_logs(period_end);
        Ok(ComplianceReport {
            period_start,
            period_end,
            metrics,
            disputes_opened,
            entries_past_retention,
        })
    }

    /// One full monitoring pass (CLI / tests)
    pub async fn run_monitor_once(&self) -> Result<Vec<Alert>, PlatformError> {
        Ok(self.monitor.run_all_at(Utc::now()).await?)
    }

    /// Start the periodic monitoring loops
    pub fn start_monitoring(&self) -> Vec<tokio::task::JoinHandle<()>> {
        Arc::clone(&self.monitor).spawn()
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.deliver(&notification).await {
            warn!(error = %e, "notification delivery failed");
        }
    }
}
