//! The two-factor gate
//!
//! Wires the decision policy, the OTP store, the device registries, and
//! the rate limiter together, and writes a tracking event for every
//! decision and verification outcome. The caller only ever learns a
//! boolean from verification; the reason a code was rejected stays in
//! the audit log.

use chrono::{DateTime, Utc};
use paygate_core::Amount;
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use paygate_audit::{AuditLog, EventDraft, EventType, Severity};
use paygate_rail::{Notification, NotificationTemplate, Notifier};

use crate::config::{SecuritySettings, TwoFactorConfig};
use crate::devices::{device_fingerprint, DeviceStore};
use crate::error::TwoFactorError;
use crate::otp::{constant_time_eq, hash_code, OtpStore, VerificationCode};
use crate::policy::{self, ActivitySnapshot, PaymentContext, TwoFactorDecision};
use crate::ratelimit::RateLimiter;

/// Handle returned when a code is issued
#[derive(Debug, Clone)]
pub struct OtpIssue {
    pub otp_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Adaptive two-factor gate
pub struct TwoFactorGate {
    config: TwoFactorConfig,
    otp_store: OtpStore,
    devices: DeviceStore,
    rate_limiter: RateLimiter,
    audit: Arc<AuditLog>,
    notifier: Arc<dyn Notifier>,
}

impl TwoFactorGate {
    pub fn new(
        config: TwoFactorConfig,
        otp_store: OtpStore,
        devices: DeviceStore,
        audit: Arc<AuditLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(
            config.rate_limit_window(),
            config.rate_limit_attempts,
        );
        Self {
            config,
            otp_store,
            devices,
            rate_limiter,
            audit,
            notifier,
        }
    }

    pub fn config(&self) -> &TwoFactorConfig {
        &self.config
    }

    /// Decide whether this payment needs a verification code.
    ///
    /// Store lookups that fail degrade to "required" - the gate fails
    /// closed when it cannot prove a bypass is safe. Every branch writes
    /// a tracking event with the chosen reason.
    pub fn requires_2fa(
        &self,
        user_id: &str,
        settings: &SecuritySettings,
        amount: Amount,
        ctx: &PaymentContext,
        activity: &ActivitySnapshot,
        is_first_payment: bool,
    ) -> TwoFactorDecision {
        self.requires_2fa_at(user_id, settings, amount, ctx, activity, is_first_payment, Utc::now())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn requires_2fa_at(
        &self,
        user_id: &str,
        settings: &SecuritySettings,
        amount: Amount,
        ctx: &PaymentContext,
        activity: &ActivitySnapshot,
        is_first_payment: bool,
        now: DateTime<Utc>,
    ) -> TwoFactorDecision {
        let fingerprint_known = match self.request_fingerprint(ctx) {
            Some(fp) => self.devices.is_known(user_id, &fp).unwrap_or(false),
            None => false,
        };

        let device_trusted = match &ctx.device_id {
            Some(device_id) => self
                .devices
                .is_trusted_at(user_id, device_id, now)
                .unwrap_or(false),
            None => false,
        };

        let decision = policy::evaluate(
            &self.config,
            settings,
            amount,
            ctx,
            activity,
            is_first_payment,
            fingerprint_known,
            device_trusted,
        );

        let event_type = if decision.required {
            EventType::TwoFactorSent
        } else {
            EventType::TwoFactorBypassed
        };
        self.track(
            EventDraft::new(event_type, user_id, decision.reason.to_string())
                .source(ctx.ip_address.clone(), ctx.user_agent.clone())
                .details(json!({
                    "amount": amount,
                    "reason": decision.reason,
                    "required": decision.required,
                })),
        );

        decision
    }

    /// Generate, store, and deliver a 6-digit verification code.
    ///
    /// Only the hash is stored; the plaintext goes to the notification
    /// channel and nowhere else. Delivery failure is an error (fail
    /// closed) - an undeliverable code must not leave a charge approvable.
    pub async fn send_code(
        &self,
        user_id: &str,
        milestone_id: &str,
        amount: Amount,
        recipient: &str,
        ctx: &PaymentContext,
    ) -> Result<OtpIssue, TwoFactorError> {
        self.send_code_at(user_id, milestone_id, amount, recipient, ctx, Utc::now())
            .await
    }

    pub async fn send_code_at(
        &self,
        user_id: &str,
        milestone_id: &str,
        amount: Amount,
        recipient: &str,
        ctx: &PaymentContext,
        now: DateTime<Utc>,
    ) -> Result<OtpIssue, TwoFactorError> {
        let plain = generate_code();
        let expires_at = now + self.config.otp_ttl();

        let code = VerificationCode {
            id: format!("OTP-{}", &uuid::Uuid::new_v4().to_string()[..8].to_uppercase()),
            user_id: user_id.to_string(),
            milestone_id: milestone_id.to_string(),
            code_hash: hash_code(user_id, milestone_id, &plain),
            amount,
            created_at: now,
            expires_at,
            used: false,
            failed_attempts: 0,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        };
        self.otp_store.insert(&code)?;

        let delivery = self
            .notifier
            .deliver(&Notification::new(
                recipient,
                NotificationTemplate::VerificationCode,
                json!({
                    "code": plain,
                    "amount": amount,
                    "expires_at": expires_at,
                    "milestone_id": milestone_id,
                }),
            ))
            .await;

        if let Err(e) = delivery {
            self.track(
                EventDraft::new(EventType::TwoFactorFailed, user_id, "code delivery failed")
                    .severity(Severity::Error)
                    .entity(&code.id)
                    .details(json!({ "milestone_id": milestone_id })),
            );
            return Err(e.into());
        }

        self.track(
            EventDraft::new(EventType::TwoFactorSent, user_id, "verification code issued")
                .entity(&code.id)
                .source(ctx.ip_address.clone(), ctx.user_agent.clone())
                .details(json!({
                    "milestone_id": milestone_id,
                    "amount": amount,
                    "expires_at": expires_at,
                })),
        );

        Ok(OtpIssue {
            otp_id: code.id,
            expires_at,
        })
    }

    /// Verify a code for a user and milestone.
    ///
    /// Rate-limited per user (fail closed). On success the code is
    /// consumed atomically; two concurrent verifications of the same
    /// code cannot both return true. The caller learns only the boolean.
    pub fn verify_code(&self, user_id: &str, milestone_id: &str, code: &str) -> bool {
        self.verify_code_at(user_id, milestone_id, code, Utc::now())
    }

    pub fn verify_code_at(
        &self,
        user_id: &str,
        milestone_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.rate_limiter.check_at(user_id, now) {
            self.track_failure(user_id, milestone_id, None, "verification rate limit exceeded");
            return false;
        }

        let record = match self.otp_store.latest_valid(user_id, milestone_id, now) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.track_failure(user_id, milestone_id, None, "no valid code on file");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "verification lookup failed");
                self.track_failure(user_id, milestone_id, None, "verification lookup failed");
                return false;
            }
        };

        if record.failed_attempts >= self.config.max_code_attempts {
            self.track_failure(user_id, milestone_id, Some(&record.id), "code attempt limit reached");
            return false;
        }

        let candidate = hash_code(user_id, milestone_id, code);
        if !constant_time_eq(candidate.as_bytes(), record.code_hash.as_bytes()) {
            if let Err(e) = self.otp_store.record_failed_attempt(&record.id) {
                warn!(error = %e, "failed to record code attempt");
            }
            self.track_failure(user_id, milestone_id, Some(&record.id), "wrong code");
            return false;
        }

        // Atomic single-use consumption; a concurrent verifier that got
        // here first wins and this call reports failure.
        match self.otp_store.consume(&record.id, now) {
            Ok(true) => {
                self.track(
                    EventDraft::new(EventType::TwoFactorSuccess, user_id, "code verified")
                        .entity(&record.id)
                        .details(json!({ "milestone_id": milestone_id })),
                );
                true
            }
            Ok(false) => {
                self.track_failure(user_id, milestone_id, Some(&record.id), "code already used");
                false
            }
            Err(e) => {
                warn!(error = %e, "code consumption failed");
                self.track_failure(user_id, milestone_id, Some(&record.id), "code consumption failed");
                false
            }
        }
    }

    /// Grant a 30-day (configurable) 2FA bypass to a device
    pub fn trust_device(
        &self,
        user_id: &str,
        device_id: &str,
        ctx: &PaymentContext,
    ) -> Result<(), TwoFactorError> {
        self.trust_device_at(user_id, device_id, ctx, Utc::now())
    }

    pub fn trust_device_at(
        &self,
        user_id: &str,
        device_id: &str,
        ctx: &PaymentContext,
        now: DateTime<Utc>,
    ) -> Result<(), TwoFactorError> {
        let trusted_until = now + self.config.device_trust_window();
        self.devices.trust(
            user_id,
            device_id,
            trusted_until,
            ctx.ip_address.as_deref(),
            ctx.user_agent.as_deref(),
            now,
        )?;

        self.track(
            EventDraft::new(EventType::DeviceTrusted, user_id, "device trusted")
                .entity(device_id)
                .source(ctx.ip_address.clone(), ctx.user_agent.clone())
                .details(json!({ "trusted_until": trusted_until })),
        );
        Ok(())
    }

    /// Record the request's fingerprint as seen. Non-security bookkeeping
    /// for the new-device heuristic; errors degrade to a log line.
    pub fn note_device_seen(&self, user_id: &str, ctx: &PaymentContext, now: DateTime<Utc>) {
        if let Some(fp) = self.request_fingerprint(ctx) {
            if let Err(e) = self.devices.record_seen(user_id, &fp, now) {
                warn!(error = %e, "failed to record device sighting");
            }
        }
    }

    fn request_fingerprint(&self, ctx: &PaymentContext) -> Option<String> {
        ctx.ip_address
            .as_ref()
            .map(|ip| device_fingerprint(ctx.user_agent.as_deref().unwrap_or(""), ip))
    }

    fn track_failure(
        &self,
        user_id: &str,
        milestone_id: &str,
        otp_id: Option<&str>,
        action: &str,
    ) {
        let mut draft = EventDraft::new(EventType::TwoFactorFailed, user_id, action)
            .severity(Severity::Warning)
            .details(json!({ "milestone_id": milestone_id }));
        if let Some(id) = otp_id {
            draft = draft.entity(id);
        }
        self.track(draft);
    }

    /// Tracking writes must never fail the gate; degrade to a log line.
    fn track(&self, draft: EventDraft) {
        if let Err(e) = self.audit.append(draft) {
            warn!(error = %e, "failed to write 2FA tracking event");
        }
    }
}

/// A uniformly random 6-digit code
fn generate_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
    code.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_rail::MockNotifier;
    use rust_decimal_macros::dec;

    fn amount(v: rust_decimal::Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    fn test_gate() -> (TwoFactorGate, Arc<AuditLog>, Arc<MockNotifier>) {
        let audit = Arc::new(AuditLog::in_memory());
        let notifier = Arc::new(MockNotifier::new());
        let gate = TwoFactorGate::new(
            TwoFactorConfig::default(),
            OtpStore::in_memory().unwrap(),
            DeviceStore::in_memory().unwrap(),
            Arc::clone(&audit),
            notifier.clone() as Arc<dyn Notifier>,
        );
        (gate, audit, notifier)
    }

    fn ctx() -> PaymentContext {
        PaymentContext {
            device_id: Some("dev-1".to_string()),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
        }
    }

    /// Pull the delivered plaintext code out of the mock notifier
    fn delivered_code(notifier: &MockNotifier) -> String {
        let sent = notifier.sent();
        let last = sent.last().expect("no notification sent");
        last.data["code"].as_str().expect("no code in payload").to_string()
    }

    #[tokio::test]
    async fn test_send_and_verify_roundtrip() {
        let (gate, audit, notifier) = test_gate();
        let now = Utc::now();

        let issue = gate
            .send_code_at("user-1", "ms-1", amount(dec!(150)), "user@example.com", &ctx(), now)
            .await
            .unwrap();
        assert!(issue.otp_id.starts_with("OTP-"));
        assert_eq!(issue.expires_at, now + chrono::Duration::minutes(10));

        let code = delivered_code(&notifier);
        assert_eq!(code.len(), 6);

        assert!(gate.verify_code_at("user-1", "ms-1", &code, now));
        assert_eq!(
            audit.count_since(EventType::TwoFactorSuccess, now - chrono::Duration::hours(1)),
            1
        );
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let (gate, _, notifier) = test_gate();
        let now = Utc::now();

        gate.send_code_at("user-1", "ms-1", amount(dec!(150)), "user@example.com", &ctx(), now)
            .await
            .unwrap();
        let code = delivered_code(&notifier);

        assert!(gate.verify_code_at("user-1", "ms-1", &code, now));
        // Verifying the same valid code twice: the second always fails
        assert!(!gate.verify_code_at("user-1", "ms-1", &code, now));
    }

    #[tokio::test]
    async fn test_expired_code_rejected() {
        let (gate, _, notifier) = test_gate();
        let now = Utc::now();

        gate.send_code_at("user-1", "ms-1", amount(dec!(150)), "user@example.com", &ctx(), now)
            .await
            .unwrap();
        let code = delivered_code(&notifier);

        // Correct code, but 11 minutes later
        let late = now + chrono::Duration::minutes(11);
        assert!(!gate.verify_code_at("user-1", "ms-1", &code, late));
    }

    #[tokio::test]
    async fn test_wrong_code_burns_attempts() {
        let (gate, _, notifier) = test_gate();
        let now = Utc::now();

        gate.send_code_at("user-1", "ms-1", amount(dec!(150)), "user@example.com", &ctx(), now)
            .await
            .unwrap();
        let code = delivered_code(&notifier);
        let wrong = if code == "000000" { "000001" } else { "000000" };

        for _ in 0..3 {
            assert!(!gate.verify_code_at("user-1", "ms-1", wrong, now));
        }
        // Per-code attempt cap reached: even the right code is refused
        assert!(!gate.verify_code_at("user-1", "ms-1", &code, now));
    }

    #[tokio::test]
    async fn test_rate_limit_fails_closed() {
        let (gate, _, notifier) = test_gate();
        let now = Utc::now();

        gate.send_code_at("user-1", "ms-1", amount(dec!(150)), "user@example.com", &ctx(), now)
            .await
            .unwrap();
        let code = delivered_code(&notifier);
        let wrong = if code == "000000" { "000001" } else { "000000" };

        // 5 attempts allowed per 15 minutes; burn them all
        for _ in 0..5 {
            gate.verify_code_at("user-1", "ms-2", wrong, now);
        }
        // Sixth attempt is denied outright, even with the correct code
        assert!(!gate.verify_code_at("user-1", "ms-1", &code, now));
    }

    #[tokio::test]
    async fn test_delivery_failure_fails_closed() {
        let (gate, _, notifier) = test_gate();
        notifier.fail_deliveries(true);

        let result = gate
            .send_code("user-1", "ms-1", amount(dec!(150)), "user@example.com", &ctx())
            .await;
        assert!(matches!(result, Err(TwoFactorError::Delivery(_))));

        // No deliverable code means nothing verifies
        assert!(!gate.verify_code("user-1", "ms-1", "123456"));
    }

    #[tokio::test]
    async fn test_code_bound_to_milestone() {
        let (gate, _, notifier) = test_gate();
        let now = Utc::now();

        gate.send_code_at("user-1", "ms-1", amount(dec!(150)), "user@example.com", &ctx(), now)
            .await
            .unwrap();
        let code = delivered_code(&notifier);

        assert!(!gate.verify_code_at("user-1", "ms-2", &code, now));
        assert!(gate.verify_code_at("user-1", "ms-1", &code, now));
    }

    #[test]
    fn test_decision_tracking_events() {
        let (gate, audit, _) = test_gate();
        let now = Utc::now();
        let since = now - chrono::Duration::hours(1);

        // First payment: required -> 2fa_sent event
        let decision = gate.requires_2fa_at(
            "user-1",
            &SecuritySettings::default(),
            amount(dec!(50)),
            &ctx(),
            &ActivitySnapshot::default(),
            true,
            now,
        );
        assert!(decision.required);
        assert_eq!(audit.count_since(EventType::TwoFactorSent, since), 1);

        // Known fingerprint + under threshold: bypassed
        gate.note_device_seen("user-1", &ctx(), now);
        let decision = gate.requires_2fa_at(
            "user-1",
            &SecuritySettings::default(),
            amount(dec!(50)),
            &ctx(),
            &ActivitySnapshot {
                payments_today: 1,
                recent_average: Some(amount(dec!(60))),
            },
            false,
            now,
        );
        assert!(!decision.required);
        assert_eq!(audit.count_since(EventType::TwoFactorBypassed, since), 1);
    }

    #[test]
    fn test_trusted_device_bypass_via_gate() {
        let (gate, _, _) = test_gate();
        let now = Utc::now();
        let context = ctx();

        gate.note_device_seen("user-1", &context, now);
        gate.trust_device_at("user-1", "dev-1", &context, now).unwrap();

        let decision = gate.requires_2fa_at(
            "user-1",
            &SecuritySettings::default(),
            amount(dec!(50)),
            &context,
            &ActivitySnapshot {
                payments_today: 1,
                recent_average: Some(amount(dec!(60))),
            },
            false,
            now,
        );
        assert!(!decision.required);
        assert_eq!(decision.reason, crate::policy::DecisionReason::TrustedDevice);
    }
}
