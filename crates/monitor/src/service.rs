//! The monitoring service
//!
//! Detectors read the audit trail and charge history; sweeps read ledger
//! state. Firing an alert persists an audit record, notifies by
//! severity (immediate for critical, one batched digest otherwise), and
//! for critical severity suspends the offending authorization - an
//! idempotent, logged remediation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

use paygate_audit::{AuditLog, EventDraft, EventType, Severity};
use paygate_charges::ChargeStore;
use paygate_ledger::AuthorizationLedger;
use paygate_rail::{Notification, NotificationTemplate, Notifier};

use crate::alert::Alert;
use crate::config::{MonitorConfig, RuleConfig, RuleKind};
use crate::error::MonitorError;

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpirySweepReport {
    /// Authorizations transitioned to expired
    pub expired: usize,
    /// Expiring-soon warnings sent
    pub warned: usize,
}

/// Periodic anomaly detection and remediation over platform state
pub struct MonitoringService {
    config: MonitorConfig,
    ledger: Arc<AuthorizationLedger>,
    charges: Arc<ChargeStore>,
    audit: Arc<AuditLog>,
    notifier: Arc<dyn Notifier>,
    /// rule+subject -> time before which it may not fire again
    cooldowns: Mutex<HashMap<String, DateTime<Utc>>>,
    alerts: RwLock<Vec<Alert>>,
}

impl MonitoringService {
    pub fn new(
        config: MonitorConfig,
        ledger: Arc<AuthorizationLedger>,
        charges: Arc<ChargeStore>,
        audit: Arc<AuditLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            ledger,
            charges,
            audit,
            notifier,
            cooldowns: Mutex::new(HashMap::new()),
            alerts: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Alerts fired so far in this process
    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.alerts.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // === Near-real-time rule evaluation (5-minute schedule) ===

    pub async fn evaluate_rules(&self) -> Result<Vec<Alert>, MonitorError> {
        self.evaluate_rules_at(Utc::now()).await
    }

    /// Run every enabled rule. A detector that errors is logged and
    /// skipped - monitoring degrades to "no alert fired", it never
    /// propagates into the payment path.
    pub async fn evaluate_rules_at(&self, now: DateTime<Utc>) -> Result<Vec<Alert>, MonitorError> {
        let mut candidates: Vec<Alert> = Vec::new();

        for rule in self.config.rules.clone() {
            if !rule.enabled {
                continue;
            }
            let found = match self.run_detector(&rule, now) {
                Ok(found) => found,
                Err(e) => {
                    warn!(rule = rule.kind.as_str(), error = %e, "detector failed");
                    Vec::new()
                }
            };
            candidates.extend(found);
        }

        let mut fired = Vec::new();
        let mut digest = Vec::new();
        for alert in candidates {
            let rule = match self.config.rule(alert.rule) {
                Some(rule) => rule.clone(),
                None => continue,
            };
            if !self.try_fire(&alert, rule.cooldown_minutes, now) {
                continue;
            }
            if alert.severity >= Severity::Critical {
                self.deliver_alert(&alert).await;
                self.auto_remediate(&alert).await;
            } else {
                digest.push(alert.clone());
            }
            fired.push(alert);
        }

        if !digest.is_empty() {
            self.deliver_digest(&digest).await;
        }

        Ok(fired)
    }

    fn run_detector(&self, rule: &RuleConfig, now: DateTime<Utc>) -> Result<Vec<Alert>, MonitorError> {
        let since = now - chrono::Duration::minutes(rule.window_minutes);
        match rule.kind {
            RuleKind::FailedTwoFactorBurst => self.detect_failed_2fa_burst(rule, since, now),
            RuleKind::PaymentVelocity => self.detect_payment_velocity(rule, since, now),
            RuleKind::HighValueAuthorization => self.detect_high_value_authorizations(rule, now),
            RuleKind::RepeatedPaymentFailures => self.detect_repeated_failures(rule, since, now),
            RuleKind::RevocationSpike => self.detect_revocation_spike(rule, since, now),
            RuleKind::GeographicAnomaly => self.detect_geographic_anomalies(rule, since, now),
            RuleKind::HighRiskScore => self.detect_high_risk(rule, since, now),
            // Sweep-driven kinds have their own schedules
            RuleKind::UsageLimit
            | RuleKind::RailFailurePattern
            | RuleKind::AuthorizationExpiring => Ok(Vec::new()),
        }
    }

    fn detect_failed_2fa_burst(
        &self,
        rule: &RuleConfig,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, MonitorError> {
        let events = self
            .audit
            .events_matching(|e| e.event_type == EventType::TwoFactorFailed && e.timestamp >= since);

        let mut per_user: HashMap<String, u32> = HashMap::new();
        for event in events {
            *per_user.entry(event.user_id).or_insert(0) += 1;
        }

        Ok(per_user
            .into_iter()
            .filter(|(_, count)| *count >= rule.threshold)
            .map(|(user, count)| {
                Alert::fire(
                    rule.kind,
                    rule.severity,
                    "Failed verification burst",
                    format!(
                        "{} failed verification attempts in the last {} minutes",
                        count, rule.window_minutes
                    ),
                    now,
                )
                .for_user(user)
            })
            .collect())
    }

    fn detect_payment_velocity(
        &self,
        rule: &RuleConfig,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, MonitorError> {
        let mut alerts = Vec::new();
        for client in self.charges.clients_with_attempts_since(since)? {
            let count = self.charges.count_attempts_since(&client, since)?;
            if count >= rule.threshold {
                alerts.push(
                    Alert::fire(
                        rule.kind,
                        rule.severity,
                        "Payment velocity abuse",
                        format!(
                            "{} charge attempts in the last {} minutes",
                            count, rule.window_minutes
                        ),
                        now,
                    )
                    .for_user(client),
                );
            }
        }
        Ok(alerts)
    }

    fn detect_high_value_authorizations(
        &self,
        rule: &RuleConfig,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, MonitorError> {
        let floor = Decimal::from(rule.threshold);
        Ok(self
            .ledger
            .list_active()?
            .into_iter()
            .filter(|auth| auth.total_authorized.value() >= floor)
            .map(|auth| {
                Alert::fire(
                    rule.kind,
                    rule.severity,
                    "High-value authorization",
                    format!(
                        "authorization {} consents to a total of {}",
                        auth.id, auth.total_authorized
                    ),
                    now,
                )
                .for_user(auth.client_id)
                .for_contract(auth.contract_id)
            })
            .collect())
    }

    fn detect_repeated_failures(
        &self,
        rule: &RuleConfig,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, MonitorError> {
        let mut alerts = Vec::new();
        for contract in self.charges.contracts_with_failures_since(since)? {
            let count = self
                .charges
                .count_failed_for_contract_since(&contract, since)?;
            if count >= rule.threshold {
                alerts.push(
                    Alert::fire(
                        rule.kind,
                        rule.severity,
                        "Repeated payment failures",
                        format!(
                            "{} failed charges in the last {} minutes",
                            count, rule.window_minutes
                        ),
                        now,
                    )
                    .for_contract(contract),
                );
            }
        }
        Ok(alerts)
    }

    fn detect_revocation_spike(
        &self,
        rule: &RuleConfig,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, MonitorError> {
        let count = self
            .audit
            .count_since(EventType::AuthorizationRevoked, since);
        if count >= rule.threshold as usize {
            Ok(vec![Alert::fire(
                rule.kind,
                rule.severity,
                "Authorization revocation spike",
                format!(
                    "{} revocations platform-wide in the last {} minutes",
                    count, rule.window_minutes
                ),
                now,
            )])
        } else {
            Ok(Vec::new())
        }
    }

    fn detect_geographic_anomalies(
        &self,
        rule: &RuleConfig,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, MonitorError> {
        let events = self.audit.events_matching(|e| {
            e.event_type == EventType::PaymentAttempt
                && e.timestamp >= since
                && e.ip_address.is_some()
        });

        let mut per_user: HashMap<String, HashSet<String>> = HashMap::new();
        for event in events {
            if let Some(ip) = event.ip_address {
                per_user.entry(event.user_id).or_default().insert(ip);
            }
        }

        Ok(per_user
            .into_iter()
            .filter(|(_, ips)| ips.len() > rule.threshold as usize)
            .map(|(user, ips)| {
                Alert::fire(
                    rule.kind,
                    rule.severity,
                    "Geographic anomaly",
                    format!(
                        "payments from {} distinct addresses in the last {} minutes",
                        ips.len(),
                        rule.window_minutes
                    ),
                    now,
                )
                .for_user(user)
            })
            .collect())
    }

    fn detect_high_risk(
        &self,
        rule: &RuleConfig,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, MonitorError> {
        let events = self
            .audit
            .events_matching(|e| e.event_type == EventType::RiskFlagged && e.timestamp >= since);

        Ok(events
            .into_iter()
            .map(|event| {
                let mut alert = Alert::fire(
                    rule.kind,
                    rule.severity,
                    "High risk transaction",
                    format!("risk scorer flagged a transaction: {}", event.action),
                    now,
                )
                .for_user(event.user_id);
                if let Some(contract) = event.contract_id {
                    alert = alert.for_contract(contract);
                }
                alert
            })
            .collect())
    }

    // === Scheduled sweeps ===

    /// Daily: expire authorizations whose payment method lapsed, warn on
    /// those expiring soon.
    pub async fn run_expiry_sweep(&self) -> Result<ExpirySweepReport, MonitorError> {
        self.run_expiry_sweep_at(Utc::now()).await
    }

    pub async fn run_expiry_sweep_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ExpirySweepReport, MonitorError> {
        let mut report = ExpirySweepReport::default();

        for auth in self.ledger.list_expired_as_of(now)? {
            if let Some(expired) = self.ledger.mark_expired(&auth.id, now)? {
                report.expired += 1;
                self.notify(Notification::new(
                    &expired.client_id,
                    NotificationTemplate::AuthorizationExpired,
                    json!({
                        "authorization_id": expired.id,
                        "contract_id": expired.contract_id,
                        "expired_at": expired.expires_at,
                    }),
                ))
                .await;
            }
        }

        for auth in self
            .ledger
            .list_expiring_within(now, self.config.expiry_warning_days)?
        {
            let alert = Alert::fire(
                RuleKind::AuthorizationExpiring,
                Severity::Info,
                "Payment method expiring soon",
                format!(
                    "authorization {} expires at {}",
                    auth.id,
                    auth.expires_at.map(|t| t.to_rfc3339()).unwrap_or_default()
                ),
                now,
            )
            .for_user(auth.client_id.clone())
            .for_contract(auth.contract_id.clone());

            // Warn once per authorization
            if !self.try_fire(&alert, 0, now) {
                continue;
            }
            report.warned += 1;
            self.notify(Notification::new(
                &auth.client_id,
                NotificationTemplate::AuthorizationExpiring,
                json!({
                    "authorization_id": auth.id,
                    "contract_id": auth.contract_id,
                    "expires_at": auth.expires_at,
                }),
            ))
            .await;
        }

        Ok(report)
    }

    /// Weekly: alert on authorizations nearing their total cap
    pub async fn run_usage_sweep(&self) -> Result<Vec<Alert>, MonitorError> {
        self.run_usage_sweep_at(Utc::now()).await
    }

    pub async fn run_usage_sweep_at(&self, now: DateTime<Utc>) -> Result<Vec<Alert>, MonitorError> {
        let mut fired = Vec::new();
        for auth in self.ledger.list_active()? {
            if auth.usage_ratio() < self.config.usage_alert_ratio {
                continue;
            }
            let alert = Alert::fire(
                RuleKind::UsageLimit,
                Severity::Warning,
                "Authorization usage limit",
                format!(
                    "authorization {} has used {} of {}",
                    auth.id, auth.total_charged, auth.total_authorized
                ),
                now,
            )
            .for_user(auth.client_id.clone())
            .for_contract(auth.contract_id.clone());

            // One warning per sweep interval
            let cooldown = (self.config.usage_sweep_hours * 60) as i64;
            if !self.try_fire(&alert, cooldown, now) {
                continue;
            }
            self.notify(Notification::new(
                &auth.client_id,
                NotificationTemplate::UsageLimitWarning,
                json!({
                    "authorization_id": auth.id,
                    "total_charged": auth.total_charged,
                    "total_authorized": auth.total_authorized,
                }),
            ))
            .await;
            fired.push(alert);
        }
        Ok(fired)
    }

    /// Hourly: check for rail failure patterns
    pub async fn run_rail_health_sweep(&self) -> Result<Option<Alert>, MonitorError> {
        self.run_rail_health_sweep_at(Utc::now()).await
    }

    pub async fn run_rail_health_sweep_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>, MonitorError> {
        let since = now - chrono::Duration::hours(1);
        let failures = self.charges.count_failed_since(since)?;
        if failures < self.config.rail_failure_threshold {
            return Ok(None);
        }

        let alert = Alert::fire(
            RuleKind::RailFailurePattern,
            Severity::Error,
            "Payment rail failure pattern",
            format!("{} failed charges in the last hour", failures),
            now,
        );
        if !self.try_fire(&alert, 60, now) {
            return Ok(None);
        }
        self.deliver_alert(&alert).await;
        Ok(Some(alert))
    }

    /// Run every sweep and the rule evaluation once (CLI / tests)
    pub async fn run_all_at(&self, now: DateTime<Utc>) -> Result<Vec<Alert>, MonitorError> {
        let report = self.run_expiry_sweep_at(now).await?;
        if report.expired > 0 {
            info!(expired = report.expired, "expiry sweep transitioned authorizations");
        }
        let mut alerts = self.run_usage_sweep_at(now).await?;
        if let Some(alert) = self.run_rail_health_sweep_at(now).await? {
            alerts.push(alert);
        }
        alerts.extend(self.evaluate_rules_at(now).await?);
        Ok(alerts)
    }

    /// Spawn the periodic loops. Each loop is failure-isolated: an
    /// erroring pass is logged and the schedule continues.
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let service = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(service.config.expiry_sweep_hours * 3600));
            loop {
                tick.tick().await;
                if let Err(e) = service.run_expiry_sweep().await {
                    error!(error = %e, "expiry sweep failed");
                }
            }
        }));

        let service = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(service.config.usage_sweep_hours * 3600));
            loop {
                tick.tick().await;
                if let Err(e) = service.run_usage_sweep().await {
                    error!(error = %e, "usage sweep failed");
                }
            }
        }));

        let service = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(service.config.rail_sweep_minutes * 60));
            loop {
                tick.tick().await;
                if let Err(e) = service.run_rail_health_sweep().await {
                    error!(error = %e, "rail health sweep failed");
                }
            }
        }));

        let service = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(service.config.rules_sweep_minutes * 60));
            loop {
                tick.tick().await;
                if let Err(e) = service.evaluate_rules().await {
                    error!(error = %e, "rule evaluation failed");
                }
            }
        }));

        handles
    }

    // === Internals ===

    /// Cooldown-gate an alert; on pass, persist it and the audit record.
    /// A zero cooldown means fire once per subject, ever.
    fn try_fire(&self, alert: &Alert, cooldown_minutes: i64, now: DateTime<Utc>) -> bool {
        let subject = alert
            .user_id
            .clone()
            .or_else(|| alert.contract_id.clone())
            .unwrap_or_else(|| "platform".to_string());
        let key = format!("{}:{}", alert.rule.as_str(), subject);

        {
            let mut cooldowns = self.cooldowns.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(until) = cooldowns.get(&key) {
                if *until > now {
                    return false;
                }
            }
            let until = if cooldown_minutes == 0 {
                now + chrono::Duration::days(365 * 100)
            } else {
                now + chrono::Duration::minutes(cooldown_minutes)
            };
            cooldowns.insert(key, until);
        }

        let draft = EventDraft::new(
            EventType::AlertFired,
            alert.user_id.as_deref().unwrap_or("platform"),
            alert.title.clone(),
        )
        .severity(alert.severity)
        .entity(&alert.id)
        .details(json!({
            "rule": alert.rule,
            "description": alert.description,
            "contract_id": alert.contract_id,
        }));
        let draft = match &alert.contract_id {
            Some(contract) => draft.contract(contract),
            None => draft,
        };
        if let Err(e) = self.audit.append_at(draft, now) {
            warn!(error = %e, "failed to persist alert audit record");
        }

        self.alerts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(alert.clone());

        info!(
            rule = alert.rule.as_str(),
            severity = %alert.severity,
            "{}",
            alert.title
        );
        true
    }

    /// Critical remediation: suspend the contract's active authorization
    /// so no further charges go out while a human investigates.
    /// `AuthorizationLedger::suspend` is idempotent, so repeated alerts
    /// converge to one state change.
    async fn auto_remediate(&self, alert: &Alert) {
        let contract = match &alert.contract_id {
            Some(contract) => contract.clone(),
            None => return,
        };
        let auth = match self.ledger.get_active(&contract) {
            Ok(Some(auth)) => auth,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, contract, "auto-remediation lookup failed");
                return;
            }
        };
        match self
            .ledger
            .suspend(&auth.id, &format!("auto-remediation: {}", alert.title))
        {
            Ok(true) => {
                if let Err(e) = self.audit.append(
                    EventDraft::new(
                        EventType::AdminAction,
                        "monitoring",
                        "auto-remediation suspended authorization",
                    )
                    .severity(Severity::Warning)
                    .entity(&auth.id)
                    .contract(&contract)
                    .details(json!({ "alert_id": alert.id, "rule": alert.rule })),
                ) {
                    warn!(error = %e, "failed to log auto-remediation");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, authorization = %auth.id, "auto-remediation failed"),
        }
    }

    async fn deliver_alert(&self, alert: &Alert) {
        self.notify(Notification::new(
            &self.config.alert_recipient,
            NotificationTemplate::SecurityAlert,
            json!({
                "alert_id": alert.id,
                "rule": alert.rule,
                "severity": alert.severity,
                "title": alert.title,
                "description": alert.description,
                "user_id": alert.user_id,
                "contract_id": alert.contract_id,
            }),
        ))
        .await;
    }

    async fn deliver_digest(&self, alerts: &[Alert]) {
        let items: Vec<_> = alerts
            .iter()
            .map(|a| {
                json!({
                    "alert_id": a.id,
                    "rule": a.rule,
                    "severity": a.severity,
                    "title": a.title,
                })
            })
            .collect();
        self.notify(Notification::new(
            &self.config.alert_recipient,
            NotificationTemplate::SecurityAlert,
            json!({ "digest": items }),
        ))
        .await;
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.deliver(&notification).await {
            warn!(error = %e, "alert notification delivery failed");
        }
    }
}
