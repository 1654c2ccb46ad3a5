//! Append-only JSONL audit log
//!
//! Each line is a JSON-serialized `AuditEvent`. The file is append-only
//! and should never be modified. An in-memory index mirrors the file so
//! trails and monitoring queries do not re-read the log on every call.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use tracing::error;

use crate::error::AuditError;
use crate::event::{AuditEvent, EventDraft, EventType, Severity};
use crate::hash::{compute_event_hash, verify_event_hash};

/// Filters for audit-trail queries
#[derive(Debug, Clone, Default)]
pub struct TrailFilter {
    pub event_type: Option<EventType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Aggregates for compliance reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplianceMetrics {
    pub total_events: usize,
    pub authorization_events: usize,
    pub payment_events: usize,
    pub dispute_events: usize,
    pub failed_payments: usize,
    pub revoked_authorizations: usize,
    pub critical_issues: usize,
}

/// Append-only audit log with an in-memory query index
pub struct AuditLog {
    path: Option<PathBuf>,
    writer: Mutex<Option<File>>,
    index: RwLock<Vec<AuditEvent>>,
}

impl AuditLog {
    /// Open (or create) a log at the given path, loading existing entries
    /// into the index.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut index = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let event: AuditEvent = serde_json::from_str(&line)?;
                index.push(event);
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path: Some(path),
            writer: Mutex::new(Some(file)),
            index: RwLock::new(index),
        })
    }

    /// Create an in-memory log (for testing and ephemeral contexts)
    pub fn in_memory() -> Self {
        Self {
            path: None,
            writer: Mutex::new(None),
            index: RwLock::new(Vec::new()),
        }
    }

    fn writer(&self) -> MutexGuard<'_, Option<File>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an event, assigning its id, timestamp, and integrity hash.
    /// Returns the audit id.
    pub fn append(&self, draft: EventDraft) -> Result<String, AuditError> {
        self.append_at(draft, Utc::now())
    }

    /// Append with an explicit timestamp (for replay and tests)
    pub fn append_at(&self, draft: EventDraft, now: DateTime<Utc>) -> Result<String, AuditError> {
        let id = format!("AUD-{}", &uuid::Uuid::new_v4().to_string()[..8].to_uppercase());

        let mut event = AuditEvent {
            id: id.clone(),
            user_id: draft.user_id,
            contract_id: draft.contract_id,
            entity_id: draft.entity_id,
            event_type: draft.event_type,
            action: draft.action,
            details: draft.details,
            ip_address: draft.ip_address,
            user_agent: draft.user_agent,
            severity: draft.severity,
            compliance_relevant: draft.compliance_relevant,
            retention_years: draft.retention_years,
            timestamp: now,
            hash: String::new(),
        };
        event.hash = compute_event_hash(&event);

        if event.severity >= Severity::Error {
            error!(
                audit_id = %event.id,
                event_type = %event.event_type,
                severity = %event.severity,
                "{}",
                event.action
            );
        }

        {
            let mut writer = self.writer();
            if let Some(ref mut file) = *writer {
                let json = serde_json::to_string(&event)?;
                writeln!(file, "{}", json)?;
                file.flush()?;
            }
        }

        self.index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);

        Ok(id)
    }

    /// Fetch a single event by audit id
    pub fn get(&self, audit_id: &str) -> Option<AuditEvent> {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| e.id == audit_id)
            .cloned()
    }

    /// Recompute the integrity hash for an entry and compare
    pub fn verify_integrity(&self, audit_id: &str) -> Result<bool, AuditError> {
        let event = self
            .get(audit_id)
            .ok_or_else(|| AuditError::NotFound(audit_id.to_string()))?;
        Ok(verify_event_hash(&event))
    }

    /// Recompute every entry's hash. Returns the number of entries
    /// verified, or the first mismatch as an integrity error.
    pub fn verify_all(&self) -> Result<usize, AuditError> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        for event in index.iter() {
            if !verify_event_hash(event) {
                return Err(AuditError::Integrity(event.id.clone()));
            }
        }
        Ok(index.len())
    }

    /// Audit trail for an entity, newest first
    pub fn trail(&self, entity_id: &str, filter: &TrailFilter) -> Vec<AuditEvent> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        let mut events: Vec<AuditEvent> = index
            .iter()
            .filter(|e| e.entity_id.as_deref() == Some(entity_id))
            .filter(|e| filter.event_type.map_or(true, |t| e.event_type == t))
            .filter(|e| filter.from.map_or(true, |from| e.timestamp >= from))
            .filter(|e| filter.to.map_or(true, |to| e.timestamp <= to))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        events
    }

    /// All events matching a predicate (used by the monitoring detectors)
    pub fn events_matching<F>(&self, predicate: F) -> Vec<AuditEvent>
    where
        F: Fn(&AuditEvent) -> bool,
    {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    /// Count events of a type since a cutoff
    pub fn count_since(&self, event_type: EventType, since: DateTime<Utc>) -> usize {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.event_type == event_type && e.timestamp >= since)
            .count()
    }

    /// Identify entries past their retention window. Returns the count;
    /// purging is a separate operator action on the underlying file.
    pub fn cleanup_old_logs(&self, now: DateTime<Utc>) -> usize {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.retention_deadline() < now)
            .count()
    }

    /// Aggregate compliance metrics for a reporting period
    pub fn compliance_metrics(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> ComplianceMetrics {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        let mut metrics = ComplianceMetrics::default();

        for event in index.iter().filter(|e| e.timestamp >= from && e.timestamp <= to) {
            metrics.total_events += 1;
            match event.event_type {
                EventType::AuthorizationCreated
                | EventType::AuthorizationRevoked
                | EventType::AuthorizationExpired
                | EventType::AuthorizationSuspended => metrics.authorization_events += 1,
                EventType::PaymentAttempt
                | EventType::PaymentSuccess
                | EventType::PaymentFailed
                | EventType::PaymentRefunded => metrics.payment_events += 1,
                EventType::DisputeOpened | EventType::DisputeResolved => {
                    metrics.dispute_events += 1
                }
                _ => {}
            }
            if event.event_type == EventType::PaymentFailed {
                metrics.failed_payments += 1;
            }
            if event.event_type == EventType::AuthorizationRevoked {
                metrics.revoked_authorizations += 1;
            }
            if event.severity >= Severity::Error {
                metrics.critical_issues += 1;
            }
        }

        metrics
    }

    pub fn len(&self) -> usize {
        self.index.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
