//! PayGate Monitoring & Alerting
//!
//! Scheduled sweeps over ledger and charge state plus near-real-time
//! alert rules over the audit trail. Every rule carries a severity, a
//! threshold, a time window, and a cooldown; critical alerts can invoke
//! an idempotent auto-remediation hook (suspending the offending
//! authorization).
//!
//! The loop is deliberately isolated from the charge path: detector
//! failures are logged and degrade to "no alert fired", never into a
//! rejected charge.

pub mod alert;
pub mod config;
pub mod error;
pub mod service;

pub use alert::Alert;
pub use config::{MonitorConfig, RuleConfig, RuleKind};
pub use error::MonitorError;
pub use service::{ExpirySweepReport, MonitoringService};
