//! PayGate RPC - wires the platform together
//!
//! `PlatformContext` owns every component and exposes the operations an
//! API layer or the CLI calls: authorization lifecycle, milestone
//! approval with its risk-gated charge, OTP issue/verify, batch
//! approval, disputes, compliance reporting, and the monitoring sweeps.

pub mod commands;
pub mod context;

pub use context::{BatchItemResult, ComplianceReport, PlatformContext, PlatformError};
