//! PayGate Charge Executor
//!
//! Turns an approved milestone into a settled charge: capability checks
//! against the active authorization, the adaptive 2FA gate, the atomic
//! ledger increment, the rail call with rollback-on-failure, and the
//! resulting milestone/charge state transitions.
//!
//! Idempotency invariant: at most one non-failed charge per milestone.
//! Re-invoking the executor for an already-paid milestone is rejected
//! before any money moves.

pub mod charge;
pub mod error;
pub mod executor;
pub mod fees;
pub mod milestone;
pub mod store;

pub use charge::{Charge, ChargeStatus, DISPUTE_WINDOW_HOURS};
pub use error::ChargeError;
pub use executor::{ChargeExecutor, ChargeRequestContext, TwoFactorProof};
pub use fees::{FeeBreakdown, FeeSchedule};
pub use milestone::{Milestone, MilestoneStatus};
pub use store::{ChargeStore, ChargeStoreError};
