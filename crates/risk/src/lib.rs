//! PayGate Risk Scorer - Pure transaction risk heuristics
//!
//! Scores a transaction context on a 0-10 scale from additive triggers.
//! The scorer has no storage and no side effects; callers feed it a
//! snapshot of what they know about the payment and get back a score
//! plus the list of triggers that fired.
//!
//! A score of [`HIGH_RISK_SCORE`] or above is treated as high risk and
//! surfaces as a critical alert, independent of the two-factor decision.

pub mod score;

pub use score::{score_transaction, RiskAssessment, RiskContext, RiskTrigger, HIGH_RISK_SCORE};
