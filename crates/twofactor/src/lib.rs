//! PayGate Two-Factor Gate
//!
//! Decides whether a milestone charge must be confirmed with a one-time
//! verification code, and owns the full code lifecycle: generation,
//! hashed storage, delivery, constant-time verification, single-use
//! consumption, per-code attempt caps, and a per-user rate limit.
//!
//! Every decision branch writes a tracking event to the audit log.
//! All failures in this crate fail CLOSED: when the gate cannot prove a
//! charge is safe to skip, verification is required; when it cannot
//! verify a code, the code is invalid.

pub mod config;
pub mod devices;
pub mod error;
pub mod gate;
pub mod otp;
pub mod policy;
pub mod ratelimit;

pub use config::{DeliveryMethod, SecuritySettings, TwoFactorConfig};
pub use devices::{device_fingerprint, DeviceStore};
pub use error::TwoFactorError;
pub use gate::{OtpIssue, TwoFactorGate};
pub use otp::{OtpStore, VerificationCode};
pub use policy::{
    ActivitySnapshot, DecisionReason, PaymentContext, TwoFactorDecision, UnusualActivity,
};
pub use ratelimit::RateLimiter;
