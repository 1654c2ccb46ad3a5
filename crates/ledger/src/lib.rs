//! PayGate Authorization Ledger
//!
//! A standing authorization is a client's consent for the platform to
//! charge a payment method for one contract, capped per milestone and in
//! total. This crate owns those records and their two hard invariants:
//!
//! - `total_charged` never exceeds `total_authorized`, under any
//!   interleaving of concurrent charges
//! - exactly one active authorization per contract
//!
//! The check-and-increment in [`AuthorizationLedger::record_charge`] runs
//! inside a single store transaction; callers never read-then-write cap
//! state themselves.

pub mod authorization;
pub mod error;
pub mod ledger;
pub mod store;

pub use authorization::{Authorization, AuthorizationStatus, ConsentMetadata, NewAuthorization};
pub use error::LedgerError;
pub use ledger::{AuthorizationLedger, RevokeOutcome};
pub use store::{AuthorizationStore, StoreError};
