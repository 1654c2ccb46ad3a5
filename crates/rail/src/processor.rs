//! Payment rail contract
//!
//! The rail is modeled as an opaque synchronous processor behind an async
//! trait: a charge either settles in the reply or fails with a
//! `RailError`. Callers own timeouts and compensation.

use async_trait::async_trait;
use paygate_core::{Amount, PaymentMethod};
use serde::{Deserialize, Serialize};

use crate::error::RailError;

/// A request to capture funds against a standing authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Processor-side reference for the authorized payment method
    pub authorization_ref: String,
    pub amount: Amount,
    pub method: PaymentMethod,
    /// Caller correlation id (charge id), echoed in processor logs
    pub reference: String,
}

/// A settled charge as reported by the processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RailReceipt {
    /// Processor-assigned charge id, used later for refunds
    pub charge_id: String,
    pub settled_amount: Amount,
}

/// A completed refund as reported by the processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub amount: Amount,
}

/// External payment processor seam.
///
/// Implementations must be idempotent per `reference` where the backing
/// processor supports it; the executor additionally guarantees at most one
/// non-failed charge per milestone on its side.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    /// Capture funds. A returned receipt means the charge settled.
    async fn charge(&self, request: &ChargeRequest) -> Result<RailReceipt, RailError>;

    /// Refund a previously settled charge, in full or in part.
    async fn refund(&self, charge_id: &str, amount: Amount) -> Result<RefundReceipt, RailError>;
}
