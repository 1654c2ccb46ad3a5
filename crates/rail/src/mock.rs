//! Mock processor and notifiers for testing
//!
//! `MockRail` settles every charge with a synthetic id unless scripted to
//! fail; `MockNotifier` records deliveries for assertions; `LogNotifier`
//! writes to the tracing log and is the local/non-production fallback
//! delivery path.

use async_trait::async_trait;
use paygate_core::Amount;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::info;

use crate::error::{NotifyError, RailError};
use crate::notify::{Notification, Notifier};
use crate::processor::{ChargeRequest, PaymentRail, RailReceipt, RefundReceipt};

/// Mock payment processor
///
/// Records every request and can be scripted to fail with a specific
/// error until cleared.
pub struct MockRail {
    charges: RwLock<Vec<ChargeRequest>>,
    refunds: RwLock<Vec<(String, Amount)>>,
    fail_with: RwLock<Option<RailError>>,
    counter: AtomicU64,
}

impl MockRail {
    pub fn new() -> Self {
        Self {
            charges: RwLock::new(Vec::new()),
            refunds: RwLock::new(Vec::new()),
            fail_with: RwLock::new(None),
            counter: AtomicU64::new(0),
        }
    }

    /// Make every subsequent charge/refund fail with the given error
    pub fn fail_with(&self, error: RailError) {
        *self.fail_with.write().unwrap_or_else(|e| e.into_inner()) = Some(error);
    }

    /// Clear a scripted failure
    pub fn succeed(&self) {
        *self.fail_with.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Number of charge requests that reached the processor
    pub fn charge_count(&self) -> usize {
        self.charges.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of refund requests that reached the processor
    pub fn refund_count(&self) -> usize {
        self.refunds.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn scripted_failure(&self) -> Option<RailError> {
        self.fail_with
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MockRail {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentRail for MockRail {
    async fn charge(&self, request: &ChargeRequest) -> Result<RailReceipt, RailError> {
        self.charges
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if let Some(error) = self.scripted_failure() {
            return Err(error);
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RailReceipt {
            charge_id: format!("rail_{:08}", n),
            settled_amount: request.amount,
        })
    }

    async fn refund(&self, charge_id: &str, amount: Amount) -> Result<RefundReceipt, RailError> {
        if let Some(error) = self.scripted_failure() {
            return Err(error);
        }

        self.refunds
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((charge_id.to_string(), amount));

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RefundReceipt {
            refund_id: format!("refund_{:08}", n),
            amount,
        })
    }
}

/// Notifier that records deliveries for test assertions
pub struct MockNotifier {
    sent: RwLock<Vec<Notification>>,
    failing: RwLock<bool>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            sent: RwLock::new(Vec::new()),
            failing: RwLock::new(false),
        }
    }

    /// Make every subsequent delivery fail
    pub fn fail_deliveries(&self, failing: bool) {
        *self.failing.write().unwrap_or_else(|e| e.into_inner()) = failing;
    }

    /// Snapshot of everything delivered so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        if *self.failing.read().unwrap_or_else(|e| e.into_inner()) {
            return Err(NotifyError::Delivery("mock channel down".to_string()));
        }
        self.sent
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

/// Notifier that writes to the tracing log instead of a real channel.
///
/// This is the local fallback path: template data (including verification
/// codes) lands in the process log, so it must never be wired up in
/// production.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            recipient = %notification.recipient,
            template = ?notification.template,
            data = %notification.data,
            "notification (log fallback)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationTemplate;
    use paygate_core::PaymentMethod;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn request(amount: rust_decimal::Decimal) -> ChargeRequest {
        ChargeRequest {
            authorization_ref: "pm_123".to_string(),
            amount: Amount::new(amount).unwrap(),
            method: PaymentMethod::Card,
            reference: "CHG-TEST".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_rail_settles() {
        let rail = MockRail::new();
        let receipt = rail.charge(&request(dec!(1500))).await.unwrap();

        assert!(receipt.charge_id.starts_with("rail_"));
        assert_eq!(receipt.settled_amount.value(), dec!(1500));
        assert_eq!(rail.charge_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_rail_scripted_failure() {
        let rail = MockRail::new();
        rail.fail_with(RailError::Declined("card declined".to_string()));

        let result = rail.charge(&request(dec!(100))).await;
        assert!(matches!(result, Err(RailError::Declined(_))));
        // The request still reached the processor
        assert_eq!(rail.charge_count(), 1);

        rail.succeed();
        assert!(rail.charge(&request(dec!(100))).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_rail_refund() {
        let rail = MockRail::new();
        let receipt = rail.charge(&request(dec!(1500))).await.unwrap();

        let refund = rail
            .refund(&receipt.charge_id, Amount::new(dec!(750)).unwrap())
            .await
            .unwrap();
        assert_eq!(refund.amount.value(), dec!(750));
        assert_eq!(rail.refund_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_notifier_records() {
        let notifier = MockNotifier::new();
        let notification = Notification::new(
            "client@example.com",
            NotificationTemplate::PaymentReceipt,
            json!({ "amount": "1500" }),
        );

        notifier.deliver(&notification).await.unwrap();
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "client@example.com");
    }

    #[tokio::test]
    async fn test_mock_notifier_failure() {
        let notifier = MockNotifier::new();
        notifier.fail_deliveries(true);

        let notification = Notification::new(
            "client@example.com",
            NotificationTemplate::PaymentFailed,
            json!({}),
        );
        assert!(notifier.deliver(&notification).await.is_err());
        assert_eq!(notifier.sent_count(), 0);
    }

    #[test]
    fn test_rail_error_categories() {
        assert_eq!(RailError::MethodExpired.category(), "expired_method");
        assert!(RailError::Timeout.is_transient());
        assert!(!RailError::InsufficientFunds.is_transient());
    }
}
