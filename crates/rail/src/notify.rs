//! Notification channel contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NotifyError;

/// Templates the platform sends. Rendering is the channel's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    PaymentReceipt,
    PaymentFailed,
    VerificationCode,
    AuthorizationRevoked,
    AuthorizationExpiring,
    AuthorizationExpired,
    DisputeOpened,
    DisputeResolved,
    UsageLimitWarning,
    SecurityAlert,
}

/// One outbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Channel-level recipient (email address, phone, user handle)
    pub recipient: String,
    pub template: NotificationTemplate,
    /// Template data payload
    pub data: Value,
}

impl Notification {
    pub fn new(recipient: impl Into<String>, template: NotificationTemplate, data: Value) -> Self {
        Self {
            recipient: recipient.into(),
            template,
            data,
        }
    }
}

/// Notification channel seam. Delivery is best-effort; failures are
/// logged by callers and never block the core state machine.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}
