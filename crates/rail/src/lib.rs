//! PayGate external collaborators
//!
//! The platform treats the payment processor and the notification channel
//! as opaque external services behind async traits. Production deployments
//! plug in real integrations; tests and the sandbox CLI use the mock
//! implementations in this crate.

pub mod error;
pub mod mock;
pub mod notify;
pub mod processor;

pub use error::{NotifyError, RailError};
pub use mock::{LogNotifier, MockNotifier, MockRail};
pub use notify::{Notification, NotificationTemplate, Notifier};
pub use processor::{ChargeRequest, PaymentRail, RailReceipt, RefundReceipt};
