//! PaymentMethod - Type-safe payment rail selector
//!
//! A client authorizes exactly one of these per contract; the charge
//! executor passes it through to the external rail unchanged.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// The payment rail a standing authorization is bound to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    /// Card-on-file charge (processor mandate)
    Card,
    /// Bank transfer / direct debit
    BankTransfer,
    /// Stablecoin wallet transfer
    Stablecoin,
}
