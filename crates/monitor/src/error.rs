//! Monitoring errors

use paygate_audit::AuditError;
use paygate_charges::ChargeStoreError;
use paygate_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Charge store error: {0}")]
    ChargeStore(#[from] ChargeStoreError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}
