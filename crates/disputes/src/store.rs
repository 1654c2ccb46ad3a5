//! SQLite storage for disputes and payout freeze flags
//!
//! Opening a dispute inserts the record and sets the freeze flag in one
//! transaction; resolution claims the dispute with a guarded UPDATE so
//! two concurrent resolutions cannot both proceed to a refund.

use chrono::{DateTime, Utc};
use paygate_core::Amount;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::dispute::{Dispute, DisputeStatus};
use crate::error::DisputeError;

/// SQLite storage for the dispute domain
pub struct DisputeStore {
    conn: Mutex<Connection>,
}

impl DisputeStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DisputeError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, DisputeError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_schema(&self) -> Result<(), DisputeError> {
        let conn = self.conn();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS disputes (
                id TEXT PRIMARY KEY,
                payment_id TEXT NOT NULL,
                contract_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                freelancer_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                reason TEXT NOT NULL,
                status TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                resolved_at TEXT,
                resolution TEXT,
                refund_amount TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_disputes_payment ON disputes(payment_id, status)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS payout_freezes (
                payment_id TEXT PRIMARY KEY,
                frozen INTEGER NOT NULL,
                frozen_at TEXT,
                released_at TEXT
            )",
            [],
        )?;
        Ok(())
    }

    /// Insert the dispute and set the payout freeze in one transaction
    pub fn open_with_freeze(&self, dispute: &Dispute) -> Result<(), DisputeError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO disputes
             (id, payment_id, contract_id, client_id, freelancer_id, amount, reason,
              status, opened_at, resolved_at, resolution, refund_amount)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, NULL, NULL)",
            params![
                dispute.id,
                dispute.payment_id,
                dispute.contract_id,
                dispute.client_id,
                dispute.freelancer_id,
                dispute.amount.value().to_string(),
                dispute.reason,
                dispute.status.as_str(),
                dispute.opened_at.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO payout_freezes (payment_id, frozen, frozen_at, released_at)
             VALUES (?1, 1, ?2, NULL)",
            params![dispute.payment_id, dispute.opened_at.to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Dispute, DisputeError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_DISPUTE))?;
        stmt.query_row(params![id], row_to_dispute)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    DisputeError::InvalidState(format!("dispute {} not found", id))
                }
                other => DisputeError::Database(other),
            })?
    }

    /// An open or investigating dispute for a payment, if any
    pub fn find_actionable_by_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<Dispute>, DisputeError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE payment_id = ?1 AND status IN ('open', 'investigating') LIMIT 1",
            SELECT_DISPUTE
        ))?;
        let mut rows = stmt.query_map(params![payment_id], row_to_dispute)?;
        match rows.next() {
            Some(row) => Ok(Some(row??)),
            None => Ok(None),
        }
    }

    /// Atomically claim an actionable dispute for resolution.
    ///
    /// Returns false when the dispute was already resolved or closed -
    /// the guard that makes resolution (and its refund) run-once.
    pub fn claim_resolution(
        &self,
        id: &str,
        resolution: &str,
        refund_amount: Option<Amount>,
        now: DateTime<Utc>,
    ) -> Result<bool, DisputeError> {
        let rows = self.conn().execute(
            "UPDATE disputes
             SET status = 'resolved', resolved_at = ?2, resolution = ?3, refund_amount = ?4
             WHERE id = ?1 AND status IN ('open', 'investigating')",
            params![
                id,
                now.to_rfc3339(),
                resolution,
                refund_amount.map(|a| a.value().to_string()),
            ],
        )?;
        Ok(rows == 1)
    }

    /// Release the payout freeze for a payment
    pub fn release_freeze(&self, payment_id: &str, now: DateTime<Utc>) -> Result<(), DisputeError> {
        self.conn().execute(
            "UPDATE payout_freezes SET frozen = 0, released_at = ?2 WHERE payment_id = ?1",
            params![payment_id, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Whether the payout for a payment is currently frozen
    pub fn is_frozen(&self, payment_id: &str) -> Result<bool, DisputeError> {
        let frozen: Option<i64> = self
            .conn()
            .query_row(
                "SELECT frozen FROM payout_freezes WHERE payment_id = ?1",
                params![payment_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(frozen == Some(1))
    }

    /// Disputes opened since a cutoff (monitoring)
    pub fn count_opened_since(&self, since: DateTime<Utc>) -> Result<u32, DisputeError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM disputes WHERE opened_at >= ?1",
            params![since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }
}

const SELECT_DISPUTE: &str = "SELECT id, payment_id, contract_id, client_id, freelancer_id, amount, reason,
        status, opened_at, resolved_at, resolution, refund_amount
 FROM disputes";

fn parse_amount(s: &str) -> Result<Amount, DisputeError> {
    let value = s
        .parse()
        .map_err(|_| DisputeError::Corrupt(format!("amount '{}'", s)))?;
    Amount::new(value).map_err(|e| DisputeError::Corrupt(e.to_string()))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DisputeError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| DisputeError::Corrupt(format!("timestamp '{}'", s)))
}

fn row_to_dispute(row: &Row<'_>) -> rusqlite::Result<Result<Dispute, DisputeError>> {
    let amount: String = row.get(5)?;
    let status: String = row.get(7)?;
    let opened_at: String = row.get(8)?;
    let resolved_at: Option<String> = row.get(9)?;
    let refund_amount: Option<String> = row.get(11)?;

    let build = || -> Result<Dispute, DisputeError> {
        Ok(Dispute {
            id: row.get(0)?,
            payment_id: row.get(1)?,
            contract_id: row.get(2)?,
            client_id: row.get(3)?,
            freelancer_id: row.get(4)?,
            amount: parse_amount(&amount)?,
            reason: row.get(6)?,
            status: DisputeStatus::from_str(&status)
                .ok_or_else(|| DisputeError::Corrupt(format!("status '{}'", status)))?,
            opened_at: parse_timestamp(&opened_at)?,
            resolved_at: resolved_at.as_deref().map(parse_timestamp).transpose()?,
            resolution: row.get(10)?,
            refund_amount: refund_amount.as_deref().map(parse_amount).transpose()?,
        })
    };
    Ok(build())
}
