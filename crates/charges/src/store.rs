//! SQLite storage for milestones and charges

use chrono::{DateTime, Utc};
use paygate_core::{Amount, PaymentMethod};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::charge::{Charge, ChargeStatus};
use crate::fees::FeeBreakdown;
use crate::milestone::{Milestone, MilestoneStatus};

#[derive(Debug, Error)]
pub enum ChargeStoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// SQLite storage for the charge domain
pub struct ChargeStore {
    conn: Mutex<Connection>,
}

impl ChargeStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ChargeStoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, ChargeStoreError> {
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

    fn init_schema(&self) -> Result<(), ChargeStoreError> {
        let conn = self.conn();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS milestones (
                id TEXT PRIMARY KEY,
                contract_id TEXT NOT NULL,
                title TEXT NOT NULL,
                amount TEXT NOT NULL,
                status TEXT NOT NULL,
                payment_released INTEGER NOT NULL DEFAULT 0,
                approved_at TEXT,
                paid_at TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS charges (
                id TEXT PRIMARY KEY,
                contract_id TEXT NOT NULL,
                milestone_id TEXT NOT NULL,
                authorization_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                method TEXT NOT NULL,
                status TEXT NOT NULL,
                external_charge_id TEXT,
                failure_reason TEXT,
                fees_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                settled_at TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_charges_milestone ON charges(milestone_id, status)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_charges_client ON charges(client_id, created_at)",
            [],
        )?;
        Ok(())
    }

    // === Milestones ===

    pub fn insert_milestone(&self, milestone: &Milestone) -> Result<(), ChargeStoreError> {
        self.conn().execute(
            "INSERT INTO milestones
             (id, contract_id, title, amount, status, payment_released, approved_at, paid_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                milestone.id,
                milestone.contract_id,
                milestone.title,
                milestone.amount.value().to_string(),
                milestone.status.as_str(),
                milestone.payment_released as i64,
                milestone.approved_at.map(|t| t.to_rfc3339()),
                milestone.paid_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_milestone(&self, id: &str) -> Result<Milestone, ChargeStoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, contract_id, title, amount, status, payment_released, approved_at, paid_at
             FROM milestones WHERE id = ?1",
        )?;
        stmt.query_row(params![id], row_to_milestone)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => ChargeStoreError::NotFound(id.to_string()),
                other => ChargeStoreError::Database(other),
            })?
    }

    /// Update a milestone's status, stamping approval/payment times
    pub fn set_milestone_status(
        &self,
        id: &str,
        status: MilestoneStatus,
        payment_released: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ChargeStoreError> {
        let (approved_at, paid_at) = match status {
            MilestoneStatus::Approved => (Some(now.to_rfc3339()), None),
            MilestoneStatus::Paid => (None, Some(now.to_rfc3339())),
            _ => (None, None),
        };
        let rows = self.conn().execute(
            "UPDATE milestones SET status = ?1,
                    payment_released = ?2,
                    approved_at = COALESCE(?3, approved_at),
                    paid_at = COALESCE(?4, paid_at)
             WHERE id = ?5",
            params![status.as_str(), payment_released as i64, approved_at, paid_at, id],
        )?;
        if rows == 0 {
            return Err(ChargeStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    // === Charges ===

    pub fn insert_charge(&self, charge: &Charge) -> Result<(), ChargeStoreError> {
        let fees_json = serde_json::to_string(&charge.fees)?;
        self.conn().execute(
            "INSERT INTO charges
             (id, contract_id, milestone_id, authorization_id, client_id, amount, method,
              status, external_charge_id, failure_reason, fees_json, created_at, settled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                charge.id,
                charge.contract_id,
                charge.milestone_id,
                charge.authorization_id,
                charge.client_id,
                charge.amount.value().to_string(),
                charge.method.to_string(),
                charge.status.as_str(),
                charge.external_charge_id,
                charge.failure_reason,
                fees_json,
                charge.created_at.to_rfc3339(),
                charge.settled_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_charge(&self, id: &str) -> Result<Charge, ChargeStoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_CHARGE))?;
        stmt.query_row(params![id], row_to_charge)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => ChargeStoreError::NotFound(id.to_string()),
                other => ChargeStoreError::Database(other),
            })?
    }

    /// Record the rail outcome for a charge
    pub fn record_outcome(
        &self,
        id: &str,
        status: ChargeStatus,
        external_charge_id: Option<&str>,
        failure_reason: Option<&str>,
        settled_at: Option<DateTime<Utc>>,
    ) -> Result<(), ChargeStoreError> {
        let rows = self.conn().execute(
            "UPDATE charges SET status = ?1,
                    external_charge_id = COALESCE(?2, external_charge_id),
                    failure_reason = ?3,
                    settled_at = COALESCE(?4, settled_at)
             WHERE id = ?5",
            params![
                status.as_str(),
                external_charge_id,
                failure_reason,
                settled_at.map(|t| t.to_rfc3339()),
                id
            ],
        )?;
        if rows == 0 {
            return Err(ChargeStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Mark a settled charge refunded
    pub fn mark_refunded(&self, id: &str) -> Result<(), ChargeStoreError> {
        let rows = self.conn().execute(
            "UPDATE charges SET status = 'refunded' WHERE id = ?1 AND status = 'succeeded'",
            params![id],
        )?;
        if rows == 0 {
            return Err(ChargeStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// The single non-failed charge occupying a milestone's slot, if any
    pub fn find_non_failed_for_milestone(
        &self,
        milestone_id: &str,
    ) -> Result<Option<Charge>, ChargeStoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE milestone_id = ?1 AND status != 'failed' LIMIT 1",
            SELECT_CHARGE
        ))?;
        let mut rows = stmt.query_map(params![milestone_id], row_to_charge)?;
        match rows.next() {
            Some(row) => Ok(Some(row??)),
            None => Ok(None),
        }
    }

    /// Whether the client has ever completed a successful payment
    pub fn has_succeeded_for_client(&self, client_id: &str) -> Result<bool, ChargeStoreError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM charges
             WHERE client_id = ?1 AND status IN ('succeeded', 'refunded')",
            params![client_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Successful charges for a client since a cutoff
    pub fn count_succeeded_since(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, ChargeStoreError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM charges
             WHERE client_id = ?1 AND status IN ('succeeded', 'refunded') AND created_at >= ?2",
            params![client_id, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Average successful charge for a client over a trailing window
    pub fn recent_average(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Amount>, ChargeStoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT amount FROM charges
             WHERE client_id = ?1 AND status IN ('succeeded', 'refunded') AND created_at >= ?2",
        )?;
        let rows = stmt.query_map(params![client_id, since.to_rfc3339()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut total = Amount::ZERO;
        let mut count: u32 = 0;
        for row in rows {
            let amount = parse_amount(&row?)?;
            total = total.checked_add(&amount).unwrap_or(total);
            count += 1;
        }
        if count == 0 {
            return Ok(None);
        }
        let average = total.value() / rust_decimal::Decimal::from(count);
        Ok(Some(Amount::new_unchecked(average)))
    }

    /// All charge attempts (any status) for a client since a cutoff
    pub fn count_attempts_since(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, ChargeStoreError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM charges WHERE client_id = ?1 AND created_at >= ?2",
            params![client_id, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Failed charges for a contract since a cutoff
    pub fn count_failed_for_contract_since(
        &self,
        contract_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, ChargeStoreError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM charges
             WHERE contract_id = ?1 AND status = 'failed' AND created_at >= ?2",
            params![contract_id, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Failed charges platform-wide since a cutoff
    pub fn count_failed_since(&self, since: DateTime<Utc>) -> Result<u32, ChargeStoreError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM charges WHERE status = 'failed' AND created_at >= ?1",
            params![since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Distinct clients with any charge attempt since a cutoff
    pub fn clients_with_attempts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, ChargeStoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT DISTINCT client_id FROM charges WHERE created_at >= ?1")?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Distinct contracts with failed charges since a cutoff
    pub fn contracts_with_failures_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, ChargeStoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT contract_id FROM charges WHERE status = 'failed' AND created_at >= ?1",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

const SELECT_CHARGE: &str = "SELECT id, contract_id, milestone_id, authorization_id, client_id, amount, method,
        status, external_charge_id, failure_reason, fees_json, created_at, settled_at
 FROM charges";

fn parse_amount(s: &str) -> Result<Amount, ChargeStoreError> {
    let value = s
        .parse()
        .map_err(|_| ChargeStoreError::Corrupt(format!("amount '{}'", s)))?;
    Amount::new(value).map_err(|e| ChargeStoreError::Corrupt(e.to_string()))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, ChargeStoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ChargeStoreError::Corrupt(format!("timestamp '{}'", s)))
}

fn row_to_milestone(row: &Row<'_>) -> rusqlite::Result<Result<Milestone, ChargeStoreError>> {
    let amount: String = row.get(3)?;
    let status: String = row.get(4)?;
    let released: i64 = row.get(5)?;
    let approved_at: Option<String> = row.get(6)?;
    let paid_at: Option<String> = row.get(7)?;

    let build = || -> Result<Milestone, ChargeStoreError> {
        Ok(Milestone {
            id: row.get(0)?,
            contract_id: row.get(1)?,
            title: row.get(2)?,
            amount: parse_amount(&amount)?,
            status: MilestoneStatus::from_str(&status)
                .ok_or_else(|| ChargeStoreError::Corrupt(format!("status '{}'", status)))?,
            payment_released: released != 0,
            approved_at: approved_at.as_deref().map(parse_timestamp).transpose()?,
            paid_at: paid_at.as_deref().map(parse_timestamp).transpose()?,
        })
    };
    Ok(build())
}

fn row_to_charge(row: &Row<'_>) -> rusqlite::Result<Result<Charge, ChargeStoreError>> {
    let amount: String = row.get(5)?;
    let method: String = row.get(6)?;
    let status: String = row.get(7)?;
    let fees_json: String = row.get(10)?;
    let created_at: String = row.get(11)?;
    let settled_at: Option<String> = row.get(12)?;

    let build = || -> Result<Charge, ChargeStoreError> {
        Ok(Charge {
            id: row.get(0)?,
            contract_id: row.get(1)?,
            milestone_id: row.get(2)?,
            authorization_id: row.get(3)?,
            client_id: row.get(4)?,
            amount: parse_amount(&amount)?,
            method: PaymentMethod::from_str(&method)
                .map_err(|_| ChargeStoreError::Corrupt(format!("method '{}'", method)))?,
            status: ChargeStatus::from_str(&status)
                .ok_or_else(|| ChargeStoreError::Corrupt(format!("status '{}'", status)))?,
            external_charge_id: row.get(8)?,
            failure_reason: row.get(9)?,
            fees: serde_json::from_str::<FeeBreakdown>(&fees_json)?,
            created_at: parse_timestamp(&created_at)?,
            settled_at: settled_at.as_deref().map(parse_timestamp).transpose()?,
        })
    };
    Ok(build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::FeeSchedule;
    use rust_decimal_macros::dec;

    fn amount(v: rust_decimal::Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    fn insert_charge(store: &ChargeStore, milestone: &str, client: &str, status: ChargeStatus) -> Charge {
        let mut charge = Charge::create(
            "contract-1",
            milestone,
            "AUTH-1",
            client,
            amount(dec!(1500)),
            PaymentMethod::Card,
            FeeSchedule::default().breakdown(amount(dec!(1500))),
            Utc::now(),
        );
        charge.status = status;
        store.insert_charge(&charge).unwrap();
        charge
    }

    #[test]
    fn test_milestone_roundtrip() {
        let store = ChargeStore::in_memory().unwrap();
        let milestone = Milestone::new("ms-1", "contract-1", "Design", amount(dec!(1500)));
        store.insert_milestone(&milestone).unwrap();

        let loaded = store.get_milestone("ms-1").unwrap();
        assert_eq!(loaded.title, "Design");
        assert_eq!(loaded.status, MilestoneStatus::Pending);
        assert!(!loaded.payment_released);
    }

    #[test]
    fn test_milestone_status_updates() {
        let store = ChargeStore::in_memory().unwrap();
        let milestone = Milestone::new("ms-1", "contract-1", "Design", amount(dec!(1500)));
        store.insert_milestone(&milestone).unwrap();
        let now = Utc::now();

        store
            .set_milestone_status("ms-1", MilestoneStatus::Approved, false, now)
            .unwrap();
        let loaded = store.get_milestone("ms-1").unwrap();
        assert_eq!(loaded.status, MilestoneStatus::Approved);
        assert!(loaded.approved_at.is_some());
        assert!(loaded.paid_at.is_none());

        store
            .set_milestone_status("ms-1", MilestoneStatus::Paid, true, now)
            .unwrap();
        let loaded = store.get_milestone("ms-1").unwrap();
        assert_eq!(loaded.status, MilestoneStatus::Paid);
        assert!(loaded.payment_released);
        assert!(loaded.paid_at.is_some());
        // Approval stamp survives the payment transition
        assert!(loaded.approved_at.is_some());
    }

    #[test]
    fn test_charge_roundtrip_with_fees() {
        let store = ChargeStore::in_memory().unwrap();
        let charge = insert_charge(&store, "ms-1", "client-1", ChargeStatus::Processing);

        let loaded = store.get_charge(&charge.id).unwrap();
        assert_eq!(loaded.amount.value(), dec!(1500));
        assert_eq!(loaded.fees, charge.fees);
        assert_eq!(loaded.method, PaymentMethod::Card);
    }

    #[test]
    fn test_record_outcome() {
        let store = ChargeStore::in_memory().unwrap();
        let charge = insert_charge(&store, "ms-1", "client-1", ChargeStatus::Processing);
        let now = Utc::now();

        store
            .record_outcome(&charge.id, ChargeStatus::Succeeded, Some("rail_1"), None, Some(now))
            .unwrap();
        let loaded = store.get_charge(&charge.id).unwrap();
        assert_eq!(loaded.status, ChargeStatus::Succeeded);
        assert_eq!(loaded.external_charge_id.as_deref(), Some("rail_1"));
        assert!(loaded.settled_at.is_some());
    }

    #[test]
    fn test_find_non_failed_for_milestone() {
        let store = ChargeStore::in_memory().unwrap();
        insert_charge(&store, "ms-1", "client-1", ChargeStatus::Failed);
        assert!(store.find_non_failed_for_milestone("ms-1").unwrap().is_none());

        let succeeded = insert_charge(&store, "ms-1", "client-1", ChargeStatus::Succeeded);
        let found = store.find_non_failed_for_milestone("ms-1").unwrap().unwrap();
        assert_eq!(found.id, succeeded.id);
    }

    #[test]
    fn test_mark_refunded_requires_succeeded() {
        let store = ChargeStore::in_memory().unwrap();
        let failed = insert_charge(&store, "ms-1", "client-1", ChargeStatus::Failed);
        assert!(store.mark_refunded(&failed.id).is_err());

        let succeeded = insert_charge(&store, "ms-2", "client-1", ChargeStatus::Succeeded);
        store.mark_refunded(&succeeded.id).unwrap();
        assert_eq!(
            store.get_charge(&succeeded.id).unwrap().status,
            ChargeStatus::Refunded
        );
    }

    #[test]
    fn test_client_history_queries() {
        let store = ChargeStore::in_memory().unwrap();
        let since = Utc::now() - chrono::Duration::days(30);

        assert!(!store.has_succeeded_for_client("client-1").unwrap());
        assert!(store.recent_average("client-1", since).unwrap().is_none());

        insert_charge(&store, "ms-1", "client-1", ChargeStatus::Succeeded);
        insert_charge(&store, "ms-2", "client-1", ChargeStatus::Succeeded);
        insert_charge(&store, "ms-3", "client-1", ChargeStatus::Failed);

        assert!(store.has_succeeded_for_client("client-1").unwrap());
        assert_eq!(store.count_succeeded_since("client-1", since).unwrap(), 2);
        assert_eq!(store.count_attempts_since("client-1", since).unwrap(), 3);
        assert_eq!(
            store.recent_average("client-1", since).unwrap().unwrap().value(),
            dec!(1500)
        );
    }

    #[test]
    fn test_failure_counters() {
        let store = ChargeStore::in_memory().unwrap();
        let since = Utc::now() - chrono::Duration::hours(6);

        insert_charge(&store, "ms-1", "client-1", ChargeStatus::Failed);
        insert_charge(&store, "ms-2", "client-1", ChargeStatus::Failed);
        insert_charge(&store, "ms-3", "client-2", ChargeStatus::Succeeded);

        assert_eq!(
            store
                .count_failed_for_contract_since("contract-1", since)
                .unwrap(),
            2
        );
        assert_eq!(store.count_failed_since(since).unwrap(), 2);
        assert_eq!(
            store.contracts_with_failures_since(since).unwrap(),
            vec!["contract-1".to_string()]
        );

        let clients = store.clients_with_attempts_since(since).unwrap();
        assert_eq!(clients.len(), 2);
    }
}
