//! SQLite storage for authorizations
//!
//! The connection sits behind a mutex; every cap-relevant mutation runs
//! inside a single transaction under that lock, which serializes
//! check-and-increment per store handle.

use crate::authorization::{Authorization, AuthorizationStatus};
use chrono::{DateTime, Utc};
use paygate_core::{Amount, PaymentMethod};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Errors from the authorization store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Authorization not found: {0}")]
    NotFound(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Outcome of an atomic charge-record attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeAttempt {
    /// Increment applied; carries the new running total
    Recorded { new_total: Amount },
    /// Authorization is not in `Active` status
    NotActive(AuthorizationStatus),
    /// Single charge above the per-milestone cap
    OverPerMilestone { cap: Amount },
    /// Increment would push `total_charged` past `total_authorized`
    OverTotal {
        total_charged: Amount,
        total_authorized: Amount,
    },
}

/// SQLite storage for authorizations and authorization-scoped contract flags
pub struct AuthorizationStore {
    conn: Mutex<Connection>,
}

impl AuthorizationStore {
    /// Create a new store with the given database path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
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

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS authorizations (
                id TEXT PRIMARY KEY,
                contract_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                payment_method_ref TEXT NOT NULL,
                method TEXT NOT NULL,
                max_per_milestone TEXT NOT NULL,
                total_authorized TEXT NOT NULL,
                total_charged TEXT NOT NULL,
                terms_version TEXT NOT NULL,
                ip_address TEXT,
                user_agent TEXT,
                status TEXT NOT NULL,
                authorized_at TEXT NOT NULL,
                revoked_at TEXT,
                expires_at TEXT,
                last_used_at TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_authorizations_contract
             ON authorizations(contract_id, status)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS contract_flags (
                contract_id TEXT NOT NULL,
                flag TEXT NOT NULL,
                set_at TEXT NOT NULL,
                PRIMARY KEY (contract_id, flag)
            )",
            [],
        )?;

        Ok(())
    }

    /// Insert a new authorization
    pub fn insert(&self, auth: &Authorization) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO authorizations
             (id, contract_id, client_id, payment_method_ref, method,
              max_per_milestone, total_authorized, total_charged, terms_version,
              ip_address, user_agent, status, authorized_at, revoked_at,
              expires_at, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                auth.id,
                auth.contract_id,
                auth.client_id,
                auth.payment_method_ref,
                auth.method.to_string(),
                auth.max_per_milestone.value().to_string(),
                auth.total_authorized.value().to_string(),
                auth.total_charged.value().to_string(),
                auth.terms_version,
                auth.ip_address,
                auth.user_agent,
                auth.status.as_str(),
                auth.authorized_at.to_rfc3339(),
                auth.revoked_at.map(|t| t.to_rfc3339()),
                auth.expires_at.map(|t| t.to_rfc3339()),
                auth.last_used_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Get an authorization by ID
    pub fn get(&self, id: &str) -> Result<Authorization, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_AUTHORIZATION))?;
        stmt.query_row(params![id], row_to_authorization)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => StoreError::Database(other),
            })?
    }

    /// Get the single active authorization for a contract, if any
    pub fn get_active_for_contract(
        &self,
        contract_id: &str,
    ) -> Result<Option<Authorization>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE contract_id = ?1 AND status = 'active'",
            SELECT_AUTHORIZATION
        ))?;
        let mut rows = stmt.query_map(params![contract_id], row_to_authorization)?;
        match rows.next() {
            Some(row) => Ok(Some(row??)),
            None => Ok(None),
        }
    }

    /// Atomically check caps and apply a charge increment.
    ///
    /// The status check, both cap checks, and the increment run in one
    /// transaction; concurrent attempts on the same authorization cannot
    /// jointly overshoot the total cap.
    pub fn try_record_charge(
        &self,
        id: &str,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<ChargeAttempt, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let (status_str, max_per, authorized, charged): (String, String, String, String) = tx
            .query_row(
                "SELECT status, max_per_milestone, total_authorized, total_charged
                 FROM authorizations WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => StoreError::Database(other),
            })?;

        let status = AuthorizationStatus::from_str(&status_str)
            .ok_or_else(|| StoreError::Corrupt(format!("status '{}'", status_str)))?;
        if status != AuthorizationStatus::Active {
            return Ok(ChargeAttempt::NotActive(status));
        }

        let max_per_milestone = parse_amount(&max_per)?;
        let total_authorized = parse_amount(&authorized)?;
        let total_charged = parse_amount(&charged)?;

        if amount > max_per_milestone {
            return Ok(ChargeAttempt::OverPerMilestone {
                cap: max_per_milestone,
            });
        }

        let new_total = total_charged
            .checked_add(&amount)
            .ok_or_else(|| StoreError::Corrupt("total_charged overflow".to_string()))?;
        if new_total > total_authorized {
            return Ok(ChargeAttempt::OverTotal {
                total_charged,
                total_authorized,
            });
        }

        tx.execute(
            "UPDATE authorizations SET total_charged = ?1, last_used_at = ?2 WHERE id = ?3",
            params![new_total.value().to_string(), now.to_rfc3339(), id],
        )?;
        tx.commit()?;

        Ok(ChargeAttempt::Recorded { new_total })
    }

    /// Compensating decrement after a rail failure. Clamped at zero.
    pub fn release_charge(&self, id: &str, amount: Amount) -> Result<Amount, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let charged: String = tx
            .query_row(
                "SELECT total_charged FROM authorizations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => StoreError::Database(other),
            })?;

        let new_total = parse_amount(&charged)?.saturating_sub(&amount);
        tx.execute(
            "UPDATE authorizations SET total_charged = ?1 WHERE id = ?2",
            params![new_total.value().to_string(), id],
        )?;
        tx.commit()?;

        Ok(new_total)
    }

    /// Update the status of an authorization
    pub fn update_status(
        &self,
        id: &str,
        status: AuthorizationStatus,
        revoked_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let rows = self.conn().execute(
            "UPDATE authorizations SET status = ?1, revoked_at = COALESCE(?2, revoked_at)
             WHERE id = ?3",
            params![status.as_str(), revoked_at.map(|t| t.to_rfc3339()), id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// All active authorizations
    pub fn list_active(&self) -> Result<Vec<Authorization>, StoreError> {
        self.list_where("status = 'active'")
    }

    /// Active authorizations whose payment method expires within `days`
    pub fn list_expiring_within(
        &self,
        now: DateTime<Utc>,
        days: i64,
    ) -> Result<Vec<Authorization>, StoreError> {
        let horizon = now + chrono::Duration::days(days);
        Ok(self
            .list_active()?
            .into_iter()
            .filter(|a| {
                a.expires_at
                    .map_or(false, |at| at >= now && at <= horizon)
            })
            .collect())
    }

    /// Active authorizations whose payment method expiry has passed
    pub fn list_expired_as_of(&self, now: DateTime<Utc>) -> Result<Vec<Authorization>, StoreError> {
        Ok(self
            .list_active()?
            .into_iter()
            .filter(|a| a.is_past_expiry(now))
            .collect())
    }

    fn list_where(&self, clause: &str) -> Result<Vec<Authorization>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE {} ORDER BY authorized_at DESC",
            SELECT_AUTHORIZATION, clause
        ))?;
        let rows = stmt.query_map([], row_to_authorization)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row??);
        }
        Ok(result)
    }

    /// Set a contract-level flag (e.g. `payment_authorization_expired`)
    pub fn set_contract_flag(
        &self,
        contract_id: &str,
        flag: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO contract_flags (contract_id, flag, set_at)
             VALUES (?1, ?2, ?3)",
            params![contract_id, flag, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Check whether a contract flag is set
    pub fn has_contract_flag(&self, contract_id: &str, flag: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM contract_flags WHERE contract_id = ?1 AND flag = ?2",
            params![contract_id, flag],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

const SELECT_AUTHORIZATION: &str = "SELECT id, contract_id, client_id, payment_method_ref, method,
        max_per_milestone, total_authorized, total_charged, terms_version,
        ip_address, user_agent, status, authorized_at, revoked_at, expires_at, last_used_at
 FROM authorizations";

fn parse_amount(s: &str) -> Result<Amount, StoreError> {
    let value = s
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("amount '{}'", s)))?;
    Amount::new(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt(format!("timestamp '{}'", s)))
}

fn row_to_authorization(row: &Row<'_>) -> rusqlite::Result<Result<Authorization, StoreError>> {
    let method_str: String = row.get(4)?;
    let status_str: String = row.get(11)?;
    let authorized_at: String = row.get(12)?;
    let revoked_at: Option<String> = row.get(13)?;
    let expires_at: Option<String> = row.get(14)?;
    let last_used_at: Option<String> = row.get(15)?;
    let max_per: String = row.get(5)?;
    let authorized: String = row.get(6)?;
    let charged: String = row.get(7)?;

    let build = || -> Result<Authorization, StoreError> {
        Ok(Authorization {
            id: row.get(0)?,
            contract_id: row.get(1)?,
            client_id: row.get(2)?,
            payment_method_ref: row.get(3)?,
            method: PaymentMethod::from_str(&method_str)
                .map_err(|_| StoreError::Corrupt(format!("method '{}'", method_str)))?,
            max_per_milestone: parse_amount(&max_per)?,
            total_authorized: parse_amount(&authorized)?,
            total_charged: parse_amount(&charged)?,
            terms_version: row.get(8)?,
            ip_address: row.get(9)?,
            user_agent: row.get(10)?,
            status: AuthorizationStatus::from_str(&status_str)
                .ok_or_else(|| StoreError::Corrupt(format!("status '{}'", status_str)))?,
            authorized_at: parse_timestamp(&authorized_at)?,
            revoked_at: revoked_at.as_deref().map(parse_timestamp).transpose()?,
            expires_at: expires_at.as_deref().map(parse_timestamp).transpose()?,
            last_used_at: last_used_at.as_deref().map(parse_timestamp).transpose()?,
        })
    };

    Ok(build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::{ConsentMetadata, NewAuthorization};
    use rust_decimal_macros::dec;

    fn amount(v: rust_decimal::Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    fn create_auth(contract: &str) -> Authorization {
        Authorization::create(
            NewAuthorization {
                contract_id: contract.to_string(),
                client_id: "client-1".to_string(),
                payment_method_ref: "pm_123".to_string(),
                method: PaymentMethod::Card,
                max_per_milestone: amount(dec!(2000)),
                total_authorized: amount(dec!(5000)),
                consent: ConsentMetadata {
                    terms_version: "2025-06".to_string(),
                    ip_address: None,
                    user_agent: None,
                },
                expires_at: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_insert_and_get() {
        let store = AuthorizationStore::in_memory().unwrap();
        let auth = create_auth("contract-1");
        store.insert(&auth).unwrap();

        let loaded = store.get(&auth.id).unwrap();
        assert_eq!(loaded.contract_id, "contract-1");
        assert_eq!(loaded.max_per_milestone.value(), dec!(2000));
        assert_eq!(loaded.status, AuthorizationStatus::Active);
    }

    #[test]
    fn test_get_missing() {
        let store = AuthorizationStore::in_memory().unwrap();
        assert!(matches!(
            store.get("AUTH-MISSING"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_get_active_for_contract() {
        let store = AuthorizationStore::in_memory().unwrap();
        let auth = create_auth("contract-1");
        store.insert(&auth).unwrap();

        let found = store.get_active_for_contract("contract-1").unwrap();
        assert_eq!(found.unwrap().id, auth.id);
        assert!(store.get_active_for_contract("contract-2").unwrap().is_none());

        store
            .update_status(&auth.id, AuthorizationStatus::Revoked, Some(Utc::now()))
            .unwrap();
        assert!(store.get_active_for_contract("contract-1").unwrap().is_none());
    }

    #[test]
    fn test_record_charge_increments() {
        let store = AuthorizationStore::in_memory().unwrap();
        let auth = create_auth("contract-1");
        store.insert(&auth).unwrap();

        let outcome = store
            .try_record_charge(&auth.id, amount(dec!(1500)), Utc::now())
            .unwrap();
        assert_eq!(
            outcome,
            ChargeAttempt::Recorded {
                new_total: amount(dec!(1500))
            }
        );

        let loaded = store.get(&auth.id).unwrap();
        assert_eq!(loaded.total_charged.value(), dec!(1500));
        assert!(loaded.last_used_at.is_some());
    }

    #[test]
    fn test_record_charge_per_milestone_cap() {
        let store = AuthorizationStore::in_memory().unwrap();
        let auth = create_auth("contract-1");
        store.insert(&auth).unwrap();

        let outcome = store
            .try_record_charge(&auth.id, amount(dec!(2500)), Utc::now())
            .unwrap();
        assert!(matches!(outcome, ChargeAttempt::OverPerMilestone { .. }));

        // Nothing was recorded
        assert_eq!(store.get(&auth.id).unwrap().total_charged, Amount::ZERO);
    }

    #[test]
    fn test_record_charge_total_cap() {
        let store = AuthorizationStore::in_memory().unwrap();
        let auth = create_auth("contract-1");
        store.insert(&auth).unwrap();

        for _ in 0..2 {
            store
                .try_record_charge(&auth.id, amount(dec!(2000)), Utc::now())
                .unwrap();
        }
        // 4000 charged of 5000; another 2000 would overshoot
        let outcome = store
            .try_record_charge(&auth.id, amount(dec!(2000)), Utc::now())
            .unwrap();
        assert!(matches!(outcome, ChargeAttempt::OverTotal { .. }));
        assert_eq!(store.get(&auth.id).unwrap().total_charged.value(), dec!(4000));
    }

    #[test]
    fn test_record_charge_rejects_inactive() {
        let store = AuthorizationStore::in_memory().unwrap();
        let auth = create_auth("contract-1");
        store.insert(&auth).unwrap();
        store
            .update_status(&auth.id, AuthorizationStatus::Suspended, None)
            .unwrap();

        let outcome = store
            .try_record_charge(&auth.id, amount(dec!(100)), Utc::now())
            .unwrap();
        assert_eq!(
            outcome,
            ChargeAttempt::NotActive(AuthorizationStatus::Suspended)
        );
    }

    #[test]
    fn test_release_charge_clamps_at_zero() {
        let store = AuthorizationStore::in_memory().unwrap();
        let auth = create_auth("contract-1");
        store.insert(&auth).unwrap();

        store
            .try_record_charge(&auth.id, amount(dec!(1500)), Utc::now())
            .unwrap();
        let new_total = store.release_charge(&auth.id, amount(dec!(1500))).unwrap();
        assert_eq!(new_total, Amount::ZERO);

        // Releasing more than charged clamps rather than going negative
        let new_total = store.release_charge(&auth.id, amount(dec!(10))).unwrap();
        assert_eq!(new_total, Amount::ZERO);
    }

    #[test]
    fn test_expiry_listings() {
        let store = AuthorizationStore::in_memory().unwrap();
        let now = Utc::now();

        let mut soon = create_auth("contract-soon");
        soon.expires_at = Some(now + chrono::Duration::days(10));
        store.insert(&soon).unwrap();

        let mut later = create_auth("contract-later");
        later.expires_at = Some(now + chrono::Duration::days(90));
        store.insert(&later).unwrap();

        let mut past = create_auth("contract-past");
        past.expires_at = Some(now - chrono::Duration::days(1));
        store.insert(&past).unwrap();

        let expiring = store.list_expiring_within(now, 30).unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].contract_id, "contract-soon");

        let expired = store.list_expired_as_of(now).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].contract_id, "contract-past");
    }

    #[test]
    fn test_contract_flags() {
        let store = AuthorizationStore::in_memory().unwrap();
        assert!(!store
            .has_contract_flag("contract-1", "payment_authorization_expired")
            .unwrap());

        store
            .set_contract_flag("contract-1", "payment_authorization_expired", Utc::now())
            .unwrap();
        assert!(store
            .has_contract_flag("contract-1", "payment_authorization_expired")
            .unwrap());
    }
}
