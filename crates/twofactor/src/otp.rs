//! Verification code storage
//!
//! Only the SHA-256 hash of a code is ever stored, bound to the user and
//! milestone it was issued for. Consumption is a guarded UPDATE so two
//! concurrent verifications of the same code cannot both succeed.

use chrono::{DateTime, Utc};
use paygate_core::Amount;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::TwoFactorError;

/// A stored verification code (hash only)
#[derive(Debug, Clone)]
pub struct VerificationCode {
    /// Unique id (OTP-XXXXXXXX)
    pub id: String,
    pub user_id: String,
    pub milestone_id: String,
    pub code_hash: String,
    /// Amount the code authorizes (the combined amount for batch codes)
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub failed_attempts: u32,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl VerificationCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Hash a code bound to its issue context, so a code for one milestone
/// can never verify another.
pub fn hash_code(user_id: &str, milestone_id: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(milestone_id.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Byte-wise constant-time equality for hash comparison
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// SQLite storage for verification codes
pub struct OtpStore {
    conn: Mutex<Connection>,
}

impl OtpStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, TwoFactorError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, TwoFactorError> {
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

    fn init_schema(&self) -> Result<(), TwoFactorError> {
        self.conn().execute(
            "CREATE TABLE IF NOT EXISTS verification_codes (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                milestone_id TEXT NOT NULL,
                code_hash TEXT NOT NULL,
                amount TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                used INTEGER NOT NULL DEFAULT 0,
                used_at TEXT,
                failed_attempts INTEGER NOT NULL DEFAULT 0,
                ip_address TEXT,
                user_agent TEXT
            )",
            [],
        )?;
        self.conn().execute(
            "CREATE INDEX IF NOT EXISTS idx_verification_codes_target
             ON verification_codes(user_id, milestone_id, used)",
            [],
        )?;
        Ok(())
    }

    /// Persist a freshly issued code
    pub fn insert(&self, code: &VerificationCode) -> Result<(), TwoFactorError> {
        self.conn().execute(
            "INSERT INTO verification_codes
             (id, user_id, milestone_id, code_hash, amount, created_at, expires_at,
              used, failed_attempts, ip_address, user_agent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, ?8, ?9)",
            params![
                code.id,
                code.user_id,
                code.milestone_id,
                code.code_hash,
                code.amount.value().to_string(),
                code.created_at.to_rfc3339(),
                code.expires_at.to_rfc3339(),
                code.ip_address,
                code.user_agent,
            ],
        )?;
        Ok(())
    }

    /// The most recently issued unused, unexpired code for a user and
    /// milestone, if any.
    pub fn latest_valid(
        &self,
        user_id: &str,
        milestone_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationCode>, TwoFactorError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, milestone_id, code_hash, amount, created_at, expires_at,
                    used, failed_attempts, ip_address, user_agent
             FROM verification_codes
             WHERE user_id = ?1 AND milestone_id = ?2 AND used = 0 AND expires_at > ?3
             ORDER BY created_at DESC
             LIMIT 1",
        )?;

        let mut rows = stmt.query_map(
            params![user_id, milestone_id, now.to_rfc3339()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, i64>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                ))
            },
        )?;

        match rows.next() {
            Some(row) => {
                let raw = row?;
                Ok(Some(VerificationCode {
                    id: raw.0,
                    user_id: raw.1,
                    milestone_id: raw.2,
                    code_hash: raw.3,
                    amount: parse_amount(&raw.4)?,
                    created_at: parse_timestamp(&raw.5)?,
                    expires_at: parse_timestamp(&raw.6)?,
                    used: raw.7 != 0,
                    failed_attempts: raw.8 as u32,
                    ip_address: raw.9,
                    user_agent: raw.10,
                }))
            }
            None => Ok(None),
        }
    }

    /// Atomically mark a code used. Returns false when the code was
    /// already consumed - the guard that keeps a code single-use even
    /// under concurrent verification.
    pub fn consume(&self, id: &str, now: DateTime<Utc>) -> Result<bool, TwoFactorError> {
        let rows = self.conn().execute(
            "UPDATE verification_codes SET used = 1, used_at = ?2
             WHERE id = ?1 AND used = 0",
            params![id, now.to_rfc3339()],
        )?;
        Ok(rows == 1)
    }

    /// Increment a code's failed-attempt counter; returns the new count
    pub fn record_failed_attempt(&self, id: &str) -> Result<u32, TwoFactorError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE verification_codes SET failed_attempts = failed_attempts + 1 WHERE id = ?1",
            params![id],
        )?;
        let count: i64 = conn.query_row(
            "SELECT failed_attempts FROM verification_codes WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }
}

fn parse_amount(s: &str) -> Result<Amount, TwoFactorError> {
    let value = s
        .parse()
        .map_err(|_| TwoFactorError::Corrupt(format!("amount '{}'", s)))?;
    Amount::new(value).map_err(|e| TwoFactorError::Corrupt(e.to_string()))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, TwoFactorError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| TwoFactorError::Corrupt(format!("timestamp '{}'", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn code_for(user: &str, milestone: &str, plain: &str, now: DateTime<Utc>) -> VerificationCode {
        VerificationCode {
            id: format!("OTP-{}", &uuid::Uuid::new_v4().to_string()[..8].to_uppercase()),
            user_id: user.to_string(),
            milestone_id: milestone.to_string(),
            code_hash: hash_code(user, milestone, plain),
            amount: Amount::new(dec!(1500)).unwrap(),
            created_at: now,
            expires_at: now + chrono::Duration::minutes(10),
            used: false,
            failed_attempts: 0,
            ip_address: None,
            user_agent: None,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let store = OtpStore::in_memory().unwrap();
        let now = Utc::now();
        let code = code_for("user-1", "ms-1", "123456", now);
        store.insert(&code).unwrap();

        let found = store.latest_valid("user-1", "ms-1", now).unwrap().unwrap();
        assert_eq!(found.id, code.id);
        assert_eq!(found.amount.value(), dec!(1500));
        assert!(!found.used);
    }

    #[test]
    fn test_latest_valid_prefers_newest() {
        let store = OtpStore::in_memory().unwrap();
        let now = Utc::now();

        let older = code_for("user-1", "ms-1", "111111", now - chrono::Duration::minutes(5));
        let newer = code_for("user-1", "ms-1", "222222", now);
        store.insert(&older).unwrap();
        store.insert(&newer).unwrap();

        let found = store.latest_valid("user-1", "ms-1", now).unwrap().unwrap();
        assert_eq!(found.id, newer.id);
    }

    #[test]
    fn test_expired_codes_not_returned() {
        let store = OtpStore::in_memory().unwrap();
        let now = Utc::now();
        let code = code_for("user-1", "ms-1", "123456", now - chrono::Duration::minutes(20));
        store.insert(&code).unwrap();

        assert!(store.latest_valid("user-1", "ms-1", now).unwrap().is_none());
    }

    #[test]
    fn test_consume_is_single_use() {
        let store = OtpStore::in_memory().unwrap();
        let now = Utc::now();
        let code = code_for("user-1", "ms-1", "123456", now);
        store.insert(&code).unwrap();

        assert!(store.consume(&code.id, now).unwrap());
        // Second consumption fails
        assert!(!store.consume(&code.id, now).unwrap());
        // And the code no longer shows up as valid
        assert!(store.latest_valid("user-1", "ms-1", now).unwrap().is_none());
    }

    #[test]
    fn test_failed_attempts_counter() {
        let store = OtpStore::in_memory().unwrap();
        let now = Utc::now();
        let code = code_for("user-1", "ms-1", "123456", now);
        store.insert(&code).unwrap();

        assert_eq!(store.record_failed_attempt(&code.id).unwrap(), 1);
        assert_eq!(store.record_failed_attempt(&code.id).unwrap(), 2);

        let found = store.latest_valid("user-1", "ms-1", now).unwrap().unwrap();
        assert_eq!(found.failed_attempts, 2);
    }

    #[test]
    fn test_hash_binds_context() {
        let h1 = hash_code("user-1", "ms-1", "123456");
        let h2 = hash_code("user-1", "ms-2", "123456");
        let h3 = hash_code("user-2", "ms-1", "123456");
        assert_ne!(h1, h2);
        assert_ne!(h1, h3);
        assert_eq!(h1, hash_code("user-1", "ms-1", "123456"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abcd", b"abcd"));
        assert!(!constant_time_eq(b"abcd", b"abce"));
        assert!(!constant_time_eq(b"abcd", b"abc"));
    }
}
