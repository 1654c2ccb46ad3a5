//! Trusted and seen devices
//!
//! Two registries: trust grants keyed by the client-presented device id
//! (explicit 2FA bypass, 30-day window), and seen fingerprints derived
//! from user agent + address (feeds the new-device heuristic).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::TwoFactorError;

/// Fingerprint a request's device/location pair
pub fn device_fingerprint(user_agent: &str, ip_address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(b"-");
    hasher.update(ip_address.as_bytes());
    hex::encode(hasher.finalize())
}

/// SQLite storage for device trust and sighting records
pub struct DeviceStore {
    conn: Mutex<Connection>,
}

impl DeviceStore {
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
        let conn = self.conn();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS trusted_devices (
                user_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                trusted_at TEXT NOT NULL,
                trusted_until TEXT NOT NULL,
                ip_address TEXT,
                user_agent TEXT,
                PRIMARY KEY (user_id, device_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS seen_devices (
                user_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                PRIMARY KEY (user_id, fingerprint)
            )",
            [],
        )?;
        Ok(())
    }

    /// Grant (or renew) a trust window for a device
    pub fn trust(
        &self,
        user_id: &str,
        device_id: &str,
        trusted_until: DateTime<Utc>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), TwoFactorError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO trusted_devices
             (user_id, device_id, trusted_at, trusted_until, ip_address, user_agent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                device_id,
                now.to_rfc3339(),
                trusted_until.to_rfc3339(),
                ip_address,
                user_agent,
            ],
        )?;
        Ok(())
    }

    /// Whether a device holds an unexpired trust grant
    pub fn is_trusted_at(
        &self,
        user_id: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, TwoFactorError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM trusted_devices
             WHERE user_id = ?1 AND device_id = ?2 AND trusted_until > ?3",
            params![user_id, device_id, now.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Record a fingerprint sighting
    pub fn record_seen(
        &self,
        user_id: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TwoFactorError> {
        self.conn().execute(
            "INSERT INTO seen_devices (user_id, fingerprint, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(user_id, fingerprint) DO UPDATE SET last_seen = ?3",
            params![user_id, fingerprint, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Whether a fingerprint has been seen for this user before
    pub fn is_known(&self, user_id: &str, fingerprint: &str) -> Result<bool, TwoFactorError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM seen_devices WHERE user_id = ?1 AND fingerprint = ?2",
            params![user_id, fingerprint],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let a = device_fingerprint("Mozilla/5.0", "10.0.0.1");
        let b = device_fingerprint("Mozilla/5.0", "10.0.0.1");
        let c = device_fingerprint("Mozilla/5.0", "10.0.0.2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_trust_window() {
        let store = DeviceStore::in_memory().unwrap();
        let now = Utc::now();
        let until = now + chrono::Duration::days(30);

        assert!(!store.is_trusted_at("user-1", "dev-1", now).unwrap());

        store
            .trust("user-1", "dev-1", until, None, None, now)
            .unwrap();
        assert!(store.is_trusted_at("user-1", "dev-1", now).unwrap());

        // Window boundary: expired exactly at trusted_until
        assert!(!store.is_trusted_at("user-1", "dev-1", until).unwrap());
        assert!(!store
            .is_trusted_at("user-1", "dev-1", until + chrono::Duration::seconds(1))
            .unwrap());
    }

    #[test]
    fn test_trust_is_per_user() {
        let store = DeviceStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .trust("user-1", "dev-1", now + chrono::Duration::days(30), None, None, now)
            .unwrap();

        assert!(!store.is_trusted_at("user-2", "dev-1", now).unwrap());
    }

    #[test]
    fn test_seen_devices() {
        let store = DeviceStore::in_memory().unwrap();
        let now = Utc::now();
        let fp = device_fingerprint("Mozilla/5.0", "10.0.0.1");

        assert!(!store.is_known("user-1", &fp).unwrap());
        store.record_seen("user-1", &fp, now).unwrap();
        assert!(store.is_known("user-1", &fp).unwrap());

        // Re-recording the same fingerprint is an upsert, not an error
        store.record_seen("user-1", &fp, now + chrono::Duration::hours(1)).unwrap();
        assert!(store.is_known("user-1", &fp).unwrap());
    }
}
