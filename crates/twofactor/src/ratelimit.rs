//! Sliding-window rate limiter for verification attempts
//!
//! Caps verification attempts per key (user id) over a sliding window.
//! Exceeding the cap fails closed: the attempt is denied, not queued.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory sliding-window counter
pub struct RateLimiter {
    window: Duration,
    max_attempts: u32,
    attempts: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_attempts: u32) -> Self {
        Self {
            window,
            max_attempts,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt for `key` and report whether it is allowed.
    /// The check and the record are a single operation under one lock,
    /// so two racing attempts cannot both sneak under the cap.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Utc::now())
    }

    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let entry = attempts.entry(key.to_string()).or_default();

        let cutoff = now - self.window;
        entry.retain(|t| *t > cutoff);

        if entry.len() >= self.max_attempts as usize {
            return false;
        }
        entry.push(now);
        true
    }

    /// Attempts left in the current window
    pub fn remaining(&self, key: &str, now: DateTime<Utc>) -> u32 {
        let attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = now - self.window;
        let used = attempts
            .get(key)
            .map(|v| v.iter().filter(|t| **t > cutoff).count())
            .unwrap_or(0);
        self.max_attempts.saturating_sub(used as u32)
    }
}
