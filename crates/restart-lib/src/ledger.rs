//! Mute ledger for restart alerts
//!
//! Tracks the last alert time per pod so a pod is alerted at most once per
//! mute window, and prunes entries older than the retention period.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Default minimum interval between two alerts for the same pod (10 minutes)
pub const DEFAULT_MUTE_SECS: i64 = 600;

/// Entries older than this are removed by [`MuteLedger::sweep`] (1 hour)
const RETENTION_SECS: i64 = 60 * 60;

/// Per-pod last-alert timestamps
pub struct MuteLedger {
    mute_window: Duration,
    /// Pod key -> last alert time
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MuteLedger {
    pub fn new(mute_window: Duration) -> Self {
        Self {
            mute_window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn mute_window(&self) -> Duration {
        self.mute_window
    }

    /// True if the pod was never alerted or its last alert is at least one
    /// mute window old
    pub fn should_alert(&self, key: &str, now: DateTime<Utc>) -> bool {
        match self.lock().get(key) {
            Some(last) => now - *last >= self.mute_window,
            None => true,
        }
    }

    /// Record an alert. Never moves an existing timestamp backwards.
    pub fn record(&self, key: &str, now: DateTime<Utc>) {
        let mut entries = self.lock();
        let entry = entries.entry(key.to_string()).or_insert(now);
        if now > *entry {
            *entry = now;
        }
    }

    /// Drop entries past the retention period, returning how many were removed
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        let retention = Duration::seconds(RETENTION_SECS);
        entries.retain(|_, last| now - *last <= retention);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Swept stale mute entries");
        }
        removed
    }

    pub fn last_alert(&self, key: &str) -> Option<DateTime<Utc>> {
        self.lock().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MuteLedger {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_MUTE_SECS))
    }
}
