//! Per-key activity tracking
//!
//! An [`ActivityTracker`] records, for every key it has seen, the last time a
//! request began and how many requests are currently in flight. The storage
//! engine keeps one tracker for hosts and one for targets.
//!
//! Timestamps are single-key stores and live in a `DashMap`. Counter updates
//! are read-modify-write, so every counter in a tracker shares one mutex.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;

/// Activity timestamp reported for keys that have never been touched
pub const NEVER: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// Last-activity timestamps and in-flight counters keyed by an opaque string
#[derive(Debug, Default)]
pub struct ActivityTracker {
    /// Time of the most recent `begin` per key
    activity: DashMap<String, DateTime<Utc>>,
    /// In-flight request count per key
    counts: Mutex<HashMap<String, i64>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a request for `key`
    ///
    /// Stamps the key with the current time and increments its in-flight count.
    pub fn begin(&self, key: &str) -> StorageResult<()> {
        self.add_count(key, 1)?;
        self.activity.insert(key.to_string(), Utc::now());
        Ok(())
    }

    /// Record the end of a request for `key`
    ///
    /// Only the in-flight count changes. There is no floor at zero: an `end`
    /// without a matching `begin` leaves the count negative.
    pub fn end(&self, key: &str) -> StorageResult<()> {
        self.add_count(key, -1)?;
        Ok(())
    }

    /// Time of the last `begin` for `key`, or [`NEVER`]
    pub fn activity(&self, key: &str) -> DateTime<Utc> {
        self.activity.get(key).map(|a| *a).unwrap_or(NEVER)
    }

    /// Current in-flight count for `key` (0 if never touched)
    pub fn count(&self, key: &str) -> i64 {
        self.counts.lock().get(key).copied().unwrap_or(0)
    }

    /// Whether `key` should be considered live as of `cutoff`
    ///
    /// A key is live if it began a request strictly after `cutoff`, or if it
    /// still has requests in flight. A negative count does not keep a key
    /// alive.
    pub fn active_since(&self, key: &str, cutoff: DateTime<Utc>) -> bool {
        self.activity(key) > cutoff || self.count(key) > 0
    }

    fn add_count(&self, key: &str, delta: i64) -> StorageResult<i64> {
        let mut counts = self.counts.lock();
        let current = counts.get(key).copied().unwrap_or(0);

        let next = current
            .checked_add(delta)
            .ok_or_else(|| StorageError::CounterOverflow {
                key: key.to_string(),
                delta,
            })?;

        if next < 0 && current >= 0 {
            warn!(key, count = next, "In-flight count went negative (unbalanced end)");
        }

        counts.insert(key.to_string(), next);
        Ok(next)
    }
}
