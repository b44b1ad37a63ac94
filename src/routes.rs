//! Host to target routing table
//!
//! Each host maps to a set of backend targets. A host's set is replaced
//! wholesale on every write, so `add`, `remove` and `list` all take the same
//! table-wide lock. Without it two concurrent adds could read the same prior
//! set and one addition would be lost.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::debug;

/// Target sets keyed by host
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: DashMap<String, HashSet<String>>,
    /// Serializes read-modify-write of target sets across the whole table
    lock: Mutex<()>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `target` to the set for `host` (idempotent)
    pub fn add(&self, host: &str, target: &str) {
        let _guard = self.lock.lock();

        let mut targets = self.targets(host);
        targets.insert(target.to_string());
        let total = targets.len();
        self.routes.insert(host.to_string(), targets);

        debug!(host, target, total_targets = total, "Target added");
    }

    /// Remove `target` from the set for `host`; missing entries are ignored
    pub fn remove(&self, host: &str, target: &str) {
        let _guard = self.lock.lock();

        let mut targets = self.targets(host);
        targets.remove(target);
        let total = targets.len();
        self.routes.insert(host.to_string(), targets);

        debug!(host, target, total_targets = total, "Target removed");
    }

    /// Current targets for `host`, in no particular order
    pub fn list(&self, host: &str) -> Vec<String> {
        let _guard = self.lock.lock();
        self.targets(host).into_iter().collect()
    }

    /// Snapshot of every host that has a route entry
    ///
    /// Does not take the table lock. The result is an owned copy, so no map
    /// shard is held when the caller goes on to call [`list`] per host.
    ///
    /// [`list`]: RouteTable::list
    pub fn hosts(&self) -> Vec<String> {
        self.routes.iter().map(|e| e.key().clone()).collect()
    }

    fn targets(&self, host: &str) -> HashSet<String> {
        self.routes
            .get(host)
            .map(|t| t.value().clone())
            .unwrap_or_default()
    }
}
