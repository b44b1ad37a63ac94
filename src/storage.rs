//! Routing storage engine
//!
//! [`Storage`] is the contract the router and the reaper program against.
//! [`MemoryStorage`] is the in-memory implementation: it composes a route
//! table, an idle store and two activity trackers (one for hosts, one for
//! targets).

use crate::activity::ActivityTracker;
use crate::config::{StorageConfig, MEMORY_BACKEND};
use crate::error::{StorageError, StorageResult};
use crate::idle::IdleStore;
use crate::routes::RouteTable;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Routing state shared between the router and the reaper
///
/// Implementations must be safe to call from many threads at once.
pub trait Storage: Send + Sync {
    /// Whether `host` is flagged idle (false if never set)
    fn idle_get(&self, host: &str) -> StorageResult<bool>;

    fn idle_set(&self, host: &str, idle: bool) -> StorageResult<()>;

    /// Mark the start of a request for `host` and every target it has
    fn request_begin(&self, host: &str) -> StorageResult<()>;

    /// Mark the end of a request for `host` and every target it has
    fn request_end(&self, host: &str) -> StorageResult<()>;

    /// Hosts with no activity after `cutoff` on the host or any of its targets
    fn stale(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<String>>;

    fn target_add(&self, host: &str, target: &str) -> StorageResult<()>;

    fn target_list(&self, host: &str) -> StorageResult<Vec<String>>;

    fn target_remove(&self, host: &str, target: &str) -> StorageResult<()>;
}

/// Shared handle to a storage engine
pub type SharedStorage = Arc<dyn Storage>;

/// Build the storage engine named in `config`
pub fn open_storage(config: &StorageConfig) -> StorageResult<SharedStorage> {
    match config.backend.as_str() {
        MEMORY_BACKEND => Ok(Arc::new(MemoryStorage::new())),
        other => Err(StorageError::UnsupportedBackend(other.to_string())),
    }
}

/// In-memory storage engine
///
/// Nothing is ever evicted: activity records and idle flags outlive the
/// routes they belong to. Callers reclaim routes with
/// [`target_remove`](Storage::target_remove).
#[derive(Debug)]
pub struct MemoryStorage {
    host_activity: ActivityTracker,
    target_activity: ActivityTracker,
    idle: IdleStore,
    routes: RouteTable,
}

impl MemoryStorage {
    pub fn new() -> Self {
        info!(backend = MEMORY_BACKEND, "Storage initialized");

        Self {
            host_activity: ActivityTracker::new(),
            target_activity: ActivityTracker::new(),
            idle: IdleStore::new(),
            routes: RouteTable::new(),
        }
    }

    /// Activity tracker for hosts
    pub fn host_activity(&self) -> &ActivityTracker {
        &self.host_activity
    }

    /// Activity tracker for targets
    pub fn target_activity(&self) -> &ActivityTracker {
        &self.target_activity
    }

    /// Begin a request for `host` and end it when the guard drops
    pub fn track(self: &Arc<Self>, host: &str) -> StorageResult<RequestGuard> {
        track(Arc::clone(self) as SharedStorage, host)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn idle_get(&self, host: &str) -> StorageResult<bool> {
        Ok(self.idle.get(host))
    }

    fn idle_set(&self, host: &str, idle: bool) -> StorageResult<()> {
        debug!(host, idle, "Idle flag set");
        self.idle.set(host, idle);
        Ok(())
    }

    fn request_begin(&self, host: &str) -> StorageResult<()> {
        trace!(host, "Request begin");

        self.host_activity.begin(host)?;

        // Which target serves the request is decided downstream, so every
        // registered target counts as touched.
        for target in self.routes.list(host) {
            self.target_activity.begin(&target)?;
        }

        Ok(())
    }

    fn request_end(&self, host: &str) -> StorageResult<()> {
        trace!(host, "Request end");

        self.host_activity.end(host)?;

        // Targets are re-read here rather than remembered from the matching
        // begin. If the set changed in between, the decremented targets differ
        // from the incremented ones.
        for target in self.routes.list(host) {
            self.target_activity.end(&target)?;
        }

        Ok(())
    }

    fn stale(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<String>> {
        // Snapshot hosts first so no map shard is held while `list` waits on
        // the table lock.
        let hosts = self.routes.hosts();
        let scanned = hosts.len();

        let stale: Vec<String> = hosts
            .into_iter()
            .filter(|host| {
                !self.host_activity.active_since(host, cutoff)
                    && self
                        .routes
                        .list(host)
                        .iter()
                        .all(|t| !self.target_activity.active_since(t, cutoff))
            })
            .collect();

        debug!(%cutoff, scanned, stale = stale.len(), "Stale scan complete");

        Ok(stale)
    }

    fn target_add(&self, host: &str, target: &str) -> StorageResult<()> {
        self.routes.add(host, target);
        Ok(())
    }

    fn target_list(&self, host: &str) -> StorageResult<Vec<String>> {
        Ok(self.routes.list(host))
    }

    fn target_remove(&self, host: &str, target: &str) -> StorageResult<()> {
        self.routes.remove(host, target);
        Ok(())
    }
}

/// Begin a request for `host` on `storage`, returning a guard that ends it
pub fn track(storage: SharedStorage, host: &str) -> StorageResult<RequestGuard> {
    storage.request_begin(host)?;
    Ok(RequestGuard {
        storage,
        host: host.to_string(),
    })
}

/// Ends a request when dropped
///
/// The end step re-reads the host's targets, exactly like
/// [`request_end`](Storage::request_end). Failures on drop are logged.
#[must_use = "dropping the guard ends the request immediately"]
pub struct RequestGuard {
    storage: SharedStorage,
    host: String,
}

impl RequestGuard {
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl std::fmt::Debug for RequestGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGuard")
            .field("host", &self.host)
            .finish()
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if let Err(e) = self.storage.request_end(&self.host) {
            warn!(host = %self.host, error = %e, "Failed to end tracked request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sorted(mut v: Vec<String>) -> Vec<String> {
        v.sort();
        v
    }

    #[test]
    fn test_request_fan_out() {
        let storage = MemoryStorage::new();
        storage.target_add("example.com", "a").unwrap();
        storage.target_add("example.com", "b").unwrap();

        storage.request_begin("example.com").unwrap();
        assert_eq!(storage.host_activity().count("example.com"), 1);
        assert_eq!(storage.target_activity().count("a"), 1);
        assert_eq!(storage.target_activity().count("b"), 1);

        storage.request_end("example.com").unwrap();
        assert_eq!(storage.host_activity().count("example.com"), 0);
        assert_eq!(storage.target_activity().count("a"), 0);
        assert_eq!(storage.target_activity().count("b"), 0);
    }

    #[test]
    fn test_request_without_targets() {
        let storage = MemoryStorage::new();

        storage.request_begin("example.com").unwrap();
        assert_eq!(storage.host_activity().count("example.com"), 1);
        storage.request_end("example.com").unwrap();
        assert_eq!(storage.host_activity().count("example.com"), 0);
    }

    #[test]
    fn test_target_churn_between_begin_and_end() {
        let storage = MemoryStorage::new();
        storage.target_add("example.com", "a").unwrap();

        storage.request_begin("example.com").unwrap();
        storage.target_add("example.com", "b").unwrap();
        storage.request_end("example.com").unwrap();

        // End re-reads the target set, so "b" is decremented without a begin
        assert_eq!(storage.target_activity().count("a"), 0);
        assert_eq!(storage.target_activity().count("b"), -1);
    }

    #[test]
    fn test_idle_flag_roundtrip() {
        let storage = MemoryStorage::new();
        assert!(!storage.idle_get("example.com").unwrap());

        storage.idle_set("example.com", true).unwrap();
        storage.idle_set("example.com", true).unwrap();
        assert!(storage.idle_get("example.com").unwrap());
    }

    #[test]
    fn test_idle_flag_independent_of_routes() {
        let storage = MemoryStorage::new();
        storage.target_add("example.com", "a").unwrap();
        storage.idle_set("example.com", true).unwrap();

        assert_eq!(storage.target_list("example.com").unwrap(), vec!["a".to_string()]);
        assert_eq!(storage.host_activity().count("example.com"), 0);
    }

    #[test]
    fn test_stale_host_without_targets() {
        let storage = MemoryStorage::new();
        storage.target_add("example.com", "a").unwrap();
        storage.target_remove("example.com", "a").unwrap();

        let stale = storage.stale(Utc::now()).unwrap();
        assert_eq!(stale, vec!["example.com".to_string()]);
    }

    #[test]
    fn test_stale_ignores_hosts_without_routes() {
        let storage = MemoryStorage::new();
        storage.request_begin("example.com").unwrap();
        storage.request_end("example.com").unwrap();

        // Only hosts in the route table are scanned
        let future = Utc::now() + Duration::hours(1);
        assert!(storage.stale(future).unwrap().is_empty());
    }

    #[test]
    fn test_stale_suppressed_by_live_target() {
        let storage = MemoryStorage::new();
        storage.target_add("a.com", "t1").unwrap();
        storage.target_add("a.com", "t2").unwrap();
        storage.target_add("b.com", "t1").unwrap();

        let cutoff = Utc::now() - Duration::seconds(1);
        storage.target_activity().begin("t2").unwrap();
        storage.target_activity().end("t2").unwrap();

        assert_eq!(storage.stale(cutoff).unwrap(), vec!["b.com".to_string()]);
    }

    #[test]
    fn test_stale_suppressed_by_in_flight_host() {
        let storage = MemoryStorage::new();
        storage.target_add("example.com", "a").unwrap();
        storage.request_begin("example.com").unwrap();

        let future = Utc::now() + Duration::hours(1);
        assert!(storage.stale(future).unwrap().is_empty());

        storage.request_end("example.com").unwrap();
        assert_eq!(
            storage.stale(future).unwrap(),
            vec!["example.com".to_string()]
        );
    }

    #[test]
    fn test_stale_suppressed_by_open_target_request() {
        let storage = MemoryStorage::new();
        storage.target_add("example.com", "t").unwrap();
        storage.target_add("other.com", "u").unwrap();

        // Only the target has an open request; its timestamp is older than the cutoff
        storage.target_activity().begin("t").unwrap();
        let future = Utc::now() + Duration::hours(1);

        assert_eq!(storage.stale(future).unwrap(), vec!["other.com".to_string()]);

        storage.target_activity().end("t").unwrap();
        assert_eq!(
            sorted(storage.stale(future).unwrap()),
            vec!["example.com".to_string(), "other.com".to_string()]
        );
    }

    #[test]
    fn test_stale_does_not_mutate() {
        let storage = MemoryStorage::new();
        storage.target_add("example.com", "a").unwrap();
        storage.idle_set("example.com", true).unwrap();

        storage.stale(Utc::now()).unwrap();

        assert_eq!(storage.target_list("example.com").unwrap(), vec!["a".to_string()]);
        assert!(storage.idle_get("example.com").unwrap());
        assert_eq!(storage.target_activity().count("a"), 0);
    }

    #[test]
    fn test_unbalanced_host_end_still_fans_out() {
        let storage = MemoryStorage::new();
        for _ in 0..2 {
            storage.host_activity().end("example.com").unwrap();
        }
        storage.target_add("example.com", "a").unwrap();
        storage.request_begin("example.com").unwrap();
        assert_eq!(storage.host_activity().count("example.com"), -1);
        assert_eq!(storage.target_activity().count("a"), 1);
    }

    #[test]
    fn test_track_guard_ends_request() {
        let storage = Arc::new(MemoryStorage::new());
        storage.target_add("example.com", "a").unwrap();

        {
            let guard = storage.track("example.com").unwrap();
            assert_eq!(guard.host(), "example.com");
            assert_eq!(storage.host_activity().count("example.com"), 1);
            assert_eq!(storage.target_activity().count("a"), 1);
        }

        assert_eq!(storage.host_activity().count("example.com"), 0);
        assert_eq!(storage.target_activity().count("a"), 0);
    }

    #[test]
    fn test_open_storage_memory() {
        let storage = open_storage(&StorageConfig::default()).unwrap();
        storage.target_add("example.com", "a").unwrap();
        assert_eq!(sorted(storage.target_list("example.com").unwrap()), vec!["a".to_string()]);
    }

    #[test]
    fn test_open_storage_unsupported() {
        let config = StorageConfig {
            backend: "dynamodb".to_string(),
        };
        match open_storage(&config) {
            Err(err) => assert_eq!(err, StorageError::UnsupportedBackend("dynamodb".to_string())),
            Ok(_) => panic!("dynamodb backend should be rejected"),
        }
    }
}
