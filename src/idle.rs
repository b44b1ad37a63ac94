//! Per-host idle flags
//!
//! A host flagged idle has been scaled down and needs a wake step before it
//! can serve traffic. Each operation is a single load or store, so a
//! `DashMap` is enough.

use dashmap::DashMap;

/// Idle flag per host; hosts that were never set read as not idle
#[derive(Debug, Default)]
pub struct IdleStore {
    flags: DashMap<String, bool>,
}

impl IdleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, host: &str) -> bool {
        self.flags.get(host).map(|f| *f).unwrap_or(false)
    }

    /// Overwrite the flag for `host`
    pub fn set(&self, host: &str, idle: bool) {
        self.flags.insert(host.to_string(), idle);
    }
}
