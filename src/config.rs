use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Name of the in-memory storage backend
pub const MEMORY_BACKEND: &str = "memory";

/// Top-level configuration for the routing store
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Storage engine selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Staleness settings used by the reaper
    #[serde(default)]
    pub reaper: ReaperConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Storage backend name (default: "memory")
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReaperConfig {
    /// Seconds without activity before a host is reported stale (default: 600)
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after(),
        }
    }
}

impl ReaperConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Cutoff to pass to a stale scan run at `now`
    ///
    /// Saturates at the earliest representable time for absurd settings.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.stale_after())
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

// Default value functions
fn default_backend() -> String {
    MEMORY_BACKEND.to_string()
}

fn default_stale_after() -> u64 {
    600 // 10 minutes
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.storage.backend != MEMORY_BACKEND {
            errors.push(format!(
                "storage.backend: unsupported backend '{}' (expected '{}')",
                self.storage.backend, MEMORY_BACKEND
            ));
        }

        if self.reaper.stale_after_secs == 0 {
            errors.push("reaper.stale_after_secs: must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
