//! Configuration management for Cairn
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (CAIRN_* prefix, highest precedence)
//! 2. cairn.local.toml (gitignored, local overrides)
//! 3. cairn.toml (git-tracked, project config)
//! 4. ~/.config/cairn/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)
//!
//! Everything here is process-wide and read at startup; the only
//! runtime mutation path for membership is the admin broadcast.

use std::time::Duration;

use cairn_types::{ClusterView, NodeId, ViewError};
use serde::{Deserialize, Serialize};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Cairn configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CairnConfig {
    pub cluster: ClusterSection,
    pub timing: TimingSection,
    pub client: ClientSection,
}

/// Seed membership: the master set, replica set, and write-quorum
/// threshold this node starts with. Replaced at runtime only by the
/// admin broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClusterSection {
    pub masters: Vec<u32>,
    pub replicas: Vec<u32>,
    pub w: usize,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            masters: vec![0, 1, 2],
            replicas: vec![],
            w: 2,
        }
    }
}

impl ClusterSection {
    /// Builds the validated seed view.
    pub fn seed_view(&self) -> Result<ClusterView, ViewError> {
        ClusterView::new(
            self.masters.iter().copied().map(NodeId::new).collect(),
            self.replicas.iter().copied().map(NodeId::new).collect(),
            self.w,
        )
    }
}

/// Cadence of the per-node periodic tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingSection {
    /// Interval between lease-expiration sweeps.
    pub lease_sweep_interval_ms: u64,
    /// Interval between lock-expiration sweeps.
    pub lock_sweep_interval_ms: u64,
    /// Inactivity window after which a lock row is reclaimed. On the
    /// order of one second: longer than a commit round-trip, short
    /// enough that a crashed coordinator does not stall the key.
    pub lock_ttl_ms: u64,
    /// Interval between trans-log pushes to replicas.
    pub push_interval_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            lease_sweep_interval_ms: 1000,
            lock_sweep_interval_ms: 1000,
            lock_ttl_ms: 1000,
            push_interval_ms: 1000,
        }
    }
}

impl TimingSection {
    pub fn lease_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.lease_sweep_interval_ms)
    }

    pub fn lock_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.lock_sweep_interval_ms)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }
}

/// Client-side defaults applied when a caller does not pass explicit
/// lease or timeout values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientSection {
    pub default_lease_ms: u64,
    pub default_timeout_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            default_lease_ms: 10_000,
            default_timeout_ms: 5000,
        }
    }
}

impl ClientSection {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl CairnConfig {
    /// Load configuration from default locations
    pub fn load() -> anyhow::Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CairnConfig::default();
        assert_eq!(config.cluster.masters, vec![0, 1, 2]);
        assert_eq!(config.cluster.w, 2);
        assert_eq!(config.timing.lock_ttl_ms, 1000);
        assert_eq!(config.client.default_timeout_ms, 5000);
    }

    #[test]
    fn test_default_seed_view_is_valid() {
        let view = CairnConfig::default().cluster.seed_view().unwrap();
        assert_eq!(view.masters.len(), 3);
        assert_eq!(view.w, 2);
        assert_eq!(view.w, ClusterView::majority_of(view.masters.len()));
    }

    #[test]
    fn test_invalid_seed_view_is_rejected() {
        let section = ClusterSection {
            masters: vec![0],
            replicas: vec![],
            w: 2,
        };
        assert!(section.seed_view().is_err());
    }

    #[test]
    fn test_interval_accessors() {
        let timing = TimingSection::default();
        assert_eq!(timing.lease_sweep_interval(), Duration::from_secs(1));
        assert_eq!(timing.push_interval(), Duration::from_secs(1));
    }
}
