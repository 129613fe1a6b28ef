//! Configuration management for sluice
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (SLUICE_* prefix, highest precedence)
//! 2. sluice.local.toml (gitignored, local overrides)
//! 3. sluice.toml (git-tracked, project config)
//! 4. ~/.config/sluice/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main sluice configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SluiceConfig {
    pub partition: PartitionConfig,
    pub processing: ProcessingConfig,
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub id: u16,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self { id: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub mode: ProcessingMode,
    /// Delay before retrying after a recoverable failure.
    pub recoverable_retry_delay_ms: u64,
    /// Interval of the liveness tick used for health checks.
    pub health_tick_interval_ms: u64,
    /// Capacity of the pause/resume control inbox.
    pub control_queue_capacity: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::Processing,
            recoverable_retry_delay_ms: 250,
            health_tick_interval_ms: 5_000,
            control_queue_capacity: 16,
        }
    }
}

/// Whether the partition processes commands (leader) or only replays
/// events (follower).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingMode {
    Processing,
    Replay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub directory: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".sluice/snapshots"),
        }
    }
}

impl SluiceConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Create a configuration for a follower replica that only replays
    pub fn replay_only() -> Self {
        Self {
            processing: ProcessingConfig {
                mode: ProcessingMode::Replay,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Check values that deserialize fine but cannot run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing.health_tick_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "processing.health_tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.processing.control_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "processing.control_queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.snapshot.directory.is_relative() {
            self.snapshot.directory = base.join(&self.snapshot.directory);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SluiceConfig::default();
        assert_eq!(config.partition.id, 1);
        assert_eq!(config.processing.mode, ProcessingMode::Processing);
        assert_eq!(config.processing.recoverable_retry_delay_ms, 250);
        assert_eq!(config.processing.health_tick_interval_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_replay_only_config() {
        let config = SluiceConfig::replay_only();
        assert_eq!(config.processing.mode, ProcessingMode::Replay);
        assert_eq!(config.processing.recoverable_retry_delay_ms, 250);
    }

    #[test]
    fn test_zero_tick_is_invalid() {
        let mut config = SluiceConfig::default();
        config.processing.health_tick_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_path_resolution() {
        let mut config = SluiceConfig::default();
        config.resolve_paths("/srv/partition-1");

        assert_eq!(
            config.snapshot.directory,
            PathBuf::from("/srv/partition-1/.sluice/snapshots")
        );
    }

    #[test]
    fn test_serializes_to_toml() {
        let toml = toml::to_string(&SluiceConfig::default()).expect("serialize");
        assert!(toml.contains("recoverable_retry_delay_ms = 250"));
        assert!(toml.contains("mode = \"processing\""));
    }
}
