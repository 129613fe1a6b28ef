//! Path utilities and XDG directory discovery

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// XDG-compliant paths for sluice
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    /// Create a new Paths instance with XDG discovery
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("dev", "Sluice", "sluice"),
        }
    }

    /// Get user config directory (~/.config/sluice/)
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("Failed to determine user config directory".to_string())
            })
    }

    /// Get user config file path (~/.config/sluice/config.toml)
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// Get project config file path (sluice.toml)
    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("sluice.toml")
    }

    /// Get local config file path (sluice.local.toml, gitignored)
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("sluice.local.toml")
    }

    /// Directory holding one partition's snapshots
    pub fn snapshot_dir(snapshot_dir: impl AsRef<Path>, partition_id: u16) -> PathBuf {
        snapshot_dir.as_ref().join(format!("partition-{partition_id}"))
    }

    /// Snapshot file for a partition at a processed position
    pub fn snapshot_file(
        snapshot_dir: impl AsRef<Path>,
        partition_id: u16,
        position: i64,
    ) -> PathBuf {
        Self::snapshot_dir(snapshot_dir, partition_id).join(format!("{position:020}.snapshot"))
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
