//! Configuration loader with multi-source merging

use crate::{Paths, SluiceConfig};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "SLUICE".to_string(),
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "SLUICE")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<SluiceConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = SluiceConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/sluice/config.toml)
        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 3. Project and local config (sluice.toml, sluice.local.toml)
        for file in [
            Paths::project_config_file(&self.project_dir),
            Paths::local_config_file(&self.project_dir),
        ] {
            if file.exists() {
                builder = builder.add_source(
                    config::File::from(file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 4. Environment variables (SLUICE_PROCESSING__MODE=replay)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut sluice_config: SluiceConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        sluice_config.validate()?;
        sluice_config.resolve_paths(&self.project_dir);

        Ok(sluice_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> SluiceConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProcessingMode;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .with_env_prefix("SLUICE_TEST_DEFAULTS")
            .load()
            .expect("Failed to load config");

        assert_eq!(config.processing.recoverable_retry_delay_ms, 250);
        assert_eq!(config.processing.mode, ProcessingMode::Processing);
        assert!(config.snapshot.directory.is_absolute());
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
[partition]
id = 3

[processing]
mode = "replay"
health_tick_interval_ms = 1000
"#;
        fs::write(project_dir.join("sluice.toml"), config_content)
            .expect("Failed to write config");

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .with_env_prefix("SLUICE_TEST_PROJECT")
            .load()
            .expect("Failed to load config");

        assert_eq!(config.partition.id, 3);
        assert_eq!(config.processing.mode, ProcessingMode::Replay);
        assert_eq!(config.processing.health_tick_interval_ms, 1000);
        assert_eq!(config.processing.recoverable_retry_delay_ms, 250);
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("sluice.toml"),
            "[processing]\nrecoverable_retry_delay_ms = 500\n",
        )
        .expect("Failed to write project config");
        fs::write(
            project_dir.join("sluice.local.toml"),
            "[processing]\nrecoverable_retry_delay_ms = 10\n",
        )
        .expect("Failed to write local config");

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .with_env_prefix("SLUICE_TEST_LOCAL")
            .load()
            .expect("Failed to load config");

        assert_eq!(config.processing.recoverable_retry_delay_ms, 10);
    }

    #[test]
    fn test_invalid_values_fail_loading() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        fs::write(
            temp_dir.path().join("sluice.toml"),
            "[processing]\ncontrol_queue_capacity = 0\n",
        )
        .expect("Failed to write config");

        let result = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .with_env_prefix("SLUICE_TEST_INVALID")
            .load();

        assert!(result.is_err());
    }
}
