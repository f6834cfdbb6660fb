//! Agent configuration file
//!
//! JSON on disk. A missing file is created with defaults on first load.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use watertank_ota::OtaConfig;

use crate::error::AgentError;

/// Device agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Update engine settings
    pub ota: OtaConfig,

    /// Directory holding the simulated flash partitions
    pub flash_dir: PathBuf,

    /// Seconds between reported-state updates
    pub report_interval_secs: u64,

    /// Run an update check right after start
    pub check_on_start: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            ota: OtaConfig::default(),
            flash_dir: PathBuf::from("flash"),
            report_interval_secs: 10,
            check_on_start: true,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a specific path
    pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!(path = %path.display(), "Config file not found, creating default");
            let config = Self::default();
            config.save_to_path(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AgentConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Save configuration to a specific path
    pub async fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Reporting period
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// Flash directory, relative paths resolved against the config file
    pub fn resolve_flash_dir(&self, config_path: &Path) -> PathBuf {
        if self.flash_dir.is_absolute() {
            return self.flash_dir.clone();
        }
        config_path
            .parent()
            .map_or_else(|| self.flash_dir.clone(), |dir| dir.join(&self.flash_dir))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), AgentError> {
        self.ota
            .validate()
            .map_err(|e| AgentError::InvalidConfiguration(e.to_string()))?;
        if self.report_interval_secs == 0 {
            return Err(AgentError::InvalidConfiguration(
                "report_interval_secs must be greater than zero".into(),
            ));
        }
        if self.flash_dir.as_os_str().is_empty() {
            return Err(AgentError::InvalidConfiguration(
                "flash_dir must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn test_missing_file_writes_defaults() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("agent").join("config.json");

        let config = AgentConfig::load_from_path(&path).await?;
        assert!(path.exists());
        assert_eq!(config.report_interval_secs, 10);
        config.validate()?;
        Ok(())
    }

    #[tokio::test]
    async fn test_round_trip_keeps_overrides() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");

        let mut config = AgentConfig::default();
        config.report_interval_secs = 3;
        config.ota.transfer.initial_chunk_size = 1024;
        config.save_to_path(&path).await?;

        let loaded = AgentConfig::load_from_path(&path).await?;
        assert_eq!(loaded.report_interval_secs, 3);
        assert_eq!(loaded.ota.transfer.initial_chunk_size, 1024);
        Ok(())
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"check_on_start": false}"#).await?;

        let loaded = AgentConfig::load_from_path(&path).await?;
        assert!(!loaded.check_on_start);
        assert_eq!(loaded.ota.transfer.max_chunk_size, 8192);
        Ok(())
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = AgentConfig {
            report_interval_secs: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AgentError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_relative_flash_dir_follows_config() {
        let config = AgentConfig::default();
        assert_eq!(
            config.resolve_flash_dir(Path::new("/etc/watertank/config.json")),
            PathBuf::from("/etc/watertank/flash")
        );
    }
}
