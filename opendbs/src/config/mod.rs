use crate::error::{OpenDbsError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "OPENDBS_DATA_DIR";
pub const COMPRESSION_QUALITY_ENV: &str = "OPENDBS_COMPRESSION_QUALITY";

/// Engine settings. Every field has a default, so a config file only
/// needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory holding one subdirectory per database
    pub data_dir: PathBuf,
    /// Brotli quality, 0 (fastest) to 11 (smallest)
    pub compression_quality: u32,
    /// Brotli window size as log2 of bytes
    pub compression_window: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_dir: PathBuf::from("./data"),
            compression_quality: 4,
            compression_window: 22,
        }
    }
}

impl EngineConfig {
    /// Defaults with the given data root.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        EngineConfig {
            data_dir: data_dir.into(),
            ..EngineConfig::default()
        }
    }

    /// Parse a YAML config file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(EngineConfig::default());
        }
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `OPENDBS_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(DATA_DIR_ENV) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(quality) = lookup(COMPRESSION_QUALITY_ENV) {
            self.compression_quality = quality.trim().parse().map_err(|_| {
                OpenDbsError::Config(format!(
                    "{COMPRESSION_QUALITY_ENV} must be an integer, got '{quality}'"
                ))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.compression_quality > 11 {
            return Err(OpenDbsError::Config(format!(
                "compression_quality must be between 0 and 11, got {}",
                self.compression_quality
            )));
        }
        if !(10..=24).contains(&self.compression_window) {
            return Err(OpenDbsError::Config(format!(
                "compression_window must be between 10 and 24, got {}",
                self.compression_window
            )));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(OpenDbsError::Config("data_dir must not be empty".into()));
        }
        Ok(())
    }
}
