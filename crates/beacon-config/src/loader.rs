//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};

use crate::error::ConfigError;
use crate::schema::BeaconConfig;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<BeaconConfig, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a file, or defaults when the file is missing.
    pub fn load_or_default(path: &Path) -> Result<BeaconConfig, ConfigError> {
        if !path.exists() {
            tracing::info!("Config file {:?} not found, using defaults", path);
            return Ok(BeaconConfig::default());
        }
        Self::load(path)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<BeaconConfig, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let mut config: BeaconConfig = toml::from_str(&expanded)?;
        config.storage.path = Self::expand_path_buf(&config.storage.path);
        config.logging.dir = Self::expand_path_buf(&config.logging.dir);
        Ok(config)
    }

    /// Substitute `${VAR}` references. The first unset variable is an error.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;

        let mut missing: Option<String> = None;
        let expanded = re.replace_all(content, |caps: &Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            })
        });

        match missing {
            Some(var) => Err(ConfigError::EnvVarNotSet(var)),
            None => Ok(expanded.into_owned()),
        }
    }

    /// Expand shell-style paths (e.g., `~/.beacon`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }

    fn expand_path_buf(path: &Path) -> PathBuf {
        match path.to_str() {
            Some(s) => PathBuf::from(Self::expand_path(s)),
            None => path.to_path_buf(),
        }
    }
}
