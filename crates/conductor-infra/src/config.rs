//! Configuration loader for Conductor.
//!
//! Reads `config.toml` from the data directory (`~/.conductor/` in
//! production) into [`ConductorConfig`]. Falls back to defaults when the file
//! is missing or malformed.

use std::path::{Path, PathBuf};

use conductor_types::config::ConductorConfig;
use thiserror::Error;

pub const DATA_DIR_ENV: &str = "CONDUCTOR_DATA_DIR";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot determine home directory; set {DATA_DIR_ENV}")]
    NoHomeDir,
}

/// Resolve the data directory: `CONDUCTOR_DATA_DIR` if set, else
/// `~/.conductor`.
pub fn resolve_data_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".conductor"))
        .ok_or(ConfigError::NoHomeDir)
}

/// Strict load of `{data_dir}/config.toml`. A missing file yields defaults;
/// read and parse failures are errors.
pub async fn try_load_config(data_dir: &Path) -> Result<ConductorConfig, ConfigError> {
    let path = data_dir.join(CONFIG_FILE);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", path.display());
            return Ok(ConductorConfig::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
}

/// Load configuration, logging a warning and returning defaults on any
/// failure.
pub async fn load_config(data_dir: &Path) -> ConductorConfig {
    match try_load_config(data_dir).await {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            ConductorConfig::default()
        }
    }
}
