//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::runtime::Environment;
use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable naming an optional TOML tunables file.
pub const SERVER_CONFIG_VAR: &str = "SERVER_CONFIG";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Load the file named by `SERVER_CONFIG`, or the defaults when unset.
pub fn load_from_lookup<F>(lookup: F) -> Result<ServerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(SERVER_CONFIG_VAR).filter(|p| !p.trim().is_empty()) {
        Some(path) => {
            let config = load_config(Path::new(path.trim()))?;
            tracing::info!(path = %path, "Loaded server configuration");
            Ok(config)
        }
        None => Ok(ServerConfig::default()),
    }
}

/// Outcome of the local `.env` override attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvOverrides {
    /// Variables were read from this file.
    Loaded(PathBuf),
    /// Production never reads override files.
    Skipped,
    /// No `.env` file was found.
    NotFound,
    /// Built without the `dotenv` feature.
    Unavailable,
    /// The file exists but could not be parsed; ambient variables are used.
    Invalid(String),
}

impl EnvOverrides {
    /// Report the outcome. Nothing here is fatal.
    pub fn log(&self) {
        match self {
            EnvOverrides::Loaded(path) => {
                tracing::info!(path = %path.display(), "Loaded environment overrides")
            }
            EnvOverrides::Skipped => {
                tracing::debug!("Production environment, skipping .env overrides")
            }
            EnvOverrides::NotFound => {
                tracing::debug!("No .env file found, using environment variables")
            }
            EnvOverrides::Unavailable => {
                tracing::debug!("dotenv support not compiled in, using environment variables")
            }
            EnvOverrides::Invalid(reason) => {
                tracing::warn!(error = %reason, "Ignoring unreadable .env file")
            }
        }
    }
}

/// Load `.env` into the process environment unless running in production.
///
/// Runs before logging is initialized, so the outcome is returned for the
/// caller to log afterwards.
pub fn load_local_env(environment: &Environment) -> EnvOverrides {
    if environment.is_production() {
        return EnvOverrides::Skipped;
    }
    read_env_file()
}

/// Load `.env` from the working directory or its ancestors.
#[cfg(feature = "dotenv")]
pub fn read_env_file() -> EnvOverrides {
    match dotenvy::dotenv() {
        Ok(path) => EnvOverrides::Loaded(path),
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            EnvOverrides::NotFound
        }
        Err(err) => EnvOverrides::Invalid(err.to_string()),
    }
}

#[cfg(not(feature = "dotenv"))]
pub fn read_env_file() -> EnvOverrides {
    EnvOverrides::Unavailable
}
