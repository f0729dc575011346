//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and the relationships
//! between fields. All problems are reported, not just the first.

use std::fmt;

use crate::config::schema::ServerConfig;

/// A single semantic problem in a [`ServerConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listener = &config.listener;
    if listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    // A head timeout at or below keep-alive drops reusable connections early.
    if listener.headers_timeout_secs <= listener.keep_alive_timeout_secs {
        errors.push(ValidationError::new(
            "listener.headers_timeout_secs",
            format!(
                "must be greater than keep_alive_timeout_secs ({})",
                listener.keep_alive_timeout_secs
            ),
        ));
    }

    let db = &config.database;
    if db.max_pool_size == 0 {
        errors.push(ValidationError::new("database.max_pool_size", "must be greater than 0"));
    }
    if db.min_pool_size > db.max_pool_size {
        errors.push(ValidationError::new(
            "database.min_pool_size",
            format!("must not exceed max_pool_size ({})", db.max_pool_size),
        ));
    }
    if db.server_selection_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "database.server_selection_timeout_secs",
            "must be greater than 0",
        ));
    }

    let rl = &config.rate_limit;
    if rl.enabled {
        if rl.window_secs == 0 {
            errors.push(ValidationError::new("rate_limit.window_secs", "must be greater than 0"));
        }
        if rl.max_requests == 0 {
            errors.push(ValidationError::new("rate_limit.max_requests", "must be greater than 0"));
        }
        if !rl.path_prefix.starts_with('/') {
            errors.push(ValidationError::new("rate_limit.path_prefix", "must start with '/'"));
        }
    }

    if config.body.max_bytes == 0 {
        errors.push(ValidationError::new("body.max_bytes", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn header_timeout_must_exceed_keep_alive() {
        let mut config = ServerConfig::default();
        config.listener.headers_timeout_secs = config.listener.keep_alive_timeout_secs;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "listener.headers_timeout_secs");
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServerConfig::default();
        config.database.min_pool_size = 20;
        config.rate_limit.max_requests = 0;
        config.body.max_bytes = 0;

        let fields: Vec<_> = validate_config(&config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            vec!["database.min_pool_size", "rate_limit.max_requests", "body.max_bytes"]
        );
    }

    #[test]
    fn disabled_rate_limit_skips_checks() {
        let mut config = ServerConfig::default();
        config.rate_limit.enabled = false;
        config.rate_limit.max_requests = 0;
        assert!(validate_config(&config).is_ok());
    }
}
