//! Runtime parameters resolved from the process environment.

use std::fmt;

/// Origins that are always allowed to make credentialed cross-origin calls.
pub const DEV_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://127.0.0.1:5173"];

/// Port used when `PORT` is unset or unparsable.
pub const DEFAULT_PORT: u16 = 3000;

/// Deployment environment, selected by `NODE_ENV`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Other(String),
}

impl Environment {
    /// Interpret a raw `NODE_ENV` value. Unset or empty means development.
    pub fn from_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") | Some("development") => Environment::Development,
            Some("production") => Environment::Production,
            Some(other) => Environment::Other(other.to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn name(&self) -> &str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Other(name) => name,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable snapshot of the environment-derived settings.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub port: u16,
    /// De-duplicated, ordered allow-set of CORS origins.
    pub allowed_origins: Vec<String>,
    pub database_uri: Option<String>,
    pub frontend_url: Option<String>,
    pub environment: Environment,
}

impl RuntimeConfig {
    /// Resolve from the real process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve using an arbitrary variable lookup.
    ///
    /// Never fails: empty values are treated as unset and a malformed
    /// `PORT` falls back to [`DEFAULT_PORT`].
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = Environment::from_value(get("NODE_ENV").as_deref());

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, default = DEFAULT_PORT, "Invalid PORT, using default");
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        let database_uri = get("MONGODB_URI").map(|v| v.trim().to_string());
        let frontend_url = get("FRONTEND_URL").map(|v| v.trim().to_string());

        let mut allowed_origins: Vec<String> = Vec::new();
        let candidates = DEV_ORIGINS
            .iter()
            .map(|o| o.to_string())
            .chain(frontend_url.clone());
        for origin in candidates {
            if !origin.is_empty() && !allowed_origins.contains(&origin) {
                allowed_origins.push(origin);
            }
        }

        Self {
            port,
            allowed_origins,
            database_uri,
            frontend_url,
            environment,
        }
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == origin)
    }

    /// Log the resolved settings without leaking credentials.
    pub fn log_summary(&self) {
        tracing::info!(
            environment = %self.environment,
            port = self.port,
            database_uri = if self.database_uri.is_some() { "SET" } else { "NOT SET" },
            frontend_url = self.frontend_url.as_deref().unwrap_or("<unset>"),
            "Environment check"
        );
        tracing::info!(origins = ?self.allowed_origins, "Allowed CORS origins");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)]) -> RuntimeConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RuntimeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = resolve(&[]);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.environment, Environment::Development);
        assert!(config.database_uri.is_none());
        assert_eq!(config.allowed_origins, DEV_ORIGINS.map(String::from).to_vec());
    }

    #[test]
    fn frontend_url_joins_allow_set_once() {
        let config = resolve(&[("FRONTEND_URL", "https://cards.example.org")]);
        assert_eq!(config.allowed_origins.len(), 3);
        assert!(config.is_origin_allowed("https://cards.example.org"));

        let dup = resolve(&[("FRONTEND_URL", "http://localhost:5173")]);
        assert_eq!(dup.allowed_origins.len(), 2);
    }

    #[test]
    fn empty_values_are_unset() {
        let config = resolve(&[("MONGODB_URI", "  "), ("FRONTEND_URL", ""), ("NODE_ENV", "")]);
        assert!(config.database_uri.is_none());
        assert!(config.frontend_url.is_none());
        assert_eq!(config.environment, Environment::Development);
    }

    #[test]
    fn bad_port_falls_back() {
        assert_eq!(resolve(&[("PORT", "eighty")]).port, DEFAULT_PORT);
        assert_eq!(resolve(&[("PORT", "8080")]).port, 8080);
    }

    #[test]
    fn environment_names() {
        assert!(resolve(&[("NODE_ENV", "production")]).environment.is_production());
        let staging = resolve(&[("NODE_ENV", "staging")]).environment;
        assert_eq!(staging, Environment::Other("staging".into()));
        assert_eq!(staging.name(), "staging");
        assert!(!staging.is_production());
    }
}
