//! Configuration schema definitions.
//!
//! Tunables that are not environment-derived. All types derive Serde
//! traits for deserialization from an optional TOML file, and every field
//! has a default so a missing file means "use the defaults".

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the API server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener and socket tuning.
    pub listener: ListenerConfig,

    /// Database pool and timeout settings.
    pub database: DatabaseConfig,

    /// API rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Request body limits.
    pub body: BodyConfig,

    /// Static asset directories.
    pub static_files: StaticFilesConfig,

    /// Security response headers.
    pub security: SecurityConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind; the port comes from `PORT`.
    pub host: String,

    /// Maximum simultaneous connections.
    pub max_connections: usize,

    /// Idle time before a keep-alive connection is closed.
    pub keep_alive_timeout_secs: u64,

    /// Time allowed to receive a complete request head.
    /// Must exceed `keep_alive_timeout_secs`.
    pub headers_timeout_secs: u64,
}

impl ListenerConfig {
    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.keep_alive_timeout_secs)
    }

    pub fn headers_timeout(&self) -> Duration {
        Duration::from_secs(self.headers_timeout_secs)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            max_connections: 100,
            keep_alive_timeout_secs: 65,
            headers_timeout_secs: 66,
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub min_pool_size: u32,
    pub max_pool_size: u32,
    pub server_selection_timeout_secs: u64,
    /// Upper bound on the reachability probe issued while connecting.
    pub socket_timeout_secs: u64,
    pub max_idle_time_secs: u64,
    pub retry_writes: bool,
    /// Reported to the server in the handshake.
    pub app_name: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            min_pool_size: 2,
            max_pool_size: 10,
            server_selection_timeout_secs: 30,
            socket_timeout_secs: 45,
            max_idle_time_secs: 30,
            retry_writes: true,
            app_name: Some("idcard-api".to_string()),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Requests allowed per client within one window.
    pub max_requests: u32,

    /// Only paths starting with this prefix are limited.
    pub path_prefix: String,

    /// Number of reverse proxies in front of the server whose
    /// `X-Forwarded-For` entries are trusted.
    pub trusted_proxy_hops: usize,

    /// Body of the 429 response.
    pub message: String,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 15 * 60,
            max_requests: 100,
            path_prefix: "/api/".to_string(),
            trusted_proxy_hops: 1,
            message: "Too many requests from this IP, please try again later.".to_string(),
        }
    }
}

/// Request body limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Maximum accepted body size in bytes, for JSON and form bodies alike.
    pub max_bytes: usize,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Static asset mounts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    /// User uploads, served under `/uploads`. Created at startup if absent.
    pub uploads_dir: String,
    pub uploads_max_age_secs: u64,

    /// Generated ID cards, served under `/idcards`.
    pub idcards_dir: String,
    pub idcards_max_age_secs: u64,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            uploads_dir: "uploads".to_string(),
            uploads_max_age_secs: 24 * 60 * 60,
            idcards_dir: "idcards".to_string(),
            idcards_max_age_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Security header configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// `Content-Security-Policy` value; `None` leaves the header off.
    pub content_security_policy: Option<String>,

    /// `Cross-Origin-Embedder-Policy` value; `None` leaves the header off.
    pub cross_origin_embedder_policy: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON in production, pretty elsewhere.
    #[default]
    Auto,
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Auto,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
