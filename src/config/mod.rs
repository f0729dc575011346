//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! .env (non-production only)
//!     → loader.rs (load_local_env, optional and silent when absent)
//!
//! process environment
//!     → runtime.rs (RuntimeConfig: port, origins, database URI, environment)
//!
//! SERVER_CONFIG=<path> (optional TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Both configs are built once at startup and shared via Arc
//! - Resolving the runtime config never fails; absent values are `None`
//! - Every tunable has a default so an empty TOML file is valid

pub mod loader;
pub mod runtime;
pub mod schema;
pub mod validation;

pub use loader::{ConfigError, EnvOverrides};
pub use runtime::{Environment, RuntimeConfig};
pub use schema::{
    BodyConfig, DatabaseConfig, ListenerConfig, LogFormat, ObservabilityConfig, RateLimitConfig,
    SecurityConfig, ServerConfig, StaticFilesConfig,
};
