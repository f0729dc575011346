//! Para Sports ID card API server library.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ───────────────▶ net (listener, connection limits)
//!                        │
//!                        ▼
//!                      http::server (request id, trace, metrics)
//!                        │
//!                        ▼
//!                      http::pipeline
//!                        security headers → compression → rate limit
//!                        → CORS → body parsing → static assets
//!                        │
//!                        ▼
//!                      routes (diagnostics, players, idcards, not found)
//!                        │
//!                        ▼
//!                      database (shared MongoDB connection)
//!
//!     Cross-cutting: config, lifecycle, observability, security
//! ```

// Core subsystems
pub mod config;
pub mod database;
pub mod http;
pub mod net;
pub mod routes;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::{RuntimeConfig, ServerConfig};
pub use database::ConnectionManager;
pub use lifecycle::{Lifecycle, Phase, Shutdown, StartupError};
pub use routes::RouteGroups;
