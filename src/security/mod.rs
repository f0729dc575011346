//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (hardening headers added to every response)
//!     → rate_limit.rs (per-client window on API paths)
//!     → cors.rs (reject unlisted origins, reflect allowed ones)
//!     → Pass to body parsing and routes
//! ```
//!
//! # Design Decisions
//! - Rejections respond immediately; downstream stages never run
//! - Client identity honours a fixed number of trusted proxy hops
//! - No trust in `Origin` beyond exact allow-set membership

pub mod cors;
pub mod headers;
pub mod rate_limit;

pub use cors::CorsPolicy;
pub use headers::SecurityHeaders;
pub use rate_limit::RateLimiter;
