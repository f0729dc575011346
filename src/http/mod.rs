//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection
//!     → server.rs (hyper connection, request id, trace span, metrics)
//!     → pipeline.rs (ordered stages: headers, compression, rate limit,
//!       CORS, body parsing, static assets)
//!     → routes (diagnostics, business route groups, not-found fallback)
//!     → response.rs (structured error formatting)
//!     → Send to client
//! ```

pub mod error;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;
pub mod static_files;

pub use error::{AppError, ErrorBody};
pub use pipeline::{Pipeline, Stage, STAGES};
pub use request::{RawBody, X_REQUEST_ID};
pub use server::{build_router, AppState, HttpServer};
