//! Database connection subsystem.
//!
//! # Data Flow
//! ```text
//! startup:
//!     ConnectionManager::connect()
//!         → connector.rs (parse URI, apply pool settings, ping)
//!         → status: Disconnected → Connecting → Connected | Error
//!         → observers notified synchronously
//!
//! runtime:
//!     driver SDAM events → monitor.rs
//!         → Connected → Disconnected → Error, and back to Connected
//!
//! request handling:
//!     ConnectionManager::database()  (fails fast unless Connected)
//!
//! shutdown:
//!     ConnectionManager::disconnect()  (idempotent)
//! ```
//!
//! # Design Decisions
//! - One manager per process, shared via Arc; no global connection flag
//! - Connect attempts are serialized; connecting while connected is a no-op
//! - Production tolerates a failed connect, other environments abort

pub mod connector;
pub mod manager;
pub mod monitor;

use std::time::Duration;

pub use connector::{Connector, MongoConnector, PoolSettings};
pub use manager::{
    ConnectOutcome, ConnectionEvent, ConnectionManager, ConnectionManagerBuilder, ConnectionStatus,
    Observer,
};
pub use monitor::TopologyMonitor;

/// Errors raised by the connection subsystem.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("MongoDB URI is required (set MONGODB_URI)")]
    MissingUri,
    #[error("database driver error: {0}")]
    Driver(#[from] mongodb::error::Error),
    #[error("database did not respond within {0:?}")]
    Timeout(Duration),
    #[error("database connection unavailable")]
    Unavailable,
}
