//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Idle → Connecting (database attempt resolves) → Listening
//!
//! Shutdown (shutdown.rs):
//!     Signal received → ShuttingDown → stop accepting → drain connections
//!     → close database → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: the socket is bound only after the database attempt
//! - Ordered shutdown: stop accept, drain, close database
//! - No forced deadline: in-flight requests are allowed to finish

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Lifecycle, LifecycleHandle, Phase, StartupError};
