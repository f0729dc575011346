//! Startup orchestration and the lifecycle state machine.
//!
//! # Responsibilities
//! - Build the router and prepare static directories
//! - Resolve the database connection attempt before binding
//! - Bind the listener and serve until the termination signal
//! - Drain connections, then close the database
//!
//! # Design Decisions
//! - Fail fast: a fatal connection error returns before any socket exists
//! - Shutdown is strictly ordered: socket closed and connections drained
//!   first, database closed second

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;

use crate::config::{ConfigError, RuntimeConfig, ServerConfig};
use crate::database::{ConnectOutcome, ConnectionManager, DbError};
use crate::http::pipeline::{Pipeline, Stage};
use crate::http::server::{build_router, AppState, HttpServer};
use crate::lifecycle::Shutdown;
use crate::net::{Listener, ListenerError};
use crate::routes::RouteGroups;

/// Lifecycle phases, in the only order they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Idle,
    Connecting,
    Listening,
    ShuttingDown,
    Stopped,
}

/// Errors that abort startup (or end serving early).
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database connection failed: {0}")]
    Database(#[from] DbError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read-only view of a running lifecycle.
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    phase: watch::Receiver<Phase>,
    local_addr: Arc<OnceLock<SocketAddr>>,
}

impl LifecycleHandle {
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// The bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Wait until the server is listening or startup gave up.
    ///
    /// Returns `None` if the lifecycle stopped without ever binding.
    pub async fn listening(&mut self) -> Option<SocketAddr> {
        let _ = self.phase.wait_for(|p| *p >= Phase::Listening).await;
        self.local_addr()
    }

    pub async fn stopped(&mut self) {
        let _ = self.phase.wait_for(|p| *p == Phase::Stopped).await;
    }

    /// Subscribe to phase changes.
    pub fn watch(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }
}

/// The process lifecycle controller.
pub struct Lifecycle {
    runtime: Arc<RuntimeConfig>,
    settings: ServerConfig,
    db: Arc<ConnectionManager>,
    groups: RouteGroups,
    phase: watch::Sender<Phase>,
    local_addr: Arc<OnceLock<SocketAddr>>,
}

impl Lifecycle {
    pub fn new(runtime: RuntimeConfig, settings: ServerConfig, db: ConnectionManager) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            runtime: Arc::new(runtime),
            settings,
            db: Arc::new(db),
            groups: RouteGroups::default(),
            phase,
            local_addr: Arc::new(OnceLock::new()),
        }
    }

    /// Replace the default business route groups.
    pub fn with_route_groups(mut self, groups: RouteGroups) -> Self {
        self.groups = groups;
        self
    }

    pub fn handle(&self) -> LifecycleHandle {
        LifecycleHandle {
            phase: self.phase.subscribe(),
            local_addr: self.local_addr.clone(),
        }
    }

    pub fn database(&self) -> Arc<ConnectionManager> {
        self.db.clone()
    }

    fn enter(&self, phase: Phase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!(from = ?previous, to = ?phase, "Lifecycle transition");
        }
    }

    /// Start, serve until `signal` resolves, then shut down.
    ///
    /// `Ok` means a graceful stop. Any `Err` happened before the socket was
    /// bound, or is a listener failure after which shutdown still ran.
    pub async fn run<F>(mut self, signal: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()>,
    {
        let groups = std::mem::take(&mut self.groups);
        let result = self.serve(groups, signal).await;
        self.enter(Phase::Stopped);
        result
    }

    async fn serve<F>(&self, groups: RouteGroups, signal: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            environment = %self.runtime.environment,
            port = self.runtime.port,
            "Starting ID card API server"
        );

        let pipeline = Pipeline::new(&self.runtime, &self.settings);
        pipeline.prepare_directories()?;
        let stages: Vec<&str> = pipeline.stages().iter().map(Stage::name).collect();
        tracing::debug!(?stages, "Middleware pipeline assembled");

        let state = AppState::new(self.runtime.clone(), self.db.clone());
        let router = build_router(state, &pipeline, groups);

        self.enter(Phase::Connecting);
        match self.db.connect().await? {
            ConnectOutcome::Degraded => {
                tracing::warn!("Serving without a database; database routes will return 503")
            }
            outcome => tracing::debug!(?outcome, "Database ready"),
        }

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(err) => {
                self.db.disconnect().await;
                return Err(err);
            }
        };

        self.enter(Phase::Listening);
        if let Some(addr) = self.local_addr.get() {
            tracing::info!(address = %addr, "Server is running");
            tracing::info!("Health check: http://localhost:{}/api/health", addr.port());
        }

        let shutdown = Shutdown::new();
        let pruner = tokio::spawn(pipeline.rate_limiter().run_pruner(shutdown.subscribe()));
        let server = HttpServer::new(router, listener, &self.settings.listener);
        let serving = server.run(shutdown.clone());
        tokio::pin!(serving);

        let served = tokio::select! {
            result = &mut serving => {
                tracing::error!("HTTP server stopped before a termination signal");
                result
            }
            () = signal => {
                self.enter(Phase::ShuttingDown);
                shutdown.trigger();
                serving.await
            }
        };

        self.enter(Phase::ShuttingDown);
        shutdown.trigger();
        if let Err(err) = pruner.await {
            tracing::warn!(error = %err, "Rate-limit pruner ended abnormally");
        }
        tracing::info!("Server closed");

        self.db.disconnect().await;
        served.map_err(StartupError::from)
    }

    async fn bind(&self) -> Result<Listener, StartupError> {
        let config = &self.settings.listener;
        let listener = Listener::bind(&config.host, self.runtime.port, config.max_connections).await?;
        let addr = listener.local_addr()?;
        let _ = self.local_addr.set(addr);
        Ok(listener)
    }
}
