//! HTTP server setup and connection serving.
//!
//! # Responsibilities
//! - Compose routes, the ordered pipeline, and the outer request layers
//! - Serve accepted connections with hyper, applying the header-read
//!   timeout and closing keep-alive connections left idle too long
//! - Stop accepting on shutdown and wait for open connections to drain
//!
//! # Design Decisions
//! - A hand-written accept loop instead of `axum::serve`, so the
//!   connection limit and both socket timeouts are enforceable
//! - Draining is cooperative: each connection finishes its in-flight
//!   request before closing, nothing is aborted

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware, Router,
};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
};
use tokio::net::TcpStream;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{ListenerConfig, RuntimeConfig};
use crate::database::ConnectionManager;
use crate::http::pipeline::Pipeline;
use crate::http::request::{RequestUuid, X_REQUEST_ID};
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionActivity, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::routes::{self, RouteGroups};

/// Application state injected into handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    pub db: Arc<ConnectionManager>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(runtime: Arc<RuntimeConfig>, db: Arc<ConnectionManager>) -> Self {
        Self {
            runtime,
            db,
            started_at: Instant::now(),
        }
    }
}

/// Build the complete application router.
///
/// Outer layers, outermost first: request id assignment, trace span,
/// request id propagation, request metrics. Then the pipeline stages,
/// then the mounted routes.
pub fn build_router(state: AppState, pipeline: &Pipeline, groups: RouteGroups) -> Router {
    let app = pipeline.assemble(routes::mount(state, groups));

    app.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(RequestUuid))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get(X_REQUEST_ID)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                }),
            )
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(middleware::from_fn(metrics::track_requests)),
    )
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    keep_alive: Duration,
    headers: Duration,
}

impl Timeouts {
    /// How often idle connections are checked against the keep-alive timeout.
    fn idle_check_period(&self) -> Duration {
        self.keep_alive
            .min(Duration::from_secs(1))
            .max(Duration::from_millis(10))
    }
}

/// HTTP server bound to a listener.
#[derive(Debug)]
pub struct HttpServer {
    router: Router,
    listener: Listener,
    timeouts: Timeouts,
    tracker: ConnectionTracker,
}

impl HttpServer {
    pub fn new(router: Router, listener: Listener, config: &ListenerConfig) -> Self {
        Self {
            router,
            listener,
            timeouts: Timeouts {
                keep_alive: config.keep_alive_timeout(),
                headers: config.headers_timeout(),
            },
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept and serve connections until `shutdown` fires, then drain.
    ///
    /// Returns once the listening socket is closed and every connection
    /// has finished.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), ListenerError> {
        let HttpServer {
            router,
            listener,
            timeouts,
            tracker,
        } = self;

        tracing::info!(
            address = %listener.local_addr().map_err(ListenerError::Accept)?,
            max_connections = listener.max_connections(),
            keep_alive_secs = timeouts.keep_alive.as_secs(),
            headers_timeout_secs = timeouts.headers.as_secs(),
            "HTTP server accepting connections"
        );

        let mut shutdown_rx = shutdown.subscribe();
        while !shutdown.is_triggered() {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown_rx.recv() => break,
            };

            match accepted {
                Ok((stream, peer, permit)) => {
                    let guard = tracker.track();
                    let router = router.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        tracing::trace!(connection_id = %guard.id(), peer = %peer, "Serving connection");
                        serve_connection(stream, peer, router, timeouts, shutdown).await;
                        drop(guard);
                    });
                }
                Err(ListenerError::Accept(err)) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    tracing::warn!(error = %err, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(err) => return Err(err),
            }
        }

        drop(listener);
        tracing::info!(
            open_connections = tracker.active_count(),
            "Stopped accepting connections, draining"
        );
        tracker.wait_for_drain().await;
        tracing::info!("All connections drained");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    timeouts: Timeouts,
    shutdown: Shutdown,
) {
    let mut shutdown_rx = shutdown.subscribe();
    let activity = ConnectionActivity::new();

    let service = {
        let activity = activity.clone();
        service_fn(move |mut request: Request<Incoming>| {
            let in_flight = activity.begin();
            request.extensions_mut().insert(ConnectInfo(peer));
            let router = router.clone();
            async move {
                let response = router.oneshot(request).await;
                drop(in_flight);
                response
            }
        })
    };

    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.headers)
        .keep_alive(true);

    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    // Shutdown may have fired between accept and subscribe.
    let mut draining = shutdown.is_triggered();
    if draining {
        conn.as_mut().graceful_shutdown();
    }

    let mut idle_check = tokio::time::interval(timeouts.idle_check_period());
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(err) = result {
                    tracing::debug!(peer = %peer, error = %err, "Connection ended with error");
                }
                break;
            }
            _ = shutdown_rx.recv(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
            _ = idle_check.tick(), if !draining => {
                let expired = activity
                    .idle_for(Instant::now())
                    .is_some_and(|idle| idle >= timeouts.keep_alive);
                if expired {
                    tracing::trace!(peer = %peer, "Closing idle keep-alive connection");
                    draining = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
    }
}
