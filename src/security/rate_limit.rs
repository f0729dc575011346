//! Fixed-window rate limiting for API paths.
//!
//! Each client identity gets a window that opens on its first request and
//! lasts `window_secs`. Within a window the first `max_requests` requests
//! pass; the rest receive 429 until the window resets. Responses carry the
//! standard `RateLimit-*` headers (no legacy `X-RateLimit-*`).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");
const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

#[derive(Debug, Clone, Copy)]
struct Window {
    hits: u32,
    resets_at: Instant,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

impl Decision {
    fn write_headers(&self, headers: &mut HeaderMap, window: Duration) {
        // Round partial seconds up so clients never retry early.
        let reset_secs = self.reset_after.as_millis().div_ceil(1000);
        let values = [
            (RATELIMIT_POLICY, format!("{};w={}", self.limit, window.as_secs())),
            (RATELIMIT_LIMIT, self.limit.to_string()),
            (RATELIMIT_REMAINING, self.remaining.to_string()),
            (RATELIMIT_RESET, reset_secs.to_string()),
        ];
        for (name, value) in values {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
        if !self.allowed {
            if let Ok(value) = HeaderValue::from_str(&reset_secs.to_string()) {
                headers.insert(header::RETRY_AFTER, value);
            }
        }
    }
}

/// In-memory per-client request counters.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Whether requests to `path` are counted.
    pub fn applies_to(&self, path: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let prefix = self.config.path_prefix.as_str();
        path.starts_with(prefix) || path == prefix.trim_end_matches('/')
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    /// Count one request from `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let window = self.config.window();
        let limit = self.config.max_requests;

        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            hits: 0,
            resets_at: now + window,
        });
        if now >= entry.resets_at {
            entry.hits = 0;
            entry.resets_at = now + window;
        }
        entry.hits = entry.hits.saturating_add(1);

        Decision {
            allowed: entry.hits <= limit,
            limit,
            remaining: limit.saturating_sub(entry.hits),
            reset_after: entry.resets_at.saturating_duration_since(now),
        }
    }

    /// Drop windows that have expired. Returns how many were removed.
    pub fn prune_expired(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| w.resets_at > now);
        before - self.windows.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Prune once per window until shutdown.
    pub async fn run_pruner(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            return;
        }
        let period = self.config.window().max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.prune_expired(Instant::now());
                    if removed > 0 {
                        tracing::debug!(removed, "Pruned expired rate-limit windows");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}

/// Client identity for rate limiting.
///
/// With `trusted_hops` proxies in front, the address added by the
/// outermost trusted proxy is used: the `trusted_hops`-th entry from the
/// right of `X-Forwarded-For`, or the leftmost if the chain is shorter.
/// Without forwarding headers the socket peer is used.
pub fn client_key(headers: &HeaderMap, peer: Option<IpAddr>, trusted_hops: usize) -> String {
    if trusted_hops > 0 {
        let forwarded: Vec<&str> = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if let Some(entry) = forwarded.get(forwarded.len().saturating_sub(trusted_hops)) {
            return match entry.parse::<IpAddr>() {
                Ok(ip) => ip.to_string(),
                Err(_) => entry.to_string(),
            };
        }
    }

    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware enforcing the limit on matching paths.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.applies_to(request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let key = client_key(request.headers(), peer, limiter.config.trusted_proxy_hops);
    let decision = limiter.check(&key);
    let window = limiter.config.window();

    if !decision.allowed {
        tracing::warn!(client = %key, path = %request.uri().path(), "Rate limit exceeded");
        metrics::record_rate_limited();
        let mut response =
            (StatusCode::TOO_MANY_REQUESTS, limiter.config.message.clone()).into_response();
        decision.write_headers(response.headers_mut(), window);
        return response;
    }

    let mut response = next.run(request).await;
    decision.write_headers(response.headers_mut(), window);
    response
}
