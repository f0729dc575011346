//! Cross-origin request validation.
//!
//! Two layers work together:
//! - `reject_unlisted_origin` turns away any request whose `Origin` is not
//!   in the allow-set before it reaches a handler. Requests without an
//!   `Origin` (curl, mobile apps, same-origin navigation) pass.
//! - `tower_http`'s `CorsLayer` answers preflights and reflects the origin
//!   with credentials enabled for the requests that got through.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::http::error::AppError;
use crate::observability::metrics;

/// Methods a cross-origin caller may use.
pub const ALLOWED_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
];

/// The origin allow-set.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origins: Arc<[String]>,
}

impl CorsPolicy {
    pub fn new(origins: &[String]) -> Self {
        Self {
            origins: origins.into(),
        }
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.origins.iter().any(|o| o == origin)
    }

    /// Header-reflection layer for allowed origins.
    pub fn layer(&self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %o, "Skipping unrepresentable CORS origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
            .allow_methods(ALLOWED_METHODS.to_vec())
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    }
}

/// Reject requests from origins outside the allow-set.
pub async fn reject_unlisted_origin(
    State(policy): State<CorsPolicy>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let origin = match request.headers().get(header::ORIGIN) {
        None => return next.run(request).await,
        Some(value) => value.to_str().unwrap_or_default(),
    };

    if policy.is_allowed(origin) {
        return next.run(request).await;
    }

    tracing::warn!(origin = %origin, path = %request.uri().path(), "CORS blocked origin");
    metrics::record_cors_rejected();
    AppError::CorsBlocked.into_response()
}
