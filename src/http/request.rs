//! Request identity and body capture.
//!
//! # Responsibilities
//! - Assign a UUID v4 `x-request-id` unless the client sent one
//! - Buffer JSON and form bodies up to the configured limit
//! - Keep the raw bytes beside the parsed body for signature checks
//! - Report an oversized `Content-Length` as a structured 413

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::response::is_json;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Generates request IDs from random UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestUuid;

impl MakeRequestId for RequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// The unparsed body bytes, available as a request extension.
#[derive(Debug, Clone)]
pub struct RawBody(pub Bytes);

/// Whether the body is one the pipeline parses (JSON or URL-encoded form).
pub fn is_parsed_body(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json"
        || mime.ends_with("+json")
        || mime == "application/x-www-form-urlencoded"
}

/// Buffer parseable bodies and record the raw bytes.
pub async fn capture_raw_body(
    State(limit): State<usize>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !is_parsed_body(request.headers()) {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(error = %err, "Failed to buffer request body");
            return AppError::PayloadTooLarge { limit }.into_response();
        }
    };

    parts.extensions.insert(RawBody(bytes.clone()));
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Replace the body limit's plain-text 413 with the structured error.
///
/// `RequestBodyLimitLayer` answers on `Content-Length` alone, before the
/// request reaches the terminal error formatter.
pub async fn structured_limit_errors(
    State(limit): State<usize>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE && !is_json(response.headers()) {
        tracing::debug!(limit, "Request body over limit");
        return AppError::PayloadTooLarge { limit }.into_response();
    }
    response
}
