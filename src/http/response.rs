//! Terminal error formatting.
//!
//! Handlers report failures through [`AppError`](crate::http::error::AppError).
//! Anything else that produces an error status without a JSON body
//! (extractor rejections, static file misses, panics) is rewritten here
//! into the same structured shape so clients only ever see one format.

use std::any::Any;

use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::error::error_response;

/// Upper bound on an error body we are willing to re-read.
const MAX_ERROR_BODY: usize = 64 * 1024;

pub(crate) fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

/// Rewrite unstructured error responses.
pub async fn format_errors(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) || is_json(response.headers()) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let text = axum::body::to_bytes(body, MAX_ERROR_BODY)
        .await
        .map(|b| String::from_utf8_lossy(&b).trim().to_string())
        .unwrap_or_default();

    let message = if status.is_server_error() || text.is_empty() {
        status.canonical_reason().unwrap_or("Error").to_string()
    } else {
        text
    };

    if status.is_server_error() {
        tracing::error!(%method, %path, status = %status, "Unhandled request failure");
    }

    let mut formatted = error_response(status, message);
    for (name, value) in parts.headers.iter() {
        if name != header::CONTENT_TYPE && name != header::CONTENT_LENGTH {
            formatted.headers_mut().append(name.clone(), value.clone());
        }
    }
    formatted
}

/// Convert a handler panic into a structured 500.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "Request handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}
