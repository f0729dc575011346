//! Security response headers.
//!
//! Applies the usual hardening set to every response. The
//! content-security-policy and cross-origin-embedder-policy headers are
//! only sent when configured. Headers already set downstream are kept.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::config::SecurityConfig;

const DEFAULT_HEADERS: [(&str, &str); 11] = [
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=31536000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

/// Precomputed header set.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    pub fn from_config(config: &SecurityConfig) -> Self {
        let mut headers: Vec<(HeaderName, HeaderValue)> = DEFAULT_HEADERS
            .into_iter()
            .map(|(name, value)| {
                (
                    HeaderName::from_static(name),
                    HeaderValue::from_static(value),
                )
            })
            .collect();

        let optional = [
            ("content-security-policy", &config.content_security_policy),
            ("cross-origin-embedder-policy", &config.cross_origin_embedder_policy),
        ];
        for (name, value) in optional {
            let Some(value) = value else { continue };
            match HeaderValue::from_str(value) {
                Ok(value) => headers.push((HeaderName::from_static(name), value)),
                Err(_) => tracing::warn!(header = name, "Ignoring invalid security header value"),
            }
        }

        Self { headers }
    }

    pub fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            if !target.contains_key(name) {
                target.insert(name.clone(), value.clone());
            }
        }
    }
}

pub async fn security_headers_middleware(
    State(headers): State<Arc<SecurityHeaders>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    headers.apply(response.headers_mut());
    response
}
