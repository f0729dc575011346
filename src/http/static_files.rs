//! Static asset mounts with cache lifetimes and validators.
//!
//! `ServeDir` handles `Last-Modified` / `If-Modified-Since`. The
//! [`entity_tag`] stage adds a weak ETag derived from size and
//! modification time and answers matching `If-None-Match` with 304.

use std::path::Path;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use chrono::DateTime;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer};

use crate::http::response::format_errors;

/// A directory served with a fixed `Cache-Control: public, max-age=N`.
pub fn serve_dir<P>(dir: P, max_age_secs: u64) -> Router
where
    P: AsRef<Path>,
{
    let cache_control = HeaderValue::from_str(&format!("public, max-age={max_age_secs}"))
        .unwrap_or_else(|_| HeaderValue::from_static("public"));

    Router::new()
        .fallback_service(ServeDir::new(dir))
        .layer(middleware::from_fn(entity_tag))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            cache_control,
        ))
        .layer(middleware::from_fn(format_errors))
}

/// Weak validator `W/"<size hex>-<mtime ms hex>"` from response headers.
pub fn weak_etag(headers: &HeaderMap) -> Option<HeaderValue> {
    let len: u64 = headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()?;
    let modified = headers.get(header::LAST_MODIFIED)?.to_str().ok()?;
    let mtime = DateTime::parse_from_rfc2822(modified).ok()?.timestamp_millis();
    HeaderValue::from_str(&format!("W/\"{len:x}-{mtime:x}\"")).ok()
}

fn strip_weak(tag: &str) -> &str {
    tag.trim().trim_start_matches("W/")
}

/// `If-None-Match` evaluation using weak comparison.
pub fn none_match(if_none_match: &HeaderValue, etag: &HeaderValue) -> bool {
    let (Ok(candidates), Ok(etag)) = (if_none_match.to_str(), etag.to_str()) else {
        return false;
    };
    candidates
        .split(',')
        .any(|c| c.trim() == "*" || strip_weak(c) == strip_weak(etag))
}

/// Add an ETag to successful file responses and honour `If-None-Match`.
pub async fn entity_tag(request: Request<Body>, next: Next) -> Response {
    let if_none_match = request.headers().get(header::IF_NONE_MATCH).cloned();
    let mut response = next.run(request).await;

    if response.status() != StatusCode::OK {
        return response;
    }
    let Some(etag) = weak_etag(response.headers()) else {
        return response;
    };

    if if_none_match.is_some_and(|candidate| none_match(&candidate, &etag)) {
        let mut not_modified = StatusCode::NOT_MODIFIED.into_response();
        let headers = not_modified.headers_mut();
        headers.insert(header::ETAG, etag);
        if let Some(modified) = response.headers().get(header::LAST_MODIFIED) {
            headers.insert(header::LAST_MODIFIED, modified.clone());
        }
        return not_modified;
    }

    response.headers_mut().insert(header::ETAG, etag);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("255"));
        headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        headers
    }

    #[test]
    fn etag_from_size_and_mtime() {
        let etag = weak_etag(&file_headers()).unwrap();
        // 1445412480000 ms
        assert_eq!(etag, "W/\"ff-150894c2400\"");
        assert!(weak_etag(&HeaderMap::new()).is_none());
    }

    #[test]
    fn none_match_uses_weak_comparison() {
        let etag = HeaderValue::from_static("W/\"ff-1\"");
        assert!(none_match(&HeaderValue::from_static("\"ff-1\""), &etag));
        assert!(none_match(&HeaderValue::from_static("\"aa\", W/\"ff-1\""), &etag));
        assert!(none_match(&HeaderValue::from_static("*"), &etag));
        assert!(!none_match(&HeaderValue::from_static("W/\"ff-2\""), &etag));
    }
}
