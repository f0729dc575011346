//! The ordered middleware pipeline.
//!
//! Stages run in [`STAGES`] order for every request. The order matters:
//! headers are attached even to rejected requests, compression sees the
//! final body, and rate limiting happens before CORS so blocked origins
//! still count against their client.
//!
//! ```text
//! request → security headers → compression → rate limit → CORS
//!         → body parsing → static assets | routes
//! ```

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, middleware, Router};
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer};

use crate::config::{RuntimeConfig, ServerConfig, StaticFilesConfig};
use crate::http::request::{capture_raw_body, structured_limit_errors};
use crate::http::static_files;
use crate::security::{
    cors::reject_unlisted_origin, headers::security_headers_middleware,
    rate_limit::rate_limit_middleware, CorsPolicy, RateLimiter, SecurityHeaders,
};

/// A named request-processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SecurityHeaders,
    Compression,
    RateLimit,
    Cors,
    BodyParsing,
    StaticAssets,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::SecurityHeaders => "security-headers",
            Stage::Compression => "compression",
            Stage::RateLimit => "rate-limit",
            Stage::Cors => "cors",
            Stage::BodyParsing => "body-parsing",
            Stage::StaticAssets => "static-assets",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Execution order, outermost first.
pub const STAGES: [Stage; 6] = [
    Stage::SecurityHeaders,
    Stage::Compression,
    Stage::RateLimit,
    Stage::Cors,
    Stage::BodyParsing,
    Stage::StaticAssets,
];

/// Mount point for user uploads.
pub const UPLOADS_PATH: &str = "/uploads";
/// Mount point for generated ID cards.
pub const IDCARDS_PATH: &str = "/idcards";

/// Stage state, built once at startup.
#[derive(Debug, Clone)]
pub struct Pipeline {
    security: Arc<SecurityHeaders>,
    limiter: Arc<RateLimiter>,
    cors: CorsPolicy,
    body_limit: usize,
    static_files: StaticFilesConfig,
}

impl Pipeline {
    pub fn new(runtime: &RuntimeConfig, settings: &ServerConfig) -> Self {
        Self {
            security: Arc::new(SecurityHeaders::from_config(&settings.security)),
            limiter: Arc::new(RateLimiter::new(settings.rate_limit.clone())),
            cors: CorsPolicy::new(&runtime.allowed_origins),
            body_limit: settings.body.max_bytes,
            static_files: settings.static_files.clone(),
        }
    }

    pub fn stages(&self) -> &'static [Stage] {
        &STAGES
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    pub fn cors(&self) -> &CorsPolicy {
        &self.cors
    }

    /// Create the uploads directory if it does not exist yet.
    pub fn prepare_directories(&self) -> io::Result<()> {
        let uploads = Path::new(&self.static_files.uploads_dir);
        if !uploads.exists() {
            std::fs::create_dir_all(uploads)?;
            tracing::info!(path = %uploads.display(), "Created uploads directory");
        }
        Ok(())
    }

    /// Wrap `routes` in every stage.
    ///
    /// Axum layers wrap from the inside out, so stages are applied in
    /// reverse to end up executing in [`STAGES`] order.
    pub fn assemble(&self, routes: Router) -> Router {
        self.stages()
            .iter()
            .rev()
            .fold(routes, |router, stage| {
                tracing::debug!(stage = %stage, "Installing pipeline stage");
                self.apply(*stage, router)
            })
    }

    fn apply(&self, stage: Stage, router: Router) -> Router {
        match stage {
            Stage::StaticAssets => router
                .nest_service(
                    UPLOADS_PATH,
                    static_files::serve_dir(
                        &self.static_files.uploads_dir,
                        self.static_files.uploads_max_age_secs,
                    ),
                )
                .nest_service(
                    IDCARDS_PATH,
                    static_files::serve_dir(
                        &self.static_files.idcards_dir,
                        self.static_files.idcards_max_age_secs,
                    ),
                ),
            Stage::BodyParsing => router
                .layer(middleware::from_fn_with_state(self.body_limit, capture_raw_body))
                .layer(DefaultBodyLimit::max(self.body_limit))
                .layer(RequestBodyLimitLayer::new(self.body_limit))
                .layer(middleware::from_fn_with_state(
                    self.body_limit,
                    structured_limit_errors,
                )),
            Stage::Cors => router
                .layer(self.cors.layer())
                .layer(middleware::from_fn_with_state(
                    self.cors.clone(),
                    reject_unlisted_origin,
                )),
            Stage::RateLimit => router.layer(middleware::from_fn_with_state(
                self.limiter.clone(),
                rate_limit_middleware,
            )),
            Stage::Compression => router.layer(CompressionLayer::new()),
            Stage::SecurityHeaders => router.layer(middleware::from_fn_with_state(
                self.security.clone(),
                security_headers_middleware,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_fixed() {
        let names: Vec<_> = STAGES.iter().map(Stage::name).collect();
        assert_eq!(
            names,
            vec![
                "security-headers",
                "compression",
                "rate-limit",
                "cors",
                "body-parsing",
                "static-assets",
            ]
        );
    }

    #[test]
    fn creates_missing_uploads_directory() {
        let root = tempfile::tempdir().unwrap();
        let uploads = root.path().join("nested").join("uploads");

        let mut settings = ServerConfig::default();
        settings.static_files.uploads_dir = uploads.to_string_lossy().to_string();
        let runtime = RuntimeConfig::from_lookup(|_| None);

        let pipeline = Pipeline::new(&runtime, &settings);
        pipeline.prepare_directories().unwrap();
        assert!(uploads.is_dir());
        // Second call is a no-op.
        pipeline.prepare_directories().unwrap();
    }
}
