//! Built-in diagnostic endpoints.
//!
//! Each endpoint sets its own public cache lifetime. `/favicon.ico`
//! answers 204 so browsers stop asking.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::http::error::AppError;
use crate::http::server::AppState;
use crate::routes::{IDCARDS_PREFIX, PLAYERS_PREFIX};

pub const HEALTH_PATH: &str = "/api/health";
pub const TEST_PATH: &str = "/api/test";

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthReport {
    pub message: String,
    pub timestamp: String,
    pub uptime: f64,
    pub database: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TestReport {
    pub message: String,
    pub timestamp: String,
    pub environment: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Endpoints {
    pub health: String,
    pub test: String,
    pub players: String,
    pub idcards: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub message: String,
    pub version: String,
    pub endpoints: Endpoints,
}

fn cache_for(max_age_secs: u64) -> [(header::HeaderName, String); 1] {
    [(header::CACHE_CONTROL, format!("public, max-age={max_age_secs}"))]
}

/// ISO-8601 UTC with millisecond precision.
fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = HealthReport {
        message: "Para Sports ID Card API is running!".to_string(),
        timestamp: now_iso(),
        uptime: state.started_at.elapsed().as_secs_f64(),
        database: state.db.status().as_str().to_string(),
    };
    (cache_for(30), Json(report))
}

pub async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    let report = TestReport {
        message: "Server is working!".to_string(),
        timestamp: now_iso(),
        environment: state.runtime.environment.name().to_string(),
    };
    (cache_for(60), Json(report))
}

pub async fn index() -> impl IntoResponse {
    let info = ServiceInfo {
        message: "Para Sports ID Card Generator API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: Endpoints {
            health: HEALTH_PATH.to_string(),
            test: TEST_PATH.to_string(),
            players: PLAYERS_PREFIX.to_string(),
            idcards: IDCARDS_PREFIX.to_string(),
        },
    };
    (cache_for(300), Json(info))
}

/// Browsers request this unprompted; answer without logging a miss.
pub async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn not_found() -> AppError {
    AppError::NotFound("Not found".to_string())
}
