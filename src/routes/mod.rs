//! Route mounting.
//!
//! # Responsibilities
//! - Attach the two business route groups under their fixed prefixes
//! - Serve the built-in diagnostic endpoints
//! - Answer unmatched paths with a structured not-found
//! - Run the terminal error stage after every route
//!
//! # Design Decisions
//! - Route groups are supplied by the caller; the defaults only report
//!   collection status so the prefixes are reachable
//! - Panics are caught here and become structured 500s

pub mod diagnostics;
pub mod groups;

use axum::{middleware, routing::get, Router};
use tower_http::catch_panic::CatchPanicLayer;

use crate::http::response::{format_errors, handle_panic};
use crate::http::server::AppState;

pub const PLAYERS_PREFIX: &str = "/api/players";
pub const IDCARDS_PREFIX: &str = "/api/idcards";

/// The business route groups mounted under the fixed prefixes.
pub struct RouteGroups {
    pub players: Router<AppState>,
    pub idcards: Router<AppState>,
}

impl Default for RouteGroups {
    fn default() -> Self {
        Self {
            players: groups::collection_router("players"),
            idcards: groups::collection_router("idcards"),
        }
    }
}

/// Mount route groups and diagnostics, finishing with the error stage.
pub fn mount(state: AppState, groups: RouteGroups) -> Router {
    Router::new()
        .nest(PLAYERS_PREFIX, groups.players)
        .nest(IDCARDS_PREFIX, groups.idcards)
        .route(diagnostics::HEALTH_PATH, get(diagnostics::health))
        .route(diagnostics::TEST_PATH, get(diagnostics::liveness))
        .route("/", get(diagnostics::index))
        .route("/favicon.ico", get(diagnostics::favicon))
        .fallback(diagnostics::not_found)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(format_errors))
        .with_state(state)
}
