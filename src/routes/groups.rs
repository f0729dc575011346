//! Default business route groups.
//!
//! Each group answers `GET /` with the state of its backing collection.
//! Deployments mount their own handlers through
//! [`RouteGroups`](crate::routes::RouteGroups) instead.

use axum::{extract::State, routing::get, Json, Router};
use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use crate::http::error::AppError;
use crate::http::server::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionStatus {
    pub success: bool,
    pub collection: String,
    pub count: u64,
}

/// A router reporting on `collection`.
pub fn collection_router(collection: &'static str) -> Router<AppState> {
    Router::new().route(
        "/",
        get(move |state: State<AppState>| collection_status(state, collection)),
    )
}

async fn collection_status(
    State(state): State<AppState>,
    collection: &'static str,
) -> Result<Json<CollectionStatus>, AppError> {
    let db = state.db.database()?;
    let count = db
        .collection::<Document>(collection)
        .estimated_document_count()
        .await
        .map_err(|err| {
            tracing::error!(collection, error = %err, "Collection count failed");
            AppError::DatabaseUnavailable
        })?;

    Ok(Json(CollectionStatus {
        success: true,
        collection: collection.to_string(),
        count,
    }))
}
