//! Catalog read routes.
//!
//! - GET /search
//! - GET /entry/{natural_key}
//! - GET /genres

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{debug, error};

use crate::catalog_store::{CatalogHit, ScoreChange};
use crate::search::{SearchError, SearchParams};
use crate::server::metrics;
use crate::server::state::{GuardedCatalogStore, GuardedQueryEngine, ServerState};

#[derive(Debug, Serialize)]
pub struct EntryDetailResponse {
    #[serde(flatten)]
    pub hit: CatalogHit,
    /// Whether the content scores are trusted by content filters.
    pub scores_authoritative: bool,
    pub score_changes: Vec<ScoreChange>,
}

#[derive(Debug, Serialize)]
pub struct GenresResponse {
    pub genres: Vec<String>,
}

pub(super) fn search_error_response(err: SearchError) -> Response {
    match err {
        SearchError::InvalidFilter(reason) => {
            debug!("Rejected search: {}", reason);
            (StatusCode::BAD_REQUEST, reason).into_response()
        }
        SearchError::Storage(e) => {
            error!("Search failed: {:#}", e);
            metrics::record_error("storage", "/v1/catalog/search");
            (StatusCode::INTERNAL_SERVER_ERROR, "Search failed").into_response()
        }
    }
}

/// GET /search
async fn search(
    State(engine): State<GuardedQueryEngine>,
    Query(params): Query<SearchParams>,
) -> Response {
    let (filters, page) = match params.into_request(engine.settings()) {
        Ok(request) => request,
        Err(e) => return search_error_response(e),
    };
    match engine.search(&filters, &page) {
        Ok(results) => Json(results).into_response(),
        Err(e) => search_error_response(e),
    }
}

/// GET /entry/{natural_key}
async fn get_entry(
    State(catalog): State<GuardedCatalogStore>,
    State(engine): State<GuardedQueryEngine>,
    Path(natural_key): Path<String>,
) -> Response {
    let hit = match catalog.get_entry(&natural_key) {
        Ok(Some(hit)) => hit,
        Ok(None) => return (StatusCode::NOT_FOUND, "Entry not found").into_response(),
        Err(e) => {
            error!("Failed to load entry {}: {:#}", natural_key, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to load entry").into_response();
        }
    };
    let score_changes = match catalog.get_score_changes(&natural_key) {
        Ok(changes) => changes,
        Err(e) => {
            error!("Failed to load score changes for {}: {:#}", natural_key, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to load entry").into_response();
        }
    };
    let scores_authoritative = hit
        .content_scores
        .as_ref()
        .map(|s| s.is_authoritative(engine.authority_threshold()))
        .unwrap_or(false);

    Json(EntryDetailResponse {
        hit,
        scores_authoritative,
        score_changes,
    })
    .into_response()
}

/// GET /genres
async fn get_genres(State(catalog): State<GuardedCatalogStore>) -> Response {
    match catalog.list_genres() {
        Ok(genres) => Json(GenresResponse { genres }).into_response(),
        Err(e) => {
            error!("Failed to list genres: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list genres").into_response()
        }
    }
}

pub fn catalog_routes() -> Router<ServerState> {
    Router::new()
        .route("/search", get(search))
        .route("/entry/{natural_key}", get(get_entry))
        .route("/genres", get(get_genres))
}
