//! Operator routes.
//!
//! - GET /reviews
//! - GET /reviews/{id}
//! - POST /reviews/{id}/resolve
//! - POST /refresh
//! - GET /refresh/logs
//! - GET /jobs
//! - GET /jobs/{job_id}/history
//! - GET /jobs/{job_id}/audit

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::background_jobs::jobs::REFRESH_CATALOG_JOB_ID;
use crate::background_jobs::{JobError, SchedulerHandle};
use crate::catalog_store::{ScoreChange, WriteKind};
use crate::review_queue::{ReviewDecision, ReviewError, ReviewQueueEntry};
use crate::server::state::{
    GuardedReviewQueue, GuardedServerStore, OptionalSchedulerHandle, ServerState,
};

const MAX_LIMIT: usize = 100;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ResolveReviewBody {
    pub decision: ReviewDecision,
    pub resolved_by: String,
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    10
}

impl PaginationQuery {
    fn limit(&self) -> usize {
        self.limit.clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct PendingReviewsResponse {
    pub pending: Vec<ReviewQueueEntry>,
}

#[derive(Debug, Serialize)]
pub struct CatalogWrite {
    pub entry: WriteKind,
    pub scores: WriteKind,
    pub score_changes: Vec<ScoreChange>,
}

#[derive(Debug, Serialize)]
pub struct ResolveReviewResponse {
    pub entry: ReviewQueueEntry,
    /// Set for approvals.
    pub catalog_write: Option<CatalogWrite>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub job_id: String,
    pub status: String,
}

// =============================================================================
// Helpers
// =============================================================================

fn get_scheduler(handle: &OptionalSchedulerHandle) -> Result<&SchedulerHandle, Response> {
    handle
        .as_ref()
        .ok_or_else(|| (StatusCode::SERVICE_UNAVAILABLE, "Scheduler not available").into_response())
}

fn review_error_response(err: ReviewError) -> Response {
    let status = match &err {
        ReviewError::NotFound(_) => StatusCode::NOT_FOUND,
        ReviewError::ReviewConflict { .. } => StatusCode::CONFLICT,
        ReviewError::Invalid { .. } => StatusCode::BAD_REQUEST,
        ReviewError::Storage(e) => {
            error!("Review queue storage failure: {:#}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Review queue unavailable").into_response();
        }
    };
    (status, err.to_string()).into_response()
}

// =============================================================================
// Review queue
// =============================================================================

/// GET /reviews
async fn list_pending_reviews(State(queue): State<GuardedReviewQueue>) -> Response {
    match queue.list_pending() {
        Ok(pending) => Json(PendingReviewsResponse { pending }).into_response(),
        Err(e) => review_error_response(e),
    }
}

/// GET /reviews/{id}
async fn get_review(State(queue): State<GuardedReviewQueue>, Path(id): Path<String>) -> Response {
    match queue.get(&id) {
        Ok(entry) => Json(entry).into_response(),
        Err(e) => review_error_response(e),
    }
}

/// POST /reviews/{id}/resolve
async fn resolve_review(
    State(queue): State<GuardedReviewQueue>,
    Path(id): Path<String>,
    Json(body): Json<ResolveReviewBody>,
) -> Response {
    match queue.resolve(&id, body.decision, &body.resolved_by) {
        Ok(resolution) => Json(ResolveReviewResponse {
            entry: resolution.entry,
            catalog_write: resolution.upsert.map(|u| CatalogWrite {
                entry: u.entry,
                scores: u.scores,
                score_changes: u.score_changes,
            }),
        })
        .into_response(),
        Err(e) => review_error_response(e),
    }
}

// =============================================================================
// Refresh
// =============================================================================

/// POST /refresh
async fn trigger_refresh(State(scheduler): State<OptionalSchedulerHandle>) -> Response {
    let scheduler = match get_scheduler(&scheduler) {
        Ok(s) => s,
        Err(response) => return response,
    };

    match scheduler.trigger(REFRESH_CATALOG_JOB_ID).await {
        Ok(()) => {
            info!("Manual refresh triggered");
            (
                StatusCode::ACCEPTED,
                Json(TriggerResponse {
                    job_id: REFRESH_CATALOG_JOB_ID.to_string(),
                    status: "started".to_string(),
                }),
            )
                .into_response()
        }
        Err(JobError::AlreadyRunning) => {
            (StatusCode::CONFLICT, "A refresh cycle is already running").into_response()
        }
        Err(JobError::NotFound) => {
            (StatusCode::NOT_FOUND, "Refresh job not registered").into_response()
        }
        Err(e) => {
            warn!("Failed to trigger refresh: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

/// GET /refresh/logs
async fn get_refresh_logs(
    State(server_store): State<GuardedServerStore>,
    Query(pagination): Query<PaginationQuery>,
) -> Response {
    match server_store.get_recent_cycle_logs(pagination.limit()) {
        Ok(logs) => Json(logs).into_response(),
        Err(e) => {
            error!("Failed to read cycle logs: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read cycle logs").into_response()
        }
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// GET /jobs
async fn list_jobs(State(scheduler): State<OptionalSchedulerHandle>) -> Response {
    let scheduler = match get_scheduler(&scheduler) {
        Ok(s) => s,
        Err(response) => return response,
    };
    match scheduler.jobs().await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => {
            error!("Failed to list jobs: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list jobs").into_response()
        }
    }
}

/// GET /jobs/{job_id}/history
async fn get_job_history(
    State(scheduler): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
    Query(pagination): Query<PaginationQuery>,
) -> Response {
    let scheduler = match get_scheduler(&scheduler) {
        Ok(s) => s,
        Err(response) => return response,
    };
    if !scheduler.has_job(&job_id).await {
        return (StatusCode::NOT_FOUND, "Job not found").into_response();
    }
    match scheduler.history(&job_id, pagination.limit()) {
        Ok(history) => Json(history).into_response(),
        Err(e) => {
            error!("Failed to read history for {}: {:#}", job_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read job history").into_response()
        }
    }
}

/// GET /jobs/{job_id}/audit
async fn get_job_audit(
    State(scheduler): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
    Query(pagination): Query<PaginationQuery>,
) -> Response {
    let scheduler = match get_scheduler(&scheduler) {
        Ok(s) => s,
        Err(response) => return response,
    };
    if !scheduler.has_job(&job_id).await {
        return (StatusCode::NOT_FOUND, "Job not found").into_response();
    }
    match scheduler.audit(&job_id, pagination.limit(), pagination.offset) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => {
            error!("Failed to read audit log for {}: {:#}", job_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read audit log").into_response()
        }
    }
}

pub fn admin_routes() -> Router<ServerState> {
    Router::new()
        .route("/reviews", get(list_pending_reviews))
        .route("/reviews/{id}", get(get_review))
        .route("/reviews/{id}/resolve", post(resolve_review))
        .route("/refresh", post(trigger_refresh))
        .route("/refresh/logs", get(get_refresh_logs))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{job_id}/history", get(get_job_history))
        .route("/jobs/{job_id}/audit", get(get_job_audit))
}
