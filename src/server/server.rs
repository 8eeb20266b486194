use anyhow::Result;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::admin_routes::admin_routes;
use super::catalog_routes::catalog_routes;
use super::metrics::metrics_handler;
use super::{log_requests, state::*, ServerConfig};
use crate::background_jobs::SchedulerHandle;
use crate::search::QueryEngine;
use crate::server_store::RefreshCycleLog;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: &'static str,
    pub catalog_entries: Option<usize>,
}

#[derive(Serialize)]
struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub catalog_entries: usize,
    pub last_completed_cycle: Option<RefreshCycleLog>,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: env!("GIT_HASH"),
        catalog_entries: state.catalog_store.count_entries().ok(),
    };
    Json(stats)
}

/// Reports unavailable when either store cannot be read.
async fn health(
    State(catalog): State<GuardedCatalogStore>,
    State(server_store): State<GuardedServerStore>,
) -> Response {
    let catalog_entries = match catalog.count_entries() {
        Ok(count) => count,
        Err(e) => {
            error!("Health check: catalog store unavailable: {:#}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "Catalog store unavailable").into_response();
        }
    };
    super::metrics::set_catalog_entries(catalog_entries);

    let last_completed_cycle = match server_store.get_last_completed_cycle() {
        Ok(cycle) => cycle,
        Err(e) => {
            error!("Health check: server store unavailable: {:#}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "Server store unavailable").into_response();
        }
    };

    Json(HealthResponse {
        status: "ok",
        version: format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH")),
        catalog_entries,
        last_completed_cycle,
    })
    .into_response()
}

pub fn make_app(state: ServerState) -> Router {
    let app: Router = Router::new()
        .route("/", get(home))
        .route("/v1/health", get(health))
        .nest("/v1/catalog", catalog_routes())
        .nest("/v1/admin", admin_routes())
        .with_state(state.clone());

    app.layer(middleware::from_fn_with_state(state, log_requests))
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

pub async fn run_server(
    config: ServerConfig,
    catalog_store: GuardedCatalogStore,
    server_store: GuardedServerStore,
    query_engine: QueryEngine,
    scheduler_handle: Option<SchedulerHandle>,
    shutdown: CancellationToken,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let state = ServerState::new(
        config,
        catalog_store,
        server_store,
        query_engine,
        scheduler_handle,
    );
    let app = make_app(state);

    let metrics_listener =
        tokio::net::TcpListener::bind(format!("127.0.0.1:{}", metrics_port)).await?;
    let metrics_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let served = axum::serve(metrics_listener, make_metrics_app())
            .with_graceful_shutdown(metrics_shutdown.cancelled_owned())
            .await;
        if let Err(e) = served {
            error!("Metrics server stopped: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
