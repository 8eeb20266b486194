use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reelfilter_catalog_server::background_jobs::jobs::RefreshCatalogJob;
use reelfilter_catalog_server::background_jobs::{create_scheduler, JobContext};
use reelfilter_catalog_server::config::{AppConfig, CliConfig, FileConfig};
use reelfilter_catalog_server::refresh::RetryPolicy;
use reelfilter_catalog_server::search::QueryEngine;
use reelfilter_catalog_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};
use reelfilter_catalog_server::sources::{
    ContentRatingSource, KidsInMindScraper, MetadataSource, OmdbClient,
};
use reelfilter_catalog_server::{
    CatalogStore, RefreshOrchestrator, ServerStore, SqliteCatalogStore, SqliteServerStore,
};

const READ_POOL_SIZE: usize = 4;
const SCHEDULER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(35);

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding catalog.db and server.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// OMDb API key.
    #[clap(long, env = "OMDB_API_KEY")]
    pub omdb_api_key: Option<String>,

    /// Run a refresh cycle as soon as the scheduler starts.
    #[clap(long)]
    pub refresh_on_startup: bool,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            omdb_api_key: self.omdb_api_key.clone(),
            refresh_on_startup: self.refresh_on_startup,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    metrics::init_metrics();

    info!("Opening catalog store at {:?}", config.catalog_db_path());
    let catalog_store: Arc<dyn CatalogStore> = Arc::new(SqliteCatalogStore::new(
        config.catalog_db_path(),
        READ_POOL_SIZE,
    )?);
    info!("Opening server store at {:?}", config.server_db_path());
    let server_store: Arc<dyn ServerStore> =
        Arc::new(SqliteServerStore::new(config.server_db_path())?);

    match catalog_store.count_entries() {
        Ok(count) => {
            info!("Catalog holds {} entries", count);
            metrics::set_catalog_entries(count);
        }
        Err(e) => warn!("Could not count catalog entries: {:#}", e),
    }

    let shutdown_token = CancellationToken::new();

    // Blocking HTTP clients must be built off the async runtime.
    let sources_settings = config.sources.clone();
    let movie_retry = RetryPolicy::new(&config.refresh);
    let sources_shutdown = shutdown_token.child_token();
    let (ratings, metadata) = tokio::task::spawn_blocking(move || -> Result<_> {
        let ratings: Arc<dyn ContentRatingSource> = Arc::new(
            KidsInMindScraper::new(&sources_settings)?.with_retry(movie_retry, sources_shutdown),
        );
        let metadata: Arc<dyn MetadataSource> = Arc::new(OmdbClient::new(&sources_settings)?);
        Ok((ratings, metadata))
    })
    .await??;

    let orchestrator = Arc::new(RefreshOrchestrator::new(
        ratings,
        metadata,
        catalog_store.clone(),
        server_store.clone(),
        &config.matching,
        &config.refresh,
    ));

    let job_context = JobContext::new(
        shutdown_token.child_token(),
        catalog_store.clone(),
        server_store.clone(),
    );
    let (mut scheduler, scheduler_handle) =
        create_scheduler(server_store.clone(), shutdown_token.clone(), job_context);
    scheduler
        .register_job(Arc::new(RefreshCatalogJob::new(
            orchestrator,
            &config.refresh,
        )))
        .await;

    let scheduler_task = tokio::spawn(async move {
        scheduler.run().await;
    });

    let query_engine = QueryEngine::new(
        catalog_store.clone(),
        config.search.clone(),
        config.matching.auto_accept_threshold,
    );
    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        metrics_port: config.metrics_port,
    };

    let server = run_server(
        server_config,
        catalog_store,
        server_store,
        query_engine,
        Some(scheduler_handle),
        shutdown_token.clone(),
    );

    let result = tokio::select! {
        result = server => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
    };

    shutdown_token.cancel();
    match tokio::time::timeout(SCHEDULER_SHUTDOWN_TIMEOUT, scheduler_task).await {
        Ok(Ok(())) => info!("Scheduler stopped"),
        Ok(Err(e)) => error!("Scheduler task failed: {}", e),
        Err(_) => warn!("Scheduler did not stop within {:?}", SCHEDULER_SHUTDOWN_TIMEOUT),
    }

    result
}
