//! One-shot refresh: runs a single reconciliation cycle against the configured
//! sources and prints the resulting cycle log as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reelfilter_catalog_server::config::{AppConfig, CliConfig, FileConfig};
use reelfilter_catalog_server::refresh::RetryPolicy;
use reelfilter_catalog_server::server_store::CycleStatus;
use reelfilter_catalog_server::sources::{KidsInMindScraper, OmdbClient};
use reelfilter_catalog_server::{
    CatalogStore, RefreshOrchestrator, ServerStore, SqliteCatalogStore, SqliteServerStore,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
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

    /// OMDb API key.
    #[clap(long, env = "OMDB_API_KEY")]
    pub omdb_api_key: Option<String>,

    /// Print only the status and counts instead of the full cycle log.
    #[clap(long)]
    pub summary: bool,
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    // Logs go to stderr so stdout stays parseable.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        omdb_api_key: cli_args.omdb_api_key.clone(),
        ..Default::default()
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    let catalog_store: Arc<dyn CatalogStore> =
        Arc::new(SqliteCatalogStore::new(config.catalog_db_path(), 1)?);
    let server_store: Arc<dyn ServerStore> =
        Arc::new(SqliteServerStore::new(config.server_db_path())?);

    let cancel = CancellationToken::new();
    let orchestrator = RefreshOrchestrator::new(
        Arc::new(
            KidsInMindScraper::new(&config.sources)?
                .with_retry(RetryPolicy::new(&config.refresh), cancel.clone()),
        ),
        Arc::new(OmdbClient::new(&config.sources)?),
        catalog_store,
        server_store,
        &config.matching,
        &config.refresh,
    );

    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupted, finishing in-flight listings");
        handler_token.cancel();
    })
    .context("Failed to install interrupt handler")?;

    info!(
        "Running refresh cycle (catalog-refresh {}-{})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );
    let log = orchestrator.run_cycle(&cancel, "cli")?;

    if cli_args.summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "id": log.id,
                "status": log.status,
                "counts": log.counts,
                "errors": log.errors.len(),
            }))?
        );
    } else {
        println!("{}", serde_json::to_string_pretty(&log)?);
    }

    if log.status == CycleStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
