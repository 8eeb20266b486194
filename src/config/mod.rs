mod file_config;

pub use file_config::{
    FileConfig, MatchingConfig, RefreshConfig, SearchConfig, SourcesConfig,
};

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub omdb_api_key: Option<String>,
    pub refresh_on_startup: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    // Feature configs (with defaults)
    pub matching: MatchingSettings,
    pub refresh: RefreshSettings,
    pub sources: SourcesSettings,
    pub search: SearchSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let matching = MatchingSettings::from_file(file.matching.unwrap_or_default());
        matching.validate()?;

        let mut refresh = RefreshSettings::from_file(file.refresh.unwrap_or_default());
        if cli.refresh_on_startup {
            refresh.run_on_startup = true;
        }
        refresh.validate()?;

        let sources = SourcesSettings::from_file(
            file.sources.unwrap_or_default(),
            cli.omdb_api_key.clone(),
        );

        let search = SearchSettings::from_file(file.search.unwrap_or_default());
        search.validate()?;

        Ok(Self {
            db_dir,
            port,
            metrics_port,
            logging_level,
            matching,
            refresh,
            sources,
            search,
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("catalog.db")
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.db_dir.join("server.db")
    }
}

// =============================================================================
// Matching
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MatchingSettings {
    /// Confidence strictly above this is accepted without review.
    pub auto_accept_threshold: f64,
    /// Confidence at or above this (and not auto-accepted) needs review.
    pub review_threshold: f64,
    pub title_weight: f64,
    pub year_weight: f64,
    /// Maximum year difference that still earns the year bonus.
    pub year_tolerance: i32,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            auto_accept_threshold: 88.0,
            review_threshold: 75.0,
            title_weight: 0.7,
            year_weight: 0.3,
            year_tolerance: 1,
        }
    }
}

impl MatchingSettings {
    fn from_file(file: MatchingConfig) -> Self {
        let defaults = Self::default();
        Self {
            auto_accept_threshold: file
                .auto_accept_threshold
                .unwrap_or(defaults.auto_accept_threshold),
            review_threshold: file.review_threshold.unwrap_or(defaults.review_threshold),
            title_weight: file.title_weight.unwrap_or(defaults.title_weight),
            year_weight: file.year_weight.unwrap_or(defaults.year_weight),
            year_tolerance: file.year_tolerance.unwrap_or(defaults.year_tolerance),
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.review_threshold)
            || !(0.0..=100.0).contains(&self.auto_accept_threshold)
        {
            bail!("matching thresholds must be within 0..=100");
        }
        if self.review_threshold > self.auto_accept_threshold {
            bail!(
                "matching.review_threshold ({}) must not exceed auto_accept_threshold ({})",
                self.review_threshold,
                self.auto_accept_threshold
            );
        }
        if self.title_weight < 0.0 || self.year_weight < 0.0 {
            bail!("matching weights must not be negative");
        }
        if (self.title_weight + self.year_weight - 1.0).abs() > 1e-6 {
            bail!("matching.title_weight + matching.year_weight must equal 1.0");
        }
        if self.year_tolerance < 0 {
            bail!("matching.year_tolerance must not be negative");
        }
        Ok(())
    }
}

// =============================================================================
// Refresh
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSettings {
    pub interval_hours: u64,
    pub run_on_startup: bool,
    /// Upper bound on concurrently processed listings.
    pub max_workers: usize,
    /// Upper bound on content-rating listing pages read per cycle.
    pub max_listing_pages: usize,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval_hours: 24 * 7,
            run_on_startup: false,
            max_workers: 4,
            max_listing_pages: 5,
            max_retries: 3,
            initial_backoff_ms: 2000,
            max_backoff_ms: 8000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RefreshSettings {
    fn from_file(file: RefreshConfig) -> Self {
        let defaults = Self::default();
        Self {
            interval_hours: file.interval_hours.unwrap_or(defaults.interval_hours),
            run_on_startup: file.run_on_startup.unwrap_or(defaults.run_on_startup),
            max_workers: file.max_workers.unwrap_or(defaults.max_workers),
            max_listing_pages: file
                .max_listing_pages
                .unwrap_or(defaults.max_listing_pages),
            max_retries: file.max_retries.unwrap_or(defaults.max_retries),
            initial_backoff_ms: file
                .initial_backoff_ms
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: file.max_backoff_ms.unwrap_or(defaults.max_backoff_ms),
            backoff_multiplier: file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            bail!("refresh.max_workers must be at least 1");
        }
        if self.max_listing_pages == 0 {
            bail!("refresh.max_listing_pages must be at least 1");
        }
        if self.interval_hours == 0 {
            bail!("refresh.interval_hours must be at least 1");
        }
        if self.backoff_multiplier < 1.0 {
            bail!("refresh.backoff_multiplier must be >= 1.0");
        }
        Ok(())
    }
}

// =============================================================================
// Sources
// =============================================================================

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; Reel-Filter/1.0; +https://github.com/reel-filter/reel-filter)";

#[derive(Debug, Clone, PartialEq)]
pub struct SourcesSettings {
    pub omdb_api_key: Option<String>,
    pub omdb_base_url: String,
    pub omdb_min_request_interval_ms: u64,
    pub omdb_timeout_secs: u64,
    /// Full-detail lookups per title search.
    pub omdb_max_detail_lookups: usize,
    pub kim_base_url: String,
    pub kim_min_request_interval_ms: u64,
    pub kim_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SourcesSettings {
    fn default() -> Self {
        Self {
            omdb_api_key: None,
            omdb_base_url: "https://www.omdbapi.com/".to_string(),
            omdb_min_request_interval_ms: 100,
            omdb_timeout_secs: 10,
            omdb_max_detail_lookups: 3,
            kim_base_url: "https://kids-in-mind.com".to_string(),
            kim_min_request_interval_ms: 2000,
            kim_timeout_secs: 15,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl SourcesSettings {
    fn from_file(file: SourcesConfig, cli_api_key: Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            omdb_api_key: file
                .omdb_api_key
                .or(cli_api_key)
                .filter(|k| !k.trim().is_empty()),
            omdb_base_url: file.omdb_base_url.unwrap_or(defaults.omdb_base_url),
            omdb_min_request_interval_ms: file
                .omdb_min_request_interval_ms
                .unwrap_or(defaults.omdb_min_request_interval_ms),
            omdb_timeout_secs: file.omdb_timeout_secs.unwrap_or(defaults.omdb_timeout_secs),
            omdb_max_detail_lookups: file
                .omdb_max_detail_lookups
                .unwrap_or(defaults.omdb_max_detail_lookups),
            kim_base_url: file.kim_base_url.unwrap_or(defaults.kim_base_url),
            kim_min_request_interval_ms: file
                .kim_min_request_interval_ms
                .unwrap_or(defaults.kim_min_request_interval_ms),
            kim_timeout_secs: file.kim_timeout_secs.unwrap_or(defaults.kim_timeout_secs),
            user_agent: file.user_agent.unwrap_or(defaults.user_agent),
        }
    }
}

// =============================================================================
// Search
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub default_per_page: usize,
    pub max_per_page: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_per_page: 20,
            max_per_page: 100,
        }
    }
}

impl SearchSettings {
    fn from_file(file: SearchConfig) -> Self {
        let defaults = Self::default();
        Self {
            default_per_page: file.default_per_page.unwrap_or(defaults.default_per_page),
            max_per_page: file.max_per_page.unwrap_or(defaults.max_per_page),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.default_per_page == 0 || self.default_per_page > self.max_per_page {
            bail!(
                "search.default_per_page must be within 1..={}",
                self.max_per_page
            );
        }
        Ok(())
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli_for(dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(dir.path().to_path_buf()),
            port: 3001,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Headers,
            omdb_api_key: Some("cli-key".to_string()),
            refresh_on_startup: false,
        }
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("PATH"),
            Some(RequestsLoggingLevel::Path)
        ));
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_resolve_cli_only_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli_for(&temp_dir), None).unwrap();

        assert_eq!(config.port, 3001);
        assert_eq!(config.metrics_port, 9091);
        assert!(matches!(config.logging_level, RequestsLoggingLevel::Headers));
        assert_eq!(config.matching, MatchingSettings::default());
        assert_eq!(config.refresh, RefreshSettings::default());
        assert_eq!(config.search, SearchSettings::default());
        assert_eq!(config.sources.omdb_api_key.as_deref(), Some("cli-key"));
        assert_eq!(config.catalog_db_path(), temp_dir.path().join("catalog.db"));
        assert_eq!(config.server_db_path(), temp_dir.path().join("server.db"));
    }

    #[test]
    fn test_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let file: FileConfig = toml::from_str(
            r#"
            port = 4000
            logging_level = "body"

            [matching]
            auto_accept_threshold = 90.0

            [refresh]
            max_workers = 2
            run_on_startup = true

            [sources]
            omdb_api_key = "file-key"
            kim_min_request_interval_ms = 500

            [search]
            max_per_page = 50
            "#,
        )
        .unwrap();

        let config = AppConfig::resolve(&cli_for(&temp_dir), Some(file)).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.metrics_port, 9091);
        assert!(matches!(config.logging_level, RequestsLoggingLevel::Body));
        assert_eq!(config.matching.auto_accept_threshold, 90.0);
        assert_eq!(config.matching.review_threshold, 75.0);
        assert_eq!(config.refresh.max_workers, 2);
        assert!(config.refresh.run_on_startup);
        assert_eq!(config.sources.omdb_api_key.as_deref(), Some("file-key"));
        assert_eq!(config.sources.kim_min_request_interval_ms, 500);
        assert_eq!(config.search.max_per_page, 50);
    }

    #[test]
    fn test_missing_db_dir_fails() {
        let cli = CliConfig::default();
        assert!(AppConfig::resolve(&cli, None).is_err());

        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/definitely/not/here")),
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err().to_string();
        assert!(err.contains("does not exist"));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file: FileConfig = toml::from_str(
            r#"
            [matching]
            auto_accept_threshold = 70.0
            review_threshold = 80.0
            "#,
        )
        .unwrap();
        assert!(AppConfig::resolve(&cli_for(&temp_dir), Some(file)).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file: FileConfig = toml::from_str("[refresh]\nmax_workers = 0\n").unwrap();
        assert!(AppConfig::resolve(&cli_for(&temp_dir), Some(file)).is_err());
    }

    #[test]
    fn test_blank_api_key_is_treated_as_missing() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = cli_for(&temp_dir);
        cli.omdb_api_key = Some("   ".to_string());
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert!(config.sources.omdb_api_key.is_none());
    }
}
