use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    // Feature configs
    pub matching: Option<MatchingConfig>,
    pub refresh: Option<RefreshConfig>,
    pub sources: Option<SourcesConfig>,
    pub search: Option<SearchConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MatchingConfig {
    pub auto_accept_threshold: Option<f64>,
    pub review_threshold: Option<f64>,
    pub title_weight: Option<f64>,
    pub year_weight: Option<f64>,
    pub year_tolerance: Option<i32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_hours: Option<u64>,
    pub run_on_startup: Option<bool>,
    pub max_workers: Option<usize>,
    pub max_listing_pages: Option<usize>,
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SourcesConfig {
    pub omdb_api_key: Option<String>,
    pub omdb_base_url: Option<String>,
    pub omdb_min_request_interval_ms: Option<u64>,
    pub omdb_timeout_secs: Option<u64>,
    pub omdb_max_detail_lookups: Option<usize>,
    pub kim_base_url: Option<String>,
    pub kim_min_request_interval_ms: Option<u64>,
    pub kim_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub default_per_page: Option<usize>,
    pub max_per_page: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
