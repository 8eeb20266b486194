//! OMDb API client, the metadata source.
//!
//! Rate limited to 10 requests per second by default.

use super::models::SourceError;
use super::rate_limit::RequestSpacing;
use super::MetadataSource;
use crate::catalog_store::{ContentClassification, MovieMetadata};
use crate::config::SourcesSettings;
use anyhow::{bail, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const NOT_AVAILABLE: &str = "N/A";

lazy_static! {
    static ref WINS: Regex = Regex::new(r"(?i)(\d+)\s*wins?").unwrap();
    static ref WON: Regex = Regex::new(r"(?i)Won\s+(\d+)").unwrap();
    static ref NOMINATIONS: Regex = Regex::new(r"(?i)(\d+)\s*nomination").unwrap();
    static ref NOMINATED_FOR: Regex = Regex::new(r"(?i)Nominated\s+for\s+(\d+)").unwrap();
}

pub struct OmdbClient {
    client: Client,
    base_url: String,
    api_key: String,
    spacing: RequestSpacing,
    max_detail_lookups: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "Search", default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "imdbID")]
    imdb_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct OmdbRating {
    #[serde(rename = "Source", default)]
    source: String,
    #[serde(rename = "Value", default)]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct OmdbMovie {
    #[serde(rename = "imdbID")]
    imdb_id: Option<String>,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Year")]
    year: Option<String>,
    #[serde(rename = "Rated")]
    rated: Option<String>,
    #[serde(rename = "Runtime")]
    runtime: Option<String>,
    #[serde(rename = "Genre")]
    genre: Option<String>,
    #[serde(rename = "Director")]
    director: Option<String>,
    #[serde(rename = "Actors")]
    actors: Option<String>,
    #[serde(rename = "Plot")]
    plot: Option<String>,
    #[serde(rename = "Awards")]
    awards: Option<String>,
    #[serde(rename = "Poster")]
    poster: Option<String>,
    #[serde(rename = "Ratings", default)]
    ratings: Vec<OmdbRating>,
    #[serde(rename = "Metascore")]
    metascore: Option<String>,
    #[serde(rename = "imdbRating")]
    imdb_rating: Option<String>,
}

/// "N/A" and blank strings are absent values.
fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != NOT_AVAILABLE)
}

fn comma_list(value: &Option<String>) -> Vec<String> {
    present(value)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// First year of "2008", "2008–2013" or "2008-".
fn parse_year(value: &Option<String>) -> Option<i32> {
    let raw = present(value)?;
    let first: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    first.parse().ok()
}

fn parse_runtime(value: &Option<String>) -> Option<i32> {
    present(value)?.trim_end_matches("min").trim().parse().ok()
}

fn sum_captures(re: &Regex, text: &str) -> i32 {
    re.captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<i32>().ok())
        .sum()
}

/// Win and nomination counts from an awards summary such as
/// "Won 4 Oscars. 42 wins & 51 nominations total".
pub(crate) fn parse_awards(text: &str) -> (i32, i32) {
    let wins = sum_captures(&WINS, text) + sum_captures(&WON, text);
    let nominations = sum_captures(&NOMINATIONS, text) + sum_captures(&NOMINATED_FOR, text);
    (wins, nominations)
}

impl OmdbMovie {
    fn into_metadata(self) -> Option<MovieMetadata> {
        let natural_key = present(&self.imdb_id)?.to_string();
        let title = present(&self.title)?.to_string();

        let mut metadata = MovieMetadata::new(natural_key, title, parse_year(&self.year));
        metadata.genres = comma_list(&self.genre);
        metadata.cast = comma_list(&self.actors);
        metadata.classification = present(&self.rated)
            .map(ContentClassification::from_upstream)
            .unwrap_or(ContentClassification::NotRated);
        metadata.runtime_minutes = parse_runtime(&self.runtime);
        metadata.imdb_rating = present(&self.imdb_rating).and_then(|r| r.parse().ok());

        for rating in &self.ratings {
            if rating.source.contains("Rotten Tomatoes") {
                metadata.rotten_tomatoes = rating.value.trim().trim_end_matches('%').parse().ok();
            } else if rating.source.contains("Metacritic") {
                metadata.metacritic = rating
                    .value
                    .split('/')
                    .next()
                    .and_then(|v| v.trim().parse().ok());
            }
        }
        if metadata.metacritic.is_none() {
            metadata.metacritic = present(&self.metascore).and_then(|m| m.parse().ok());
        }

        metadata.awards_summary = present(&self.awards).map(str::to_string);
        if let Some(summary) = &metadata.awards_summary {
            let (wins, nominations) = parse_awards(summary);
            metadata.award_wins = wins;
            metadata.award_nominations = nominations;
        }
        metadata.poster_url = present(&self.poster).map(str::to_string);
        metadata.plot = present(&self.plot).map(str::to_string);
        metadata.director = present(&self.director).map(str::to_string);

        Some(metadata.sanitized())
    }
}

/// Body-level outcome of an OMDb call: `Ok(None)` for "not found".
fn interpret_body(body: serde_json::Value) -> Result<Option<serde_json::Value>, SourceError> {
    if body.get("Response").and_then(|r| r.as_str()) != Some("False") {
        return Ok(Some(body));
    }
    let message = body
        .get("Error")
        .and_then(|e| e.as_str())
        .unwrap_or("Unknown error")
        .to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("not found") {
        Ok(None)
    } else if lowered.contains("request limit") {
        Err(SourceError::RateLimited { retry_after: None })
    } else if lowered.contains("api key") {
        Err(SourceError::Unauthorized(format!("OMDb error: {}", message)))
    } else {
        Err(SourceError::SourceUnreachable(format!("OMDb error: {}", message)))
    }
}

fn retry_after(response: &reqwest::blocking::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

impl OmdbClient {
    pub fn new(settings: &SourcesSettings) -> Result<Self> {
        let Some(api_key) = settings.omdb_api_key.clone() else {
            bail!("OMDb API key not configured (set OMDB_API_KEY or sources.omdb_api_key)");
        };

        let client = Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.omdb_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.omdb_base_url.clone(),
            api_key,
            spacing: RequestSpacing::new(Duration::from_millis(
                settings.omdb_min_request_interval_ms,
            )),
            max_detail_lookups: settings.omdb_max_detail_lookups.max(1),
        })
    }

    fn request(&self, query: &[(&str, String)]) -> Result<Option<serde_json::Value>, SourceError> {
        self.spacing.wait();

        let mut url = format!(
            "{}?apikey={}",
            self.base_url,
            urlencoding::encode(&self.api_key)
        );
        for (key, value) in query {
            url.push_str(&format!("&{}={}", key, urlencoding::encode(value)));
        }

        let response = self.client.get(&url).send()?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(SourceError::RateLimited {
                retry_after: retry_after(&response),
            });
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::UNAUTHORIZED {
            // OMDb answers a bad key with 401 and a JSON body explaining it.
            let message = response
                .json::<serde_json::Value>()
                .ok()
                .and_then(|body| body.get("Error")?.as_str().map(str::to_string))
                .unwrap_or_else(|| "API key rejected".to_string());
            return Err(SourceError::Unauthorized(format!("OMDb error: {}", message)));
        }
        if !status.is_success() {
            return Err(SourceError::SourceUnreachable(format!(
                "OMDb responded with status {}",
                status
            )));
        }

        let body: serde_json::Value = response.json()?;
        interpret_body(body)
    }

    fn search(&self, title: &str, year: Option<i32>) -> Result<Vec<String>, SourceError> {
        let mut query = vec![("s", title.to_string()), ("type", "movie".to_string())];
        if let Some(year) = year {
            query.push(("y", year.to_string()));
        }
        let Some(body) = self.request(&query)? else {
            return Ok(Vec::new());
        };
        let parsed: SearchResponse = serde_json::from_value(body)
            .map_err(|e| SourceError::malformed(title, e.to_string()))?;
        Ok(parsed.search.into_iter().map(|hit| hit.imdb_id).collect())
    }

    /// Full details for one IMDb id, None when OMDb does not know it.
    pub fn get_by_imdb_id(&self, imdb_id: &str) -> Result<Option<MovieMetadata>, SourceError> {
        let query = [("i", imdb_id.to_string()), ("plot", "full".to_string())];
        let Some(body) = self.request(&query)? else {
            return Ok(None);
        };
        let movie: OmdbMovie = serde_json::from_value(body)
            .map_err(|e| SourceError::malformed(imdb_id, e.to_string()))?;
        Ok(movie.into_metadata())
    }
}

impl MetadataSource for OmdbClient {
    fn find_candidates(
        &self,
        title: &str,
        year_hint: Option<i32>,
    ) -> Result<Vec<MovieMetadata>, SourceError> {
        let mut ids = self.search(title, year_hint)?;
        if ids.is_empty() && year_hint.is_some() {
            // Release years differ by one between sources often enough.
            ids = self.search(title, None)?;
        }
        ids.dedup();

        let mut candidates = Vec::new();
        for id in ids.iter().take(self.max_detail_lookups) {
            match self.get_by_imdb_id(id) {
                Ok(Some(metadata)) => candidates.push(metadata),
                Ok(None) => debug!("OMDb lost track of {} between search and lookup", id),
                Err(err @ SourceError::MalformedListing { .. }) => {
                    warn!("Skipping malformed OMDb record {}: {}", id, err)
                }
                Err(err) => return Err(err),
            }
        }
        debug!(
            "OMDb returned {} candidates for '{}' ({:?})",
            candidates.len(),
            title,
            year_hint
        );
        Ok(candidates)
    }

    fn name(&self) -> &str {
        "omdb"
    }
}
