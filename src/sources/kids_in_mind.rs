//! Kids-in-Mind scraper, the content-rating source.
//!
//! A cursor is a 1-based listing page number. Every movie link found on a
//! listing page is fetched and scraped for its three scores; a movie page that
//! cannot be scraped becomes a malformed item of the page, not a page failure.
//! Rate limited to one request every two seconds by default.

use super::models::{ContentRatingListing, RatingsPage, SourceError};
use super::rate_limit::RequestSpacing;
use super::ContentRatingSource;
use crate::catalog_store::ContentScores;
use crate::config::SourcesSettings;
use crate::refresh::{with_retry, RetryPolicy};
use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

lazy_static! {
    static ref ALL_SCORES: Regex = Regex::new(
        r"(?is)SEX[/&\s]+NUDITY\s*[:=]?\s*(\d{1,2}).*?VIOLENCE[/&\s]+GORE\s*[:=]?\s*(\d{1,2}).*?LANGUAGE\s*[:=]?\s*(\d{1,2})"
    )
    .unwrap();
    static ref SEX_SCORE: Regex = Regex::new(r"(?i)SEX[/&\s]+NUDITY\s*[:=]?\s*(\d{1,2})").unwrap();
    static ref VIOLENCE_SCORE: Regex =
        Regex::new(r"(?i)VIOLENCE[/&\s]+GORE\s*[:=]?\s*(\d{1,2})").unwrap();
    static ref LANGUAGE_SCORE: Regex =
        Regex::new(r"(?i)(?:LANGUAGE|PROFANITY)\s*[:=]?\s*(\d{1,2})").unwrap();
    static ref SCORE_CLASS: Regex = Regex::new(r"(?i)score|rating|content[-_]?level").unwrap();
    static ref FIRST_NUMBER: Regex = Regex::new(r"(\d{1,2})").unwrap();
    static ref MOVIE_HREF: Regex = Regex::new(r".*\d+\.htm").unwrap();
    static ref SITE_SUFFIX: Regex = Regex::new(r"(?i)\s*[-–|]\s*Kids.*$").unwrap();
    static ref TITLE_YEAR: Regex = Regex::new(r"\((\d{4})\)").unwrap();
    static ref PAREN_YEAR: Regex = Regex::new(r"\s*\(\d{4}\)\s*").unwrap();
    static ref LINK_SELECTOR: Selector = Selector::parse("a[href]").unwrap();
    static ref TITLE_SELECTOR: Selector = Selector::parse("title").unwrap();
    static ref CLASSED_SELECTOR: Selector = Selector::parse("[class]").unwrap();
}

/// A movie link found on a listing page.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MovieLink {
    pub source_key: String,
    pub url: String,
}

/// A scraped movie page.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScrapedPage {
    pub title: String,
    pub year: Option<i32>,
    pub scores: (i32, i32, i32),
}

pub struct KidsInMindScraper {
    client: Client,
    base_url: String,
    spacing: RequestSpacing,
    /// Applied to each movie page fetch.
    retry: RetryPolicy,
    cancel: CancellationToken,
}

fn capture_int(re: &Regex, text: &str) -> Option<i32> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

fn scores_from_text(text: &str) -> Option<(i32, i32, i32)> {
    if let Some(caps) = ALL_SCORES.captures(text) {
        let values: Vec<i32> = (1..=3)
            .filter_map(|i| caps.get(i)?.as_str().parse().ok())
            .collect();
        if let [sex, violence, language] = values[..] {
            return Some((sex, violence, language));
        }
    }
    Some((
        capture_int(&SEX_SCORE, text)?,
        capture_int(&VIOLENCE_SCORE, text)?,
        capture_int(&LANGUAGE_SCORE, text)?,
    ))
}

/// Fallback: the first three 0..=10 numbers in elements whose class looks
/// like a score widget.
fn scores_from_elements(document: &Html) -> Option<(i32, i32, i32)> {
    let values: Vec<i32> = document
        .select(&CLASSED_SELECTOR)
        .filter(|el| {
            el.value()
                .attr("class")
                .map(|class| SCORE_CLASS.is_match(class))
                .unwrap_or(false)
        })
        .filter_map(|el| {
            let text: String = el.text().collect::<String>();
            capture_int(&FIRST_NUMBER, text.trim())
        })
        .filter(|v| (0..=10).contains(v))
        .take(3)
        .collect();
    match values[..] {
        [sex, violence, language] => Some((sex, violence, language)),
        _ => None,
    }
}

/// Scores, title and year of a movie page.
pub(crate) fn parse_movie_page(html: &str) -> Option<ScrapedPage> {
    let document = Html::parse_document(html);
    let text = document.root_element().text().collect::<Vec<_>>().join(" ");
    let scores = scores_from_text(&text).or_else(|| scores_from_elements(&document))?;

    let raw_title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|t| t.text().collect::<String>())
        .unwrap_or_default();
    let title = SITE_SUFFIX.replace(raw_title.trim(), "").trim().to_string();
    let year = capture_int(&TITLE_YEAR, &title);
    let title = PAREN_YEAR.replace_all(&title, " ").trim().to_string();

    Some(ScrapedPage {
        title,
        year,
        scores,
    })
}

/// Stable listing identity: the link path without its extension.
fn source_key_for(href: &str) -> String {
    let path = href
        .split("://")
        .nth(1)
        .and_then(|rest| rest.find('/').map(|i| &rest[i..]))
        .unwrap_or(href);
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.trim_matches('/')
        .trim_end_matches(".html")
        .trim_end_matches(".htm")
        .to_string()
}

/// Movie links of a listing page, deduplicated, in page order.
pub(crate) fn parse_listing_page(html: &str, base_url: &str) -> Vec<MovieLink> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for el in document.select(&LINK_SELECTOR) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let text = el.text().collect::<String>();
        if href.is_empty() || text.trim().is_empty() {
            continue;
        }
        if !(href.contains("/movie/") || MOVIE_HREF.is_match(href)) {
            continue;
        }

        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                href.trim_start_matches('/')
            )
        };
        let source_key = source_key_for(href);
        if source_key.is_empty() || !seen.insert(source_key.clone()) {
            continue;
        }
        links.push(MovieLink { source_key, url });
    }
    links
}

impl KidsInMindScraper {
    pub fn new(settings: &SourcesSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.kim_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.kim_base_url.trim_end_matches('/').to_string(),
            spacing: RequestSpacing::new(Duration::from_millis(
                settings.kim_min_request_interval_ms,
            )),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Retry movie page fetches with `policy`, giving up early once `cancel` fires.
    pub fn with_retry(mut self, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        self.retry = policy;
        self.cancel = cancel;
        self
    }

    fn fetch(&self, url: &str) -> Result<String, SourceError> {
        self.spacing.wait();
        let response = self.client.get(url).send()?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(SourceError::RateLimited { retry_after: None });
        }
        if status.is_client_error() {
            return Err(SourceError::malformed(url, format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(SourceError::SourceUnreachable(format!(
                "{} responded with status {}",
                url, status
            )));
        }
        Ok(response.text()?)
    }

    fn scrape_listing(&self, link: &MovieLink) -> Result<ContentRatingListing, SourceError> {
        let html = self.fetch(&link.url)?;
        let page = parse_movie_page(&html)
            .ok_or_else(|| SourceError::malformed(&link.source_key, "no content scores found"))?;
        if page.title.is_empty() {
            return Err(SourceError::malformed(&link.source_key, "no title found"));
        }

        let (sex, violence, language) = page.scores;
        let scores = ContentScores::new(sex, violence, language);
        scores
            .validate()
            .map_err(|source| SourceError::ValidationFailure {
                key: link.source_key.clone(),
                source,
            })?;

        Ok(ContentRatingListing {
            source_key: link.source_key.clone(),
            title: page.title,
            year: page.year,
            scores,
            source_available: true,
        })
    }
}

impl ContentRatingSource for KidsInMindScraper {
    fn list_ratings_since(&self, cursor: Option<&str>) -> Result<RatingsPage, SourceError> {
        let page: u32 = match cursor {
            None => 1,
            Some(c) => c
                .parse()
                .map_err(|_| SourceError::malformed("cursor", format!("bad cursor '{}'", c)))?,
        };

        let listing_url = format!("{}/search.php?p={}", self.base_url, page);
        let html = self.fetch(&listing_url)?;
        let links = parse_listing_page(&html, &self.base_url);
        debug!("Kids-in-Mind page {} lists {} movies", page, links.len());
        if links.is_empty() {
            return Ok(RatingsPage::empty());
        }

        let mut items = Vec::with_capacity(links.len());
        for link in &links {
            let label = format!("Kids-in-Mind {}", link.source_key);
            let item = match with_retry(&self.retry, &self.cancel, &label, || {
                self.scrape_listing(link)
            }) {
                Ok(listing) => Ok(listing),
                // Per-movie failures stay in the page; an unreachable site does not.
                Err(err @ SourceError::SourceUnreachable(_)) if items.is_empty() => {
                    return Err(err)
                }
                Err(err) => {
                    warn!("Failed to scrape {}: {}", link.url, err);
                    Err(err.for_listing(&link.source_key))
                }
            };
            items.push(item);
        }

        Ok(RatingsPage {
            items,
            next_cursor: Some((page + 1).to_string()),
        })
    }

    fn name(&self) -> &str {
        "kids_in_mind"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::response::Html as HtmlResponse;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;

    const MOVIE_PAGE: &str = r#"<html><head>
        <title>The Dark Knight (2008) - Kids-in-Mind.com</title></head>
        <body><h1>The Dark Knight</h1>
        <p>SEX/NUDITY 3 | VIOLENCE/GORE 8 | LANGUAGE 5</p>
        </body></html>"#;

    #[test]
    fn parses_combined_pattern() {
        let page = parse_movie_page(MOVIE_PAGE).unwrap();
        assert_eq!(page.title, "The Dark Knight");
        assert_eq!(page.year, Some(2008));
        assert_eq!(page.scores, (3, 8, 5));
    }

    #[test]
    fn parses_individual_patterns_in_any_order() {
        let html = r#"<html><head><title>Up | Kids in Mind</title></head><body>
            <div>PROFANITY: 1</div><div>VIOLENCE &amp; GORE = 3</div><div>Sex & Nudity 0</div>
            </body></html>"#;
        let page = parse_movie_page(html).unwrap();
        assert_eq!(page.title, "Up");
        assert_eq!(page.year, None);
        assert_eq!(page.scores, (0, 3, 1));
    }

    #[test]
    fn falls_back_to_score_elements() {
        let html = r#"<html><head><title>Coco (2017)</title></head><body>
            <span class="rating-box">12 reviews</span>
            <span class="score-sex">1</span>
            <span class="score-violence">4</span>
            <span class="content_level">1</span>
            </body></html>"#;
        let page = parse_movie_page(html).unwrap();
        assert_eq!(page.title, "Coco");
        assert_eq!(page.year, Some(2017));
        assert_eq!(page.scores, (1, 4, 1));
    }

    #[test]
    fn page_without_scores_is_none() {
        assert!(parse_movie_page("<html><body>Nothing here</body></html>").is_none());
    }

    #[test]
    fn listing_links_are_filtered_and_deduplicated() {
        let html = r#"<html><body>
            <a href="/movie/the-dark-knight.htm">The Dark Knight</a>
            <a href="https://kids-in-mind.com/movie/the-dark-knight.htm">again</a>
            <a href="/u/up2009.htm">Up</a>
            <a href="/about.html">About</a>
            <a href="/movie/empty.htm"></a>
            </body></html>"#;
        let links = parse_listing_page(html, "https://kids-in-mind.com/");
        assert_eq!(
            links,
            vec![
                MovieLink {
                    source_key: "movie/the-dark-knight".to_string(),
                    url: "https://kids-in-mind.com/movie/the-dark-knight.htm".to_string(),
                },
                MovieLink {
                    source_key: "u/up2009".to_string(),
                    url: "https://kids-in-mind.com/u/up2009.htm".to_string(),
                },
            ]
        );
    }

    async fn listing(Query(params): Query<HashMap<String, String>>) -> HtmlResponse<String> {
        let body = match params.get("p").map(String::as_str) {
            Some("1") => r#"<a href="/movie/dark.htm">Dark</a>
                <a href="/movie/broken.htm">Broken</a>
                <a href="/movie/loud.htm">Loud</a>"#
                .to_string(),
            _ => "<p>no more results</p>".to_string(),
        };
        HtmlResponse(body)
    }

    async fn movie(Path(name): Path<String>) -> HtmlResponse<String> {
        HtmlResponse(match name.as_str() {
            "dark.htm" => MOVIE_PAGE.to_string(),
            "loud.htm" => r#"<title>Loud (2001)</title>
                SEX/NUDITY 1 VIOLENCE/GORE 2 LANGUAGE 15"#
                .to_string(),
            _ => "<title>Broken</title><p>page under construction</p>".to_string(),
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lists_pages_from_fake_site() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = Router::new()
                .route("/search.php", get(listing))
                .route("/movie/{name}", get(movie));
            axum::serve(listener, app).await.unwrap();
        });

        let settings = SourcesSettings {
            kim_base_url: format!("http://{}", addr),
            kim_min_request_interval_ms: 0,
            ..Default::default()
        };
        let (first, second) = tokio::task::spawn_blocking(move || {
            let scraper = KidsInMindScraper::new(&settings).unwrap();
            let first = scraper.list_ratings_since(None).unwrap();
            let second = scraper
                .list_ratings_since(first.next_cursor.as_deref())
                .unwrap();
            (first, second)
        })
        .await
        .unwrap();

        assert_eq!(first.next_cursor.as_deref(), Some("2"));
        assert_eq!(first.items.len(), 3);
        let dark = first.items[0].as_ref().unwrap();
        assert_eq!(dark.source_key, "movie/dark");
        assert_eq!(dark.scores, ContentScores::new(3, 8, 5));
        assert!(matches!(
            first.items[1],
            Err(SourceError::MalformedListing { .. })
        ));
        assert!(matches!(
            first.items[2],
            Err(SourceError::ValidationFailure { .. })
        ));

        assert!(second.items.is_empty());
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rate_limited_movie_page_is_retried() {
        use axum::extract::State;
        use axum::http::StatusCode as HttpStatus;
        use axum::response::{IntoResponse, Response};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        async fn limited_once(State(hits): State<Arc<AtomicUsize>>) -> Response {
            if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                return HttpStatus::TOO_MANY_REQUESTS.into_response();
            }
            HtmlResponse(MOVIE_PAGE.to_string()).into_response()
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/search.php",
                get(|| async { HtmlResponse(r#"<a href="/movie/dark.htm">Dark</a>"#) }),
            )
            .route("/movie/{name}", get(limited_once))
            .with_state(hits.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let settings = SourcesSettings {
            kim_base_url: format!("http://{}", addr),
            kim_min_request_interval_ms: 0,
            ..Default::default()
        };
        let policy = RetryPolicy {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            backoff_multiplier: 2.0,
        };
        let page = tokio::task::spawn_blocking(move || {
            KidsInMindScraper::new(&settings)
                .unwrap()
                .with_retry(policy, CancellationToken::new())
                .list_ratings_since(None)
                .unwrap()
        })
        .await
        .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        let dark = page.items[0].as_ref().unwrap();
        assert_eq!(dark.source_key, "movie/dark");
        assert_eq!(dark.scores, ContentScores::new(3, 8, 5));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausted_movie_retries_keep_the_listing_key() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route(
                "/search.php",
                get(|| async {
                    HtmlResponse(
                        r#"<a href="/movie/dark.htm">Dark</a><a href="/movie/busy.htm">Busy</a>"#,
                    )
                }),
            )
            .route(
                "/movie/{name}",
                get(|Path(name): Path<String>| async move {
                    if name == "busy.htm" {
                        Err(axum::http::StatusCode::TOO_MANY_REQUESTS)
                    } else {
                        Ok(HtmlResponse(MOVIE_PAGE.to_string()))
                    }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let settings = SourcesSettings {
            kim_base_url: format!("http://{}", addr),
            kim_min_request_interval_ms: 0,
            ..Default::default()
        };
        let policy = RetryPolicy {
            max_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            backoff_multiplier: 2.0,
        };
        let page = tokio::task::spawn_blocking(move || {
            KidsInMindScraper::new(&settings)
                .unwrap()
                .with_retry(policy, CancellationToken::new())
                .list_ratings_since(None)
                .unwrap()
        })
        .await
        .unwrap();

        assert_eq!(page.items.len(), 2);
        let err = page.items[1].as_ref().unwrap_err();
        assert_eq!(err.key(), Some("movie/busy"));
        assert!(matches!(err, SourceError::Listing { .. }));
    }
}
