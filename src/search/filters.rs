//! Search filter model and validation.

use crate::catalog_store::{ContentClassification, ScoreCategory, MAX_CONTENT_SCORE};
use crate::config::SearchSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIN_YEAR: i32 = 1888;
const MAX_YEAR: i32 = 2100;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

fn invalid(message: impl Into<String>) -> SearchError {
    SearchError::InvalidFilter(message.into())
}

/// Per-category content tolerance. `None` is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentThresholds {
    pub sex_max: Option<i32>,
    pub violence_max: Option<i32>,
    pub language_max: Option<i32>,
}

impl ContentThresholds {
    pub fn get(&self, category: ScoreCategory) -> Option<i32> {
        match category {
            ScoreCategory::Sex => self.sex_max,
            ScoreCategory::Violence => self.violence_max,
            ScoreCategory::Language => self.language_max,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        ScoreCategory::ALL.iter().all(|c| self.get(*c).is_none())
    }

    /// Bounded categories with their ceiling.
    pub fn bounds(&self) -> Vec<(ScoreCategory, i32)> {
        ScoreCategory::ALL
            .iter()
            .filter_map(|c| self.get(*c).map(|max| (*c, max)))
            .collect()
    }

    fn validate(&self) -> Result<(), SearchError> {
        for (category, max) in self.bounds() {
            if !(0..=MAX_CONTENT_SCORE).contains(&max) {
                return Err(invalid(format!(
                    "{}_max must be within 0..={}, got {}",
                    category.as_str(),
                    MAX_CONTENT_SCORE,
                    max
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Imdb,
    RottenTomatoes,
    Metacritic,
    Year,
    Title,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Imdb => "imdb",
            SortOrder::RottenTomatoes => "rotten_tomatoes",
            SortOrder::Metacritic => "metacritic",
            SortOrder::Year => "year",
            SortOrder::Title => "title",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "imdb" => Some(SortOrder::Imdb),
            "rotten_tomatoes" | "rt" => Some(SortOrder::RottenTomatoes),
            "metacritic" => Some(SortOrder::Metacritic),
            "year" => Some(SortOrder::Year),
            "title" => Some(SortOrder::Title),
            _ => None,
        }
    }
}

/// Every filter of a catalog search. Traditional filters and the content
/// thresholds all combine with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    /// Case-insensitive title substring.
    pub title: Option<String>,
    /// Matches entries carrying at least one of these genres.
    pub genres: Vec<String>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub classifications: Vec<ContentClassification>,
    pub imdb_min: Option<f64>,
    pub rt_min: Option<i32>,
    pub metacritic_min: Option<i32>,
    /// Minimum award wins.
    pub awards_min: Option<i32>,
    pub content: ContentThresholds,
    pub sort: SortOrder,
}

impl SearchFilters {
    pub fn validate(&self) -> Result<(), SearchError> {
        for (name, year) in [("year_min", self.year_min), ("year_max", self.year_max)] {
            if let Some(year) = year {
                if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
                    return Err(invalid(format!(
                        "{} must be within {}..={}",
                        name, MIN_YEAR, MAX_YEAR
                    )));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.year_min, self.year_max) {
            if max < min {
                return Err(invalid("year_max must be >= year_min"));
            }
        }
        if let Some(imdb) = self.imdb_min {
            if !(0.0..=10.0).contains(&imdb) {
                return Err(invalid("imdb_min must be within 0..=10"));
            }
        }
        for (name, value) in [("rt_min", self.rt_min), ("metacritic_min", self.metacritic_min)] {
            if let Some(value) = value {
                if !(0..=100).contains(&value) {
                    return Err(invalid(format!("{} must be within 0..=100", name)));
                }
            }
        }
        if let Some(awards) = self.awards_min {
            if awards < 0 {
                return Err(invalid("awards_min must not be negative"));
            }
        }
        self.content.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    /// 1-based.
    pub page: usize,
    pub per_page: usize,
}

impl PageRequest {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self { page, per_page }
    }

    pub fn validate(&self, max_per_page: usize) -> Result<(), SearchError> {
        if self.page == 0 {
            return Err(invalid("page must be >= 1"));
        }
        if self.per_page == 0 || self.per_page > max_per_page {
            return Err(invalid(format!("per_page must be within 1..={}", max_per_page)));
        }
        match self.checked_offset() {
            Some(offset) if i64::try_from(offset).is_ok() => Ok(()),
            _ => Err(invalid(format!("page {} is out of range", self.page))),
        }
    }

    fn checked_offset(&self) -> Option<usize> {
        self.page.checked_sub(1)?.checked_mul(self.per_page)
    }

    /// Rows to skip; only meaningful once `validate` passed.
    pub fn offset(&self) -> usize {
        self.checked_offset().unwrap_or(usize::MAX)
    }
}

/// Raw query-string form of a search, as received over HTTP.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    /// Comma separated.
    pub genres: Option<String>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    /// Comma separated classifications.
    pub ratings: Option<String>,
    pub imdb_min: Option<f64>,
    pub rt_min: Option<i32>,
    pub metacritic_min: Option<i32>,
    pub awards_min: Option<i32>,
    pub sex_max: Option<String>,
    pub violence_max: Option<String>,
    pub language_max: Option<String>,
    pub sort: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

fn split_list(raw: &Option<String>) -> Vec<String> {
    raw.as_deref()
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Blank and "any" mean unbounded.
fn parse_threshold(name: &str, raw: &Option<String>) -> Result<Option<i32>, SearchError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("any") => Ok(None),
        Some(s) => s
            .parse::<i32>()
            .map(Some)
            .map_err(|_| invalid(format!("{} must be an integer, got '{}'", name, s))),
    }
}

impl SearchParams {
    pub fn into_request(
        self,
        settings: &SearchSettings,
    ) -> Result<(SearchFilters, PageRequest), SearchError> {
        let classifications = split_list(&self.ratings)
            .iter()
            .map(|r| {
                ContentClassification::parse(r)
                    .ok_or_else(|| invalid(format!("unknown classification '{}'", r)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let sort = match self.sort.as_deref().map(str::trim) {
            None | Some("") => SortOrder::default(),
            Some(s) => SortOrder::parse(s).ok_or_else(|| invalid(format!("unknown sort '{}'", s)))?,
        };

        let filters = SearchFilters {
            title: self
                .q
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string),
            genres: split_list(&self.genres),
            year_min: self.year_min,
            year_max: self.year_max,
            classifications,
            imdb_min: self.imdb_min,
            rt_min: self.rt_min,
            metacritic_min: self.metacritic_min,
            awards_min: self.awards_min,
            content: ContentThresholds {
                sex_max: parse_threshold("sex_max", &self.sex_max)?,
                violence_max: parse_threshold("violence_max", &self.violence_max)?,
                language_max: parse_threshold("language_max", &self.language_max)?,
            },
            sort,
        };
        let page = PageRequest::new(
            self.page.unwrap_or(1),
            self.per_page.unwrap_or(settings.default_per_page),
        );
        Ok((filters, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_thresholds() {
        assert!(ContentThresholds::default().is_unbounded());
        let bounded = ContentThresholds {
            violence_max: Some(4),
            ..Default::default()
        };
        assert!(!bounded.is_unbounded());
        assert_eq!(bounded.bounds(), vec![(ScoreCategory::Violence, 4)]);
    }

    #[test]
    fn threshold_out_of_range_is_invalid() {
        let filters = SearchFilters {
            content: ContentThresholds {
                sex_max: Some(11),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(filters.validate(), Err(SearchError::InvalidFilter(_))));
    }

    #[test]
    fn inverted_year_range_is_invalid() {
        let filters = SearchFilters {
            year_min: Some(2010),
            year_max: Some(2000),
            ..Default::default()
        };
        assert!(filters.validate().is_err());
        let filters = SearchFilters {
            year_min: Some(1500),
            ..Default::default()
        };
        assert!(filters.validate().is_err());
    }

    #[test]
    fn page_bounds() {
        assert!(PageRequest::new(0, 20).validate(100).is_err());
        assert!(PageRequest::new(1, 0).validate(100).is_err());
        assert!(PageRequest::new(1, 101).validate(100).is_err());
        assert!(PageRequest::new(3, 20).validate(100).is_ok());
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
    }

    #[test]
    fn huge_page_is_rejected_instead_of_overflowing() {
        let page = PageRequest::new(usize::MAX / 50, 100);
        assert!(matches!(
            page.validate(100),
            Err(SearchError::InvalidFilter(_))
        ));
        assert_eq!(page.offset(), usize::MAX);

        let past_i64 = PageRequest::new(i64::MAX as usize / 10 + 2, 10);
        assert!(past_i64.validate(100).is_err());
    }

    #[test]
    fn params_parse_lists_and_any() {
        let params = SearchParams {
            q: Some("  knight ".to_string()),
            genres: Some("Action, Drama,,".to_string()),
            ratings: Some("pg-13,R".to_string()),
            sex_max: Some("any".to_string()),
            violence_max: Some("6".to_string()),
            language_max: Some("".to_string()),
            sort: Some("year".to_string()),
            ..Default::default()
        };
        let (filters, page) = params.into_request(&SearchSettings::default()).unwrap();
        assert_eq!(filters.title.as_deref(), Some("knight"));
        assert_eq!(filters.genres, vec!["Action", "Drama"]);
        assert_eq!(
            filters.classifications,
            vec![ContentClassification::Pg13, ContentClassification::R]
        );
        assert_eq!(filters.content.sex_max, None);
        assert_eq!(filters.content.violence_max, Some(6));
        assert_eq!(filters.content.language_max, None);
        assert_eq!(filters.sort, SortOrder::Year);
        assert_eq!(page, PageRequest::new(1, 20));
    }

    #[test]
    fn params_reject_garbage() {
        let params = SearchParams {
            sex_max: Some("lots".to_string()),
            ..Default::default()
        };
        assert!(params.into_request(&SearchSettings::default()).is_err());

        let params = SearchParams {
            ratings: Some("X".to_string()),
            ..Default::default()
        };
        assert!(params.into_request(&SearchSettings::default()).is_err());

        let params = SearchParams {
            sort: Some("popularity".to_string()),
            ..Default::default()
        };
        assert!(params.into_request(&SearchSettings::default()).is_err());
    }
}
