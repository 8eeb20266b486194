//! In-process stand-ins for the external sources.
//!
//! The seeded listings are served from a single page so one refresh cycle
//! reads everything.

use reelfilter_catalog_server::catalog_store::{
    ContentClassification, ContentScores, MovieMetadata,
};
use reelfilter_catalog_server::sources::{
    ContentRatingListing, ContentRatingSource, MetadataSource, RatingsPage, SourceError,
};
use std::collections::HashMap;

use super::constants::*;

fn listing(slug: &str, title: &str, year: i32, scores: ContentScores) -> ContentRatingListing {
    ContentRatingListing {
        source_key: slug.to_string(),
        title: title.to_string(),
        year: Some(year),
        scores,
        source_available: true,
    }
}

fn movie(
    key: &str,
    title: &str,
    year: i32,
    classification: ContentClassification,
    genres: &[&str],
    imdb_rating: f64,
) -> MovieMetadata {
    MovieMetadata {
        genres: genres.iter().map(|g| g.to_string()).collect(),
        classification,
        imdb_rating: Some(imdb_rating),
        ..MovieMetadata::new(key, title, Some(year))
    }
}

pub struct FixtureRatings {
    listings: Vec<ContentRatingListing>,
}

impl FixtureRatings {
    pub fn new() -> Self {
        Self {
            listings: vec![
                listing("toy-story", "Toy Story", 1995, ContentScores::new(1, 2, 1)),
                listing(
                    "the-dark-knight",
                    "The Dark Knight",
                    2008,
                    ContentScores::new(2, 7, 4),
                ),
                listing("deadpool", "Deadpool", 2016, ContentScores::new(6, 8, 10)),
                listing("se7en", "Se7en", 1995, ContentScores::new(3, 8, 9)),
                listing(
                    "an-obscure-short",
                    "An Obscure Short",
                    2001,
                    ContentScores::new(0, 1, 0),
                ),
            ],
        }
    }
}

impl ContentRatingSource for FixtureRatings {
    fn list_ratings_since(&self, cursor: Option<&str>) -> Result<RatingsPage, SourceError> {
        if cursor.is_some() {
            return Ok(RatingsPage::empty());
        }
        Ok(RatingsPage {
            items: self.listings.iter().cloned().map(Ok).collect(),
            next_cursor: None,
        })
    }

    fn name(&self) -> &str {
        "fixture_ratings"
    }
}

/// Title -> candidates.
pub struct FixtureMetadata {
    movies: HashMap<String, Vec<MovieMetadata>>,
}

impl FixtureMetadata {
    pub fn new() -> Self {
        let mut movies = HashMap::new();
        movies.insert(
            "Toy Story".to_string(),
            vec![movie(
                TOY_STORY_KEY,
                "Toy Story",
                1995,
                ContentClassification::G,
                &["Animation", "Family"],
                8.3,
            )],
        );
        movies.insert(
            "The Dark Knight".to_string(),
            vec![movie(
                DARK_KNIGHT_KEY,
                "The Dark Knight",
                2008,
                ContentClassification::Pg13,
                &["Action", "Crime", "Drama"],
                9.0,
            )],
        );
        movies.insert(
            "Deadpool".to_string(),
            vec![movie(
                DEADPOOL_KEY,
                "Deadpool",
                2016,
                ContentClassification::R,
                &["Action", "Comedy"],
                8.0,
            )],
        );
        movies.insert(
            "Se7en".to_string(),
            vec![movie(
                SEVEN_KEY,
                "Seven",
                1995,
                ContentClassification::R,
                &["Crime", "Mystery", "Thriller"],
                8.6,
            )],
        );
        Self { movies }
    }
}

impl MetadataSource for FixtureMetadata {
    fn find_candidates(
        &self,
        title: &str,
        _year_hint: Option<i32>,
    ) -> Result<Vec<MovieMetadata>, SourceError> {
        Ok(self.movies.get(title).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "fixture_metadata"
    }
}
