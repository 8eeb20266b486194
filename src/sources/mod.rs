//! External source adapters.
//!
//! Two independently keyed sources feed the catalog: a content-rating source
//! (listed first, it decides which titles matter) and a metadata source
//! (queried per listing for match candidates).

mod kids_in_mind;
mod models;
mod omdb;
mod rate_limit;

pub use kids_in_mind::KidsInMindScraper;
pub use models::*;
pub use omdb::OmdbClient;

use crate::catalog_store::MovieMetadata;

/// Paginated listing of content ratings.
pub trait ContentRatingSource: Send + Sync {
    /// Read one page. `None` starts from the beginning; the returned
    /// `next_cursor` resumes after this page.
    ///
    /// An unreachable source is an `Err`, an empty listing is an empty page.
    fn list_ratings_since(&self, cursor: Option<&str>) -> Result<RatingsPage, SourceError>;

    fn name(&self) -> &str;
}

/// Lookup of match candidates by title.
pub trait MetadataSource: Send + Sync {
    fn find_candidates(
        &self,
        title: &str,
        year_hint: Option<i32>,
    ) -> Result<Vec<MovieMetadata>, SourceError>;

    fn name(&self) -> &str;
}
