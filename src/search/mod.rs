//! Content-filtered query engine over the reconciled catalog.

mod engine;
mod filters;
mod predicate;

pub use engine::{PageInfo, QueryEngine, SearchPage, SearchResults};
pub use filters::{
    ContentThresholds, PageRequest, SearchError, SearchFilters, SearchParams, SortOrder,
};
pub use predicate::{compile, CompiledSearch, JoinKind};
