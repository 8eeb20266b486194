//! Compiles [`SearchFilters`] into a parameterized SQL query over
//! `catalog_entries e` joined with `content_scores s`.

use super::filters::{PageRequest, SearchFilters, SortOrder};
use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Entries without an authoritative score record are kept.
    Left,
    /// Only entries with an authoritative score record survive.
    Inner,
}

/// A search ready to be executed by the catalog store.
#[derive(Debug, Clone)]
pub struct CompiledSearch {
    pub join: JoinKind,
    pub where_clauses: Vec<String>,
    /// Positional parameters in the order their `?` appear in
    /// [`CompiledSearch::from_clause`].
    pub params: Vec<Value>,
    pub order_by: String,
    pub limit: usize,
    pub offset: usize,
}

impl CompiledSearch {
    /// `FROM ... JOIN ... WHERE ...`, shared by the count and page queries.
    pub fn from_clause(&self) -> String {
        let join = match self.join {
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Inner => "INNER JOIN",
        };
        let mut sql = format!(
            "FROM catalog_entries e {} content_scores s ON s.natural_key = e.natural_key \
             AND (s.reviewed = 1 OR s.match_confidence > ?)",
            join
        );
        if !self.where_clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_clauses.join(" AND "));
        }
        sql
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len() + 2);
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn order_by(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::Imdb => {
            "e.imdb_rating IS NULL, e.imdb_rating DESC, e.year DESC, e.natural_key ASC"
        }
        SortOrder::RottenTomatoes => {
            "e.rotten_tomatoes IS NULL, e.rotten_tomatoes DESC, e.year DESC, e.natural_key ASC"
        }
        SortOrder::Metacritic => {
            "e.metacritic IS NULL, e.metacritic DESC, e.year DESC, e.natural_key ASC"
        }
        SortOrder::Year => "e.year IS NULL, e.year DESC, e.natural_key ASC",
        SortOrder::Title => "e.title COLLATE NOCASE ASC, e.natural_key ASC",
    }
}

/// Build the query for `filters`.
///
/// A score record counts only when it is authoritative: reviewed, or matched
/// with a confidence above `authority_threshold`. When any content threshold
/// is bounded the join is INNER, so entries without such a record are never
/// returned as if they complied.
pub fn compile(
    filters: &SearchFilters,
    page: &PageRequest,
    authority_threshold: f64,
) -> CompiledSearch {
    let mut where_clauses = Vec::new();
    let mut params = vec![Value::Real(authority_threshold)];

    if let Some(title) = &filters.title {
        where_clauses.push("e.title LIKE ? ESCAPE '\\'".to_string());
        params.push(Value::Text(format!("%{}%", escape_like(title))));
    }

    if !filters.genres.is_empty() {
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM json_each(e.genres) g WHERE lower(g.value) IN ({}))",
            placeholders(filters.genres.len())
        ));
        params.extend(
            filters
                .genres
                .iter()
                .map(|g| Value::Text(g.to_lowercase())),
        );
    }

    if let Some(year_min) = filters.year_min {
        where_clauses.push("e.year >= ?".to_string());
        params.push(Value::Integer(year_min as i64));
    }
    if let Some(year_max) = filters.year_max {
        where_clauses.push("e.year <= ?".to_string());
        params.push(Value::Integer(year_max as i64));
    }

    if !filters.classifications.is_empty() {
        where_clauses.push(format!(
            "e.classification IN ({})",
            placeholders(filters.classifications.len())
        ));
        params.extend(
            filters
                .classifications
                .iter()
                .map(|c| Value::Text(c.as_str().to_string())),
        );
    }

    if let Some(imdb_min) = filters.imdb_min {
        where_clauses.push("e.imdb_rating >= ?".to_string());
        params.push(Value::Real(imdb_min));
    }
    if let Some(rt_min) = filters.rt_min {
        where_clauses.push("e.rotten_tomatoes >= ?".to_string());
        params.push(Value::Integer(rt_min as i64));
    }
    if let Some(metacritic_min) = filters.metacritic_min {
        where_clauses.push("e.metacritic >= ?".to_string());
        params.push(Value::Integer(metacritic_min as i64));
    }
    if let Some(awards_min) = filters.awards_min {
        where_clauses.push("e.award_wins >= ?".to_string());
        params.push(Value::Integer(awards_min as i64));
    }

    let bounds = filters.content.bounds();
    for (category, max) in &bounds {
        where_clauses.push(format!("s.{} <= ?", category.as_str()));
        params.push(Value::Integer(*max as i64));
    }

    CompiledSearch {
        join: if bounds.is_empty() {
            JoinKind::Left
        } else {
            JoinKind::Inner
        },
        where_clauses,
        params,
        order_by: order_by(filters.sort).to_string(),
        limit: page.per_page,
        offset: page.offset(),
    }
}
