//! SQLite-backed catalog store.
//!
//! Reads go through a small pool of read-only connections, writes through a
//! single WAL connection. Every multi-row write runs inside one transaction.

use super::models::*;
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::trait_def::{CatalogStore, ReviewResolution};
use crate::matching::round_confidence;
use crate::review_queue::{
    EnqueueOutcome, ReviewDecision, ReviewError, ReviewQueueEntry, ReviewState,
};
use crate::search::{CompiledSearch, SearchResults};
use crate::sources::ContentRatingListing;
use crate::sqlite_persistence::open_versioned;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const ENTRY_COLUMNS: &str = "e.natural_key, e.title, e.year, e.genres, e.classification,
     e.imdb_rating, e.rotten_tomatoes, e.metacritic, e.award_wins, e.award_nominations,
     e.awards_summary, e.runtime_minutes, e.plot, e.director, e.cast_members, e.poster_url,
     e.created_at, e.updated_at";

const SCORE_COLUMNS: &str = "s.natural_key AS s_natural_key, s.source_key, s.sex, s.violence,
     s.language, s.source_available, s.match_confidence, s.reviewed, s.first_scraped_at,
     s.updated_at AS s_updated_at";

const REVIEW_COLUMNS: &str = "id, listing, candidate, confidence, enqueued_at, state,
     resolved_at, resolved_by";

/// SQLite-backed catalog store.
#[derive(Clone)]
pub struct SqliteCatalogStore {
    read_pool: Vec<Arc<Mutex<Connection>>>,
    write_conn: Arc<Mutex<Connection>>,
    read_index: Arc<AtomicUsize>,
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_json_column<T: serde::de::DeserializeOwned>(
    idx: &str,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("column {}: {}", idx, e),
            )),
        )
    })
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<CatalogEntry> {
    let genres: String = row.get("genres")?;
    let cast: String = row.get("cast_members")?;
    let classification: String = row.get("classification")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(CatalogEntry {
        metadata: MovieMetadata {
            natural_key: row.get("natural_key")?,
            title: row.get("title")?,
            year: row.get("year")?,
            genres: parse_json_column("genres", &genres)?,
            classification: ContentClassification::from_upstream(&classification),
            imdb_rating: row.get("imdb_rating")?,
            rotten_tomatoes: row.get("rotten_tomatoes")?,
            metacritic: row.get("metacritic")?,
            award_wins: row.get("award_wins")?,
            award_nominations: row.get("award_nominations")?,
            awards_summary: row.get("awards_summary")?,
            runtime_minutes: row.get("runtime_minutes")?,
            plot: row.get("plot")?,
            director: row.get("director")?,
            cast: parse_json_column("cast_members", &cast)?,
            poster_url: row.get("poster_url")?,
        },
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

/// Score columns as produced by [`SCORE_COLUMNS`]; None when the join found no row.
fn row_to_score(row: &rusqlite::Row) -> rusqlite::Result<Option<ContentScoreRecord>> {
    let natural_key: Option<String> = row.get("s_natural_key")?;
    let Some(natural_key) = natural_key else {
        return Ok(None);
    };
    let first_scraped_at: String = row.get("first_scraped_at")?;
    let updated_at: String = row.get("s_updated_at")?;

    Ok(Some(ContentScoreRecord {
        natural_key,
        source_key: row.get("source_key")?,
        scores: ContentScores::new(row.get("sex")?, row.get("violence")?, row.get("language")?),
        source_available: row.get::<_, i64>("source_available")? != 0,
        match_confidence: row.get("match_confidence")?,
        reviewed: row.get::<_, i64>("reviewed")? != 0,
        first_scraped_at: parse_datetime(&first_scraped_at),
        updated_at: parse_datetime(&updated_at),
    }))
}

fn row_to_hit(row: &rusqlite::Row) -> rusqlite::Result<CatalogHit> {
    Ok(CatalogHit {
        entry: row_to_entry(row)?,
        content_scores: row_to_score(row)?,
    })
}

fn row_to_review(row: &rusqlite::Row) -> rusqlite::Result<ReviewQueueEntry> {
    let listing: String = row.get("listing")?;
    let candidate: String = row.get("candidate")?;
    let enqueued_at: String = row.get("enqueued_at")?;
    let state: String = row.get("state")?;
    let resolved_at: Option<String> = row.get("resolved_at")?;

    Ok(ReviewQueueEntry {
        id: row.get("id")?,
        listing: parse_json_column("listing", &listing)?,
        candidate: parse_json_column("candidate", &candidate)?,
        confidence: row.get("confidence")?,
        enqueued_at: parse_datetime(&enqueued_at),
        state: ReviewState::parse(&state).unwrap_or(ReviewState::Pending),
        resolved_at: resolved_at.as_deref().map(parse_datetime),
        resolved_by: row.get("resolved_by")?,
    })
}

fn query_entry(conn: &Connection, natural_key: &str) -> Result<Option<CatalogEntry>> {
    let entry = conn
        .query_row(
            &format!(
                "SELECT {} FROM catalog_entries e WHERE e.natural_key = ?1",
                ENTRY_COLUMNS
            ),
            params![natural_key],
            row_to_entry,
        )
        .optional()?;
    Ok(entry)
}

fn query_score(conn: &Connection, natural_key: &str) -> Result<Option<ContentScoreRecord>> {
    let record = conn
        .query_row(
            &format!(
                "SELECT {} FROM content_scores s WHERE s.natural_key = ?1",
                SCORE_COLUMNS
            ),
            params![natural_key],
            row_to_score,
        )
        .optional()?;
    Ok(record.flatten())
}

fn query_review(conn: &Connection, id: &str) -> Result<Option<ReviewQueueEntry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {} FROM review_queue WHERE id = ?1", REVIEW_COLUMNS),
            params![id],
            row_to_review,
        )
        .optional()?;
    Ok(entry)
}

fn write_entry(conn: &Connection, metadata: &MovieMetadata, now: &str, insert: bool) -> Result<()> {
    let genres = serde_json::to_string(&metadata.genres)?;
    let cast = serde_json::to_string(&metadata.cast)?;
    let sql = if insert {
        "INSERT INTO catalog_entries (natural_key, title, year, genres, classification,
             imdb_rating, rotten_tomatoes, metacritic, award_wins, award_nominations,
             awards_summary, runtime_minutes, plot, director, cast_members, poster_url,
             created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)"
    } else {
        "UPDATE catalog_entries SET title = ?2, year = ?3, genres = ?4, classification = ?5,
             imdb_rating = ?6, rotten_tomatoes = ?7, metacritic = ?8, award_wins = ?9,
             award_nominations = ?10, awards_summary = ?11, runtime_minutes = ?12, plot = ?13,
             director = ?14, cast_members = ?15, poster_url = ?16, updated_at = ?17
         WHERE natural_key = ?1"
    };
    conn.execute(
        sql,
        params![
            metadata.natural_key,
            metadata.title,
            metadata.year,
            genres,
            metadata.classification.as_str(),
            metadata.imdb_rating,
            metadata.rotten_tomatoes,
            metadata.metacritic,
            metadata.award_wins,
            metadata.award_nominations,
            metadata.awards_summary,
            metadata.runtime_minutes,
            metadata.plot,
            metadata.director,
            cast,
            metadata.poster_url,
            now,
        ],
    )?;
    Ok(())
}

/// Upsert entry + score record for an accepted match on an open transaction.
fn upsert_match(conn: &Connection, accepted: &AcceptedMatch) -> Result<UpsertOutcome> {
    accepted
        .scores
        .validate()
        .with_context(|| format!("Refusing to store scores for {}", accepted.source_key))?;

    let now_dt = Utc::now();
    let now = format_datetime(&now_dt);
    let metadata = accepted.metadata.clone().sanitized();
    let natural_key = metadata.natural_key.as_str();

    let entry_kind = match query_entry(conn, natural_key)? {
        None => {
            write_entry(conn, &metadata, &now, true)?;
            WriteKind::Created
        }
        Some(existing) if existing.metadata == metadata => WriteKind::Unchanged,
        Some(_) => {
            write_entry(conn, &metadata, &now, false)?;
            WriteKind::Updated
        }
    };

    let mut score_changes = Vec::new();
    let confidence = round_confidence(accepted.confidence);
    let scores_kind = match query_score(conn, natural_key)? {
        None => {
            conn.execute(
                "INSERT INTO content_scores (natural_key, source_key, sex, violence, language,
                     source_available, match_confidence, reviewed, first_scraped_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8, ?8)",
                params![
                    natural_key,
                    accepted.source_key,
                    accepted.scores.sex,
                    accepted.scores.violence,
                    accepted.scores.language,
                    confidence,
                    accepted.reviewed as i64,
                    now,
                ],
            )?;
            WriteKind::Created
        }
        Some(existing) => {
            for category in ScoreCategory::ALL {
                let old_value = existing.scores.get(category);
                let new_value = accepted.scores.get(category);
                if old_value != new_value {
                    score_changes.push(ScoreChange {
                        natural_key: natural_key.to_string(),
                        category,
                        old_value: Some(old_value),
                        new_value,
                        changed_by: accepted.changed_by.clone(),
                        changed_at: now_dt,
                    });
                }
            }

            // A reviewed mapping stays reviewed across later automatic updates.
            let reviewed = existing.reviewed || accepted.reviewed;
            let unchanged = score_changes.is_empty()
                && existing.source_key == accepted.source_key
                && existing.source_available
                && existing.reviewed == reviewed
                && existing.match_confidence == confidence;

            if unchanged {
                WriteKind::Unchanged
            } else {
                conn.execute(
                    "UPDATE content_scores SET source_key = ?2, sex = ?3, violence = ?4,
                         language = ?5, source_available = 1, match_confidence = ?6,
                         reviewed = ?7, updated_at = ?8
                     WHERE natural_key = ?1",
                    params![
                        natural_key,
                        accepted.source_key,
                        accepted.scores.sex,
                        accepted.scores.violence,
                        accepted.scores.language,
                        confidence,
                        reviewed as i64,
                        now,
                    ],
                )?;
                WriteKind::Updated
            }
        }
    };

    for change in &score_changes {
        conn.execute(
            "INSERT INTO score_changes (natural_key, category, old_value, new_value, changed_by,
                 changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                change.natural_key,
                change.category.as_str(),
                change.old_value,
                change.new_value,
                change.changed_by,
                format_datetime(&change.changed_at),
            ],
        )?;
    }

    Ok(UpsertOutcome {
        entry: entry_kind,
        scores: scores_kind,
        score_changes,
    })
}

impl SqliteCatalogStore {
    /// Open (creating or migrating as needed) the catalog database.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `read_pool_size` - Number of connections for concurrent reads
    pub fn new<P: AsRef<Path>>(db_path: P, read_pool_size: usize) -> Result<Self> {
        let db_path_ref = db_path.as_ref();

        let mut write_conn = Connection::open_with_flags(
            db_path_ref,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open catalog database")?;

        open_versioned(&mut write_conn, &CATALOG_VERSIONED_SCHEMAS, "catalog")?;
        write_conn.pragma_update(None, "journal_mode", "WAL")?;
        write_conn.pragma_update(None, "foreign_keys", "ON")?;
        write_conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let entry_count: i64 = write_conn
            .query_row("SELECT COUNT(*) FROM catalog_entries", [], |r| r.get(0))
            .unwrap_or(0);
        let pending_reviews: i64 = write_conn
            .query_row(
                "SELECT COUNT(*) FROM review_queue WHERE state = 'pending'",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0);
        info!(
            "Opened catalog: {} entries, {} pending reviews",
            entry_count, pending_reviews
        );

        let mut read_pool = Vec::with_capacity(read_pool_size.max(1));
        for _ in 0..read_pool_size.max(1) {
            let read_conn = Connection::open_with_flags(
                db_path_ref,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            read_conn.busy_timeout(std::time::Duration::from_secs(5))?;
            read_pool.push(Arc::new(Mutex::new(read_conn)));
        }

        Ok(SqliteCatalogStore {
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_pool,
            read_index: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn get_read_conn(&self) -> Arc<Mutex<Connection>> {
        let index = self.read_index.fetch_add(1, Ordering::SeqCst) % self.read_pool.len();
        self.read_pool[index].clone()
    }

    fn with_read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.get_read_conn();
        let guard = conn
            .lock()
            .map_err(|_| anyhow!("catalog read connection mutex poisoned"))?;
        f(&guard)
    }

    fn lock_write(&self) -> Result<MutexGuard<'_, Connection>> {
        self.write_conn
            .lock()
            .map_err(|_| anyhow!("catalog write connection mutex poisoned"))
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn get_entry(&self, natural_key: &str) -> Result<Option<CatalogHit>> {
        self.with_read(|conn| {
            let hit = conn
                .query_row(
                    &format!(
                        "SELECT {}, {} FROM catalog_entries e
                         LEFT JOIN content_scores s ON s.natural_key = e.natural_key
                         WHERE e.natural_key = ?1",
                        ENTRY_COLUMNS, SCORE_COLUMNS
                    ),
                    params![natural_key],
                    row_to_hit,
                )
                .optional()?;
            Ok(hit)
        })
    }

    fn get_score_record(&self, natural_key: &str) -> Result<Option<ContentScoreRecord>> {
        self.with_read(|conn| query_score(conn, natural_key))
    }

    fn find_mapping_for_listing(&self, source_key: &str) -> Result<Option<ContentScoreRecord>> {
        self.with_read(|conn| {
            let record = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM content_scores s WHERE s.source_key = ?1
                         ORDER BY s.updated_at DESC LIMIT 1",
                        SCORE_COLUMNS
                    ),
                    params![source_key],
                    row_to_score,
                )
                .optional()?;
            Ok(record.flatten())
        })
    }

    fn reconcile_match(&self, accepted: &AcceptedMatch) -> Result<UpsertOutcome> {
        let mut conn = self.lock_write()?;
        let tx = conn.transaction()?;
        let outcome = upsert_match(&tx, accepted)?;
        tx.commit()?;
        debug!(
            "Reconciled {} -> {}: entry {:?}, scores {:?}",
            accepted.source_key, accepted.metadata.natural_key, outcome.entry, outcome.scores
        );
        Ok(outcome)
    }

    fn flag_unavailable(&self, seen_source_keys: &HashSet<String>) -> Result<Vec<FlaggedEntry>> {
        let mut conn = self.lock_write()?;
        let tx = conn.transaction()?;
        let available: Vec<FlaggedEntry> = {
            let mut stmt = tx.prepare(
                "SELECT natural_key, source_key FROM content_scores WHERE source_available = 1",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(FlaggedEntry {
                        natural_key: row.get(0)?,
                        source_key: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let now = format_datetime(&Utc::now());
        let mut flagged = Vec::new();
        for entry in available {
            if seen_source_keys.contains(&entry.source_key) {
                continue;
            }
            tx.execute(
                "UPDATE content_scores SET source_available = 0, updated_at = ?2
                 WHERE natural_key = ?1",
                params![entry.natural_key, now],
            )?;
            flagged.push(entry);
        }
        tx.commit()?;
        Ok(flagged)
    }

    fn get_score_changes(&self, natural_key: &str) -> Result<Vec<ScoreChange>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT natural_key, category, old_value, new_value, changed_by, changed_at
                 FROM score_changes WHERE natural_key = ?1 ORDER BY changed_at, rowid",
            )?;
            let changes = stmt
                .query_map(params![natural_key], |row| {
                    let category: String = row.get(1)?;
                    let changed_at: String = row.get(5)?;
                    Ok(ScoreChange {
                        natural_key: row.get(0)?,
                        category: ScoreCategory::parse(&category).unwrap_or(ScoreCategory::Sex),
                        old_value: row.get(2)?,
                        new_value: row.get(3)?,
                        changed_by: row.get(4)?,
                        changed_at: parse_datetime(&changed_at),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(changes)
        })
    }

    fn list_genres(&self) -> Result<Vec<String>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT g.value FROM catalog_entries e, json_each(e.genres) g
                 ORDER BY g.value",
            )?;
            let genres = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(genres)
        })
    }

    fn count_entries(&self) -> Result<usize> {
        self.with_read(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM catalog_entries", [], |r| r.get(0))?;
            Ok(count as usize)
        })
    }

    fn enqueue_review(
        &self,
        listing: &ContentRatingListing,
        candidate: &MovieMetadata,
        confidence: f64,
    ) -> Result<EnqueueOutcome> {
        let listing_json = serde_json::to_string(listing)?;
        let candidate_json = serde_json::to_string(candidate)?;
        let confidence = round_confidence(confidence);

        let mut conn = self.lock_write()?;
        let tx = conn.transaction()?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM review_queue
                 WHERE listing_key = ?1 AND natural_key = ?2 AND state = ?3",
                params![
                    listing.source_key,
                    candidate.natural_key,
                    ReviewState::Pending.as_str()
                ],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE review_queue SET confidence = ?2, listing = ?3, candidate = ?4
                     WHERE id = ?1",
                    params![id, confidence, listing_json, candidate_json],
                )?;
                EnqueueOutcome::Refreshed(id)
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO review_queue (id, listing_key, natural_key, listing, candidate,
                         confidence, enqueued_at, state)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        id,
                        listing.source_key,
                        candidate.natural_key,
                        listing_json,
                        candidate_json,
                        confidence,
                        format_datetime(&Utc::now()),
                        ReviewState::Pending.as_str(),
                    ],
                )?;
                EnqueueOutcome::Created(id)
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn list_pending_reviews(&self) -> Result<Vec<ReviewQueueEntry>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM review_queue WHERE state = ?1
                 ORDER BY confidence DESC, enqueued_at ASC, id ASC",
                REVIEW_COLUMNS
            ))?;
            let entries = stmt
                .query_map(params![ReviewState::Pending.as_str()], row_to_review)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }

    fn get_review(&self, id: &str) -> Result<Option<ReviewQueueEntry>> {
        self.with_read(|conn| query_review(conn, id))
    }

    fn resolve_review(
        &self,
        id: &str,
        decision: ReviewDecision,
        resolved_by: &str,
    ) -> Result<ReviewResolution, ReviewError> {
        let mut conn = self.lock_write()?;
        let tx = conn.transaction()?;

        let now = format_datetime(&Utc::now());
        let target = decision.resulting_state();
        // The state guard makes the transition single-shot even if two
        // resolvers race on the same entry.
        let changed = tx.execute(
            "UPDATE review_queue SET state = ?2, resolved_at = ?3, resolved_by = ?4
             WHERE id = ?1 AND state = ?5",
            params![
                id,
                target.as_str(),
                now,
                resolved_by,
                ReviewState::Pending.as_str()
            ],
        )?;

        let entry = query_review(&tx, id)?.ok_or_else(|| ReviewError::NotFound(id.to_string()))?;
        if changed == 0 {
            return Err(ReviewError::ReviewConflict {
                id: id.to_string(),
                state: entry.state,
            });
        }

        let upsert = match decision {
            ReviewDecision::Approve => {
                let accepted = AcceptedMatch {
                    metadata: entry.candidate.clone(),
                    source_key: entry.listing.source_key.clone(),
                    scores: entry.listing.scores,
                    confidence: entry.confidence,
                    reviewed: true,
                    changed_by: format!("review:{}", resolved_by),
                };
                let outcome = upsert_match(&tx, &accepted).map_err(|e| ReviewError::Invalid {
                    id: id.to_string(),
                    reason: e.to_string(),
                })?;
                Some(outcome)
            }
            ReviewDecision::Reject => {
                tx.execute(
                    "INSERT OR IGNORE INTO rejected_pairings (listing_key, natural_key, confidence,
                         rejected_at, rejected_by)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        entry.listing.source_key,
                        entry.candidate.natural_key,
                        round_confidence(entry.confidence),
                        now,
                        resolved_by,
                    ],
                )?;
                None
            }
        };

        tx.commit()?;
        Ok(ReviewResolution { entry, upsert })
    }

    fn is_pairing_rejected(
        &self,
        listing_key: &str,
        natural_key: &str,
        confidence: f64,
    ) -> Result<bool> {
        self.with_read(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM rejected_pairings
                     WHERE listing_key = ?1 AND natural_key = ?2 AND confidence = ?3",
                    params![listing_key, natural_key, round_confidence(confidence)],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    fn search_entries(&self, query: &CompiledSearch) -> Result<SearchResults> {
        self.with_read(|conn| {
            let from_clause = query.from_clause();

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) {}", from_clause),
                params_from_iter(query.params.iter()),
                |r| r.get(0),
            )?;

            let mut all_params = query.params.clone();
            all_params.push(rusqlite::types::Value::Integer(query.limit as i64));
            all_params.push(rusqlite::types::Value::Integer(
                i64::try_from(query.offset).unwrap_or(i64::MAX),
            ));

            let mut stmt = conn.prepare(&format!(
                "SELECT {}, {} {} ORDER BY {} LIMIT ? OFFSET ?",
                ENTRY_COLUMNS, SCORE_COLUMNS, from_clause, query.order_by
            ))?;
            let entries = stmt
                .query_map(params_from_iter(all_params.iter()), row_to_hit)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(SearchResults {
                entries,
                total: total as usize,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct TestStore {
        store: SqliteCatalogStore,
        _temp_dir: TempDir,
    }

    fn create_test_store() -> TestStore {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteCatalogStore::new(temp_dir.path().join("catalog.db"), 2).unwrap();
        TestStore {
            store,
            _temp_dir: temp_dir,
        }
    }

    fn metadata(key: &str, title: &str, year: i32) -> MovieMetadata {
        let mut m = MovieMetadata::new(key, title, Some(year));
        m.genres = vec!["Action".to_string(), "Crime".to_string()];
        m.imdb_rating = Some(8.3);
        m
    }

    fn accepted(key: &str, source_key: &str, scores: ContentScores) -> AcceptedMatch {
        AcceptedMatch {
            metadata: metadata(key, "Heat", 1995),
            source_key: source_key.to_string(),
            scores,
            confidence: 100.0,
            reviewed: false,
            changed_by: "cycle-1".to_string(),
        }
    }

    fn listing(source_key: &str, scores: ContentScores) -> ContentRatingListing {
        ContentRatingListing {
            source_key: source_key.to_string(),
            title: "Heat".to_string(),
            year: Some(1995),
            scores,
            source_available: true,
        }
    }

    #[test]
    fn reconcile_creates_then_is_idempotent() {
        let test = create_test_store();
        let store = &test.store;
        let m = accepted("tt0113277", "heat-1995", ContentScores::new(2, 7, 8));

        let first = store.reconcile_match(&m).unwrap();
        assert_eq!(first.entry, WriteKind::Created);
        assert_eq!(first.scores, WriteKind::Created);
        assert!(first.created());

        let second = store.reconcile_match(&m).unwrap();
        assert_eq!(second.entry, WriteKind::Unchanged);
        assert_eq!(second.scores, WriteKind::Unchanged);
        assert!(!second.updated());
        assert!(store.get_score_changes("tt0113277").unwrap().is_empty());
        assert_eq!(store.count_entries().unwrap(), 1);
    }

    #[test]
    fn score_overwrite_is_audited() {
        let test = create_test_store();
        let store = &test.store;
        store
            .reconcile_match(&accepted("tt0113277", "heat-1995", ContentScores::new(2, 7, 8)))
            .unwrap();

        let mut changed = accepted("tt0113277", "heat-1995", ContentScores::new(2, 9, 8));
        changed.changed_by = "cycle-2".to_string();
        let outcome = store.reconcile_match(&changed).unwrap();
        assert_eq!(outcome.scores, WriteKind::Updated);
        assert!(outcome.updated());
        assert_eq!(outcome.score_changes.len(), 1);

        let changes = store.get_score_changes("tt0113277").unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].category, ScoreCategory::Violence);
        assert_eq!(changes[0].old_value, Some(7));
        assert_eq!(changes[0].new_value, 9);
        assert_eq!(changes[0].changed_by, "cycle-2");

        let record = store.get_score_record("tt0113277").unwrap().unwrap();
        assert_eq!(record.scores.violence, 9);
    }

    #[test]
    fn out_of_range_scores_are_never_stored() {
        let test = create_test_store();
        let store = &test.store;
        let result =
            store.reconcile_match(&accepted("tt1", "bad", ContentScores::new(11, 0, 0)));
        assert!(result.is_err());
        assert!(store.get_entry("tt1").unwrap().is_none());
    }

    #[test]
    fn flag_unavailable_keeps_entries() {
        let test = create_test_store();
        let store = &test.store;
        store
            .reconcile_match(&accepted("tt1", "heat-1995", ContentScores::new(1, 1, 1)))
            .unwrap();
        let mut other = accepted("tt2", "ronin-1998", ContentScores::new(1, 5, 6));
        other.metadata = metadata("tt2", "Ronin", 1998);
        store.reconcile_match(&other).unwrap();

        let seen: HashSet<String> = ["ronin-1998".to_string()].into_iter().collect();
        let flagged = store.flag_unavailable(&seen).unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].natural_key, "tt1");

        let hit = store.get_entry("tt1").unwrap().unwrap();
        let scores = hit.content_scores.unwrap();
        assert!(!scores.source_available);
        assert_eq!(scores.scores, ContentScores::new(1, 1, 1));

        // Already flagged entries are not reported twice.
        assert!(store.flag_unavailable(&seen).unwrap().is_empty());

        // Reappearing restores availability.
        let outcome = store
            .reconcile_match(&accepted("tt1", "heat-1995", ContentScores::new(1, 1, 1)))
            .unwrap();
        assert_eq!(outcome.scores, WriteKind::Updated);
        assert!(store.get_score_record("tt1").unwrap().unwrap().source_available);
    }

    #[test]
    fn enqueue_is_idempotent_per_pair() {
        let test = create_test_store();
        let store = &test.store;
        let l = listing("heat-1995", ContentScores::new(1, 2, 3));
        let c = metadata("tt1", "Heat", 1995);

        let first = store.enqueue_review(&l, &c, 80.0).unwrap();
        assert!(matches!(first, EnqueueOutcome::Created(_)));
        let second = store.enqueue_review(&l, &c, 82.5).unwrap();
        assert!(matches!(second, EnqueueOutcome::Refreshed(_)));
        assert_eq!(first.id(), second.id());

        let pending = store.list_pending_reviews().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].confidence, 82.5);
    }

    #[test]
    fn pending_reviews_ordered_by_confidence() {
        let test = create_test_store();
        let store = &test.store;
        let scores = ContentScores::new(1, 2, 3);
        store
            .enqueue_review(&listing("a", scores), &metadata("tt1", "A", 2000), 76.0)
            .unwrap();
        store
            .enqueue_review(&listing("b", scores), &metadata("tt2", "B", 2000), 87.0)
            .unwrap();
        let pending = store.list_pending_reviews().unwrap();
        assert_eq!(pending[0].listing.source_key, "b");
        assert_eq!(pending[1].listing.source_key, "a");
    }

    #[test]
    fn approve_creates_reviewed_entry() {
        let test = create_test_store();
        let store = &test.store;
        let outcome = store
            .enqueue_review(
                &listing("heat-1995", ContentScores::new(1, 8, 6)),
                &metadata("tt1", "Heat", 1995),
                80.0,
            )
            .unwrap();

        let resolution = store
            .resolve_review(outcome.id(), ReviewDecision::Approve, "alice")
            .unwrap();
        assert_eq!(resolution.entry.state, ReviewState::Approved);
        assert_eq!(resolution.entry.resolved_by.as_deref(), Some("alice"));
        assert!(resolution.upsert.unwrap().created());

        let record = store.get_score_record("tt1").unwrap().unwrap();
        assert!(record.reviewed);
        assert_eq!(record.match_confidence, 80.0);
        assert!(store.list_pending_reviews().unwrap().is_empty());
    }

    #[test]
    fn second_resolution_conflicts() {
        let test = create_test_store();
        let store = &test.store;
        let outcome = store
            .enqueue_review(
                &listing("heat-1995", ContentScores::new(1, 8, 6)),
                &metadata("tt1", "Heat", 1995),
                80.0,
            )
            .unwrap();
        store
            .resolve_review(outcome.id(), ReviewDecision::Reject, "alice")
            .unwrap();

        let err = store
            .resolve_review(outcome.id(), ReviewDecision::Approve, "bob")
            .unwrap_err();
        assert!(matches!(
            err,
            ReviewError::ReviewConflict {
                state: ReviewState::Rejected,
                ..
            }
        ));
        assert!(store.get_entry("tt1").unwrap().is_none());
    }

    #[test]
    fn resolve_unknown_entry_is_not_found() {
        let test = create_test_store();
        let err = test
            .store
            .resolve_review("missing", ReviewDecision::Approve, "alice")
            .unwrap_err();
        assert!(matches!(err, ReviewError::NotFound(_)));
    }

    #[test]
    fn rejection_is_remembered_at_its_confidence() {
        let test = create_test_store();
        let store = &test.store;
        let outcome = store
            .enqueue_review(
                &listing("heat-1995", ContentScores::new(1, 8, 6)),
                &metadata("tt1", "Heat", 1995),
                80.004,
            )
            .unwrap();
        store
            .resolve_review(outcome.id(), ReviewDecision::Reject, "alice")
            .unwrap();

        assert!(store.is_pairing_rejected("heat-1995", "tt1", 80.0).unwrap());
        assert!(!store.is_pairing_rejected("heat-1995", "tt1", 84.0).unwrap());
        assert!(!store.is_pairing_rejected("heat-1995", "tt2", 80.0).unwrap());
    }

    #[test]
    fn concurrent_duplicate_resolution_applies_once() {
        let test = create_test_store();
        let store = test.store.clone();
        let outcome = store
            .enqueue_review(
                &listing("heat-1995", ContentScores::new(1, 8, 6)),
                &metadata("tt1", "Heat", 1995),
                80.0,
            )
            .unwrap();
        let id = outcome.id().to_string();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    store
                        .resolve_review(&id, ReviewDecision::Approve, &format!("r{}", i))
                        .is_ok()
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn list_genres_is_sorted_and_distinct() {
        let test = create_test_store();
        let store = &test.store;
        store
            .reconcile_match(&accepted("tt1", "heat-1995", ContentScores::new(1, 1, 1)))
            .unwrap();
        let mut other = accepted("tt2", "up-2009", ContentScores::new(0, 1, 0));
        other.metadata = metadata("tt2", "Up", 2009);
        other.metadata.genres = vec!["Animation".to_string(), "Action".to_string()];
        store.reconcile_match(&other).unwrap();

        assert_eq!(
            store.list_genres().unwrap(),
            vec!["Action", "Animation", "Crime"]
        );
    }

    #[tokio::test]
    async fn test_concurrent_reads_no_blocking() {
        let test = create_test_store();
        let handles: Vec<_> = (0..10)
            .map(|_| {
                tokio::spawn({
                    let store = test.store.clone();
                    async move {
                        for _ in 0..50 {
                            let _ = store.count_entries();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
    }
}
