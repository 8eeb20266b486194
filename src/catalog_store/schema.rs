//! SQLite schema definitions for the reconciled catalog database.
//!
//! `catalog_entries` is keyed by the metadata source's natural key. At most one
//! `content_scores` row exists per entry. The review queue and the pairings a
//! reviewer rejected live in the same database so that approvals can write the
//! entry in the same transaction as the state change.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

const ENTRY_FOREIGN_KEY: ForeignKey = ForeignKey {
    foreign_table: "catalog_entries",
    foreign_column: "natural_key",
    on_delete: ForeignKeyOnChange::Restrict,
};

// =============================================================================
// Version 1 - Entries, scores, review queue
// =============================================================================

const CATALOG_ENTRIES_TABLE_V1: Table = Table {
    name: "catalog_entries",
    columns: &[
        sqlite_column!("rowid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("natural_key", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("year", &SqlType::Integer),
        sqlite_column!("genres", &SqlType::Text, non_null = true), // JSON array
        sqlite_column!("classification", &SqlType::Text, non_null = true),
        sqlite_column!("imdb_rating", &SqlType::Real),
        sqlite_column!("rotten_tomatoes", &SqlType::Integer),
        sqlite_column!("metacritic", &SqlType::Integer),
        sqlite_column!(
            "award_wins",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "award_nominations",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("awards_summary", &SqlType::Text),
        sqlite_column!("runtime_minutes", &SqlType::Integer),
        sqlite_column!("plot", &SqlType::Text),
        sqlite_column!("director", &SqlType::Text),
        sqlite_column!("cast_members", &SqlType::Text, non_null = true), // JSON array
        sqlite_column!("poster_url", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_catalog_entries_year", "year"),
        ("idx_catalog_entries_imdb", "imdb_rating"),
        ("idx_catalog_entries_classification", "classification"),
    ],
    unique_constraints: &[&["natural_key"]],
};

const CONTENT_SCORES_TABLE_V1: Table = Table {
    name: "content_scores",
    columns: &[
        sqlite_column!("rowid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "natural_key",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ENTRY_FOREIGN_KEY)
        ),
        sqlite_column!("source_key", &SqlType::Text, non_null = true),
        sqlite_column!("sex", &SqlType::Integer, non_null = true),
        sqlite_column!("violence", &SqlType::Integer, non_null = true),
        sqlite_column!("language", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "source_available",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!("match_confidence", &SqlType::Real, non_null = true),
        sqlite_column!(
            "reviewed",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("first_scraped_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_content_scores_source_key", "source_key"),
        ("idx_content_scores_available", "source_available"),
    ],
    unique_constraints: &[&["natural_key"]],
};

const REVIEW_QUEUE_TABLE_V1: Table = Table {
    name: "review_queue",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true), // UUID
        sqlite_column!("listing_key", &SqlType::Text, non_null = true),
        sqlite_column!("natural_key", &SqlType::Text, non_null = true),
        sqlite_column!("listing", &SqlType::Text, non_null = true), // JSON snapshot
        sqlite_column!("candidate", &SqlType::Text, non_null = true), // JSON snapshot
        sqlite_column!("confidence", &SqlType::Real, non_null = true),
        sqlite_column!("enqueued_at", &SqlType::Text, non_null = true),
        sqlite_column!("state", &SqlType::Text, non_null = true),
        sqlite_column!("resolved_at", &SqlType::Text),
        sqlite_column!("resolved_by", &SqlType::Text),
    ],
    indices: &[
        ("idx_review_queue_pair", "listing_key, natural_key"),
        ("idx_review_queue_state", "state, confidence DESC"),
    ],
    unique_constraints: &[],
};

const REJECTED_PAIRINGS_TABLE_V1: Table = Table {
    name: "rejected_pairings",
    columns: &[
        sqlite_column!("rowid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("listing_key", &SqlType::Text, non_null = true),
        sqlite_column!("natural_key", &SqlType::Text, non_null = true),
        sqlite_column!("confidence", &SqlType::Real, non_null = true), // rounded to 2 decimals
        sqlite_column!("rejected_at", &SqlType::Text, non_null = true),
        sqlite_column!("rejected_by", &SqlType::Text),
    ],
    indices: &[],
    unique_constraints: &[&["listing_key", "natural_key", "confidence"]],
};

// =============================================================================
// Version 2 - Score change audit trail
// =============================================================================

const SCORE_CHANGES_TABLE_V2: Table = Table {
    name: "score_changes",
    columns: &[
        sqlite_column!("rowid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("natural_key", &SqlType::Text, non_null = true),
        sqlite_column!("category", &SqlType::Text, non_null = true),
        sqlite_column!("old_value", &SqlType::Integer),
        sqlite_column!("new_value", &SqlType::Integer, non_null = true),
        sqlite_column!("changed_by", &SqlType::Text, non_null = true),
        sqlite_column!("changed_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_score_changes_key", "natural_key, changed_at")],
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    SCORE_CHANGES_TABLE_V2.create(conn)
}

/// All versioned schemas for the catalog database.
///
/// Version 1: entries, content scores, review queue, rejected pairings
/// Version 2: score change audit trail
pub static CATALOG_VERSIONED_SCHEMAS: [VersionedSchema; 2] = [
    VersionedSchema {
        version: 1,
        tables: &[
            CATALOG_ENTRIES_TABLE_V1,
            CONTENT_SCORES_TABLE_V1,
            REVIEW_QUEUE_TABLE_V1,
            REJECTED_PAIRINGS_TABLE_V1,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            CATALOG_ENTRIES_TABLE_V1,
            CONTENT_SCORES_TABLE_V1,
            REVIEW_QUEUE_TABLE_V1,
            REJECTED_PAIRINGS_TABLE_V1,
            SCORE_CHANGES_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
