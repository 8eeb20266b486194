//! SQLite schema definitions for the server database.
//!
//! Operational data lives here: background job runs and schedules, the job
//! audit log and the append-only refresh cycle log.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Job runs and schedules
// =============================================================================

const JOB_RUNS_TABLE_V1: Table = Table {
    name: "job_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_job_runs_job_id_started", "job_id, started_at DESC"),
        ("idx_job_runs_status", "status"),
    ],
    unique_constraints: &[],
};

const JOB_SCHEDULES_TABLE_V1: Table = Table {
    name: "job_schedules",
    columns: &[
        sqlite_column!("job_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("next_run_at", &SqlType::Text, non_null = true),
        sqlite_column!("last_run_at", &SqlType::Text),
    ],
    indices: &[],
    unique_constraints: &[],
};

// =============================================================================
// Version 2 - Job audit log
// =============================================================================

const JOB_AUDIT_LOG_TABLE_V2: Table = Table {
    name: "job_audit_log",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("event_type", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Text, non_null = true),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("details", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
    ],
    indices: &[
        ("idx_job_audit_log_job_id", "job_id"),
        ("idx_job_audit_log_timestamp", "timestamp DESC"),
    ],
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    JOB_AUDIT_LOG_TABLE_V2.create(conn)
}

// =============================================================================
// Version 3 - Refresh cycle logs
// =============================================================================

/// One row per refresh cycle, never updated after insert.
const REFRESH_CYCLE_LOGS_TABLE_V3: Table = Table {
    name: "refresh_cycle_logs",
    columns: &[
        sqlite_column!("seq", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("id", &SqlType::Text, non_null = true),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("content_rating_status", &SqlType::Text, non_null = true),
        sqlite_column!("metadata_status", &SqlType::Text, non_null = true),
        sqlite_column!("counts", &SqlType::Text, non_null = true), // JSON object
        sqlite_column!("errors", &SqlType::Text, non_null = true), // JSON array
        sqlite_column!("flagged", &SqlType::Text, non_null = true), // JSON array of natural keys
        sqlite_column!(
            "cancelled",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text, non_null = true),
        sqlite_column!("duration_ms", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_refresh_cycle_logs_started", "started_at DESC"),
        ("idx_refresh_cycle_logs_status", "status"),
    ],
    unique_constraints: &[&["id"]],
};

fn migrate_v2_to_v3(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    REFRESH_CYCLE_LOGS_TABLE_V3.create(conn)
}

/// All versioned schemas for the server database.
///
/// Version 1: Job runs and schedules tables
/// Version 2: Job audit log table
/// Version 3: Refresh cycle log table
pub static SERVER_VERSIONED_SCHEMAS: [VersionedSchema; 3] = [
    VersionedSchema {
        version: 1,
        tables: &[JOB_RUNS_TABLE_V1, JOB_SCHEDULES_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            JOB_RUNS_TABLE_V1,
            JOB_SCHEDULES_TABLE_V1,
            JOB_AUDIT_LOG_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
    VersionedSchema {
        version: 3,
        tables: &[
            JOB_RUNS_TABLE_V1,
            JOB_SCHEDULES_TABLE_V1,
            JOB_AUDIT_LOG_TABLE_V2,
            REFRESH_CYCLE_LOGS_TABLE_V3,
        ],
        migration: Some(migrate_v2_to_v3),
    },
];
