use super::models::{
    CycleCounts, CycleStatus, JobAuditEntry, JobAuditEventType, JobRun, JobRunStatus,
    JobScheduleState, RefreshCycleLog,
};
use super::schema::SERVER_VERSIONED_SCHEMAS;
use super::ServerStore;
use crate::sqlite_persistence::open_versioned;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

const CYCLE_LOG_COLUMNS: &str = "id, triggered_by, status, content_rating_status, metadata_status,
     counts, errors, flagged, cancelled, started_at, finished_at, duration_ms";

pub struct SqliteServerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteServerStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let mut conn = Connection::open(path).context("Failed to open server database")?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        open_versioned(&mut conn, &SERVER_VERSIONED_SCHEMAS, "server")?;
        info!("Opened server database at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        open_versioned(&mut conn, &SERVER_VERSIONED_SCHEMAS, "server")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("server database mutex poisoned"))
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
        let status_str: String = row.get("status")?;
        let started_at_str: String = row.get("started_at")?;
        let finished_at_str: Option<String> = row.get("finished_at")?;

        Ok(JobRun {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            started_at: Self::parse_datetime(&started_at_str).unwrap_or_else(Utc::now),
            finished_at: finished_at_str.and_then(|s| Self::parse_datetime(&s)),
            status: JobRunStatus::parse(&status_str).unwrap_or(JobRunStatus::Failed),
            error_message: row.get("error_message")?,
            triggered_by: row.get("triggered_by")?,
        })
    }

    fn row_to_schedule_state(row: &rusqlite::Row) -> rusqlite::Result<JobScheduleState> {
        let next_run_at_str: String = row.get("next_run_at")?;
        let last_run_at_str: Option<String> = row.get("last_run_at")?;

        Ok(JobScheduleState {
            job_id: row.get("job_id")?,
            next_run_at: Self::parse_datetime(&next_run_at_str).unwrap_or_else(Utc::now),
            last_run_at: last_run_at_str.and_then(|s| Self::parse_datetime(&s)),
        })
    }

    fn row_to_audit_entry(row: &rusqlite::Row) -> rusqlite::Result<JobAuditEntry> {
        let event_type_str: String = row.get("event_type")?;
        let timestamp_str: String = row.get("timestamp")?;
        let details_str: Option<String> = row.get("details")?;

        Ok(JobAuditEntry {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            event_type: JobAuditEventType::parse(&event_type_str)
                .unwrap_or(JobAuditEventType::Progress),
            timestamp: Self::parse_datetime(&timestamp_str)
                .unwrap_or_else(Utc::now)
                .timestamp(),
            duration_ms: row.get("duration_ms")?,
            details: details_str.and_then(|s| serde_json::from_str(&s).ok()),
            error: row.get("error")?,
        })
    }

    fn row_to_cycle_log(row: &rusqlite::Row) -> rusqlite::Result<RefreshCycleLog> {
        fn status(row: &rusqlite::Row, column: &str) -> rusqlite::Result<CycleStatus> {
            let s: String = row.get(column)?;
            Ok(CycleStatus::parse(&s).unwrap_or(CycleStatus::Failed))
        }
        fn json<T: serde::de::DeserializeOwned + Default>(
            row: &rusqlite::Row,
            column: &str,
        ) -> rusqlite::Result<T> {
            let s: String = row.get(column)?;
            Ok(serde_json::from_str(&s).unwrap_or_default())
        }

        let started_at_str: String = row.get("started_at")?;
        let finished_at_str: String = row.get("finished_at")?;

        Ok(RefreshCycleLog {
            id: row.get("id")?,
            triggered_by: row.get("triggered_by")?,
            status: status(row, "status")?,
            content_rating_status: status(row, "content_rating_status")?,
            metadata_status: status(row, "metadata_status")?,
            counts: json::<CycleCounts>(row, "counts")?,
            errors: json(row, "errors")?,
            flagged: json(row, "flagged")?,
            cancelled: row.get::<_, i64>("cancelled")? != 0,
            started_at: Self::parse_datetime(&started_at_str).unwrap_or_else(Utc::now),
            finished_at: Self::parse_datetime(&finished_at_str).unwrap_or_else(Utc::now),
            duration_ms: row.get("duration_ms")?,
        })
    }
}

impl ServerStore for SqliteServerStore {
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64> {
        let conn = self.lock()?;
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "INSERT INTO job_runs (job_id, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4)",
            params![job_id, now, JobRunStatus::Running.as_str(), triggered_by],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "UPDATE job_runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![now, status.as_str(), error_message, run_id],
        )?;

        Ok(())
    }

    fn get_running_jobs(&self) -> Result<Vec<JobRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
             FROM job_runs WHERE status = ?1 ORDER BY started_at DESC",
        )?;

        let jobs = stmt
            .query_map(
                params![JobRunStatus::Running.as_str()],
                Self::row_to_job_run,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(jobs)
    }

    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
             FROM job_runs WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
        )?;

        let jobs = stmt
            .query_map(params![job_id, limit as i64], Self::row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(jobs)
    }

    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
        let conn = self.lock()?;
        let job = conn
            .query_row(
                "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
                 FROM job_runs WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT 1",
                params![job_id],
                Self::row_to_job_run,
            )
            .optional()?;

        Ok(job)
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        let conn = self.lock()?;
        let now = Self::format_datetime(&Utc::now());

        // Anything still "running" at startup was interrupted by a restart.
        let count = conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = ?2, error_message = ?3
             WHERE status = ?4",
            params![
                JobRunStatus::Failed.as_str(),
                now,
                "Job was interrupted (server restart)",
                JobRunStatus::Running.as_str()
            ],
        )?;

        Ok(count)
    }

    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>> {
        let conn = self.lock()?;
        let state = conn
            .query_row(
                "SELECT job_id, next_run_at, last_run_at FROM job_schedules WHERE job_id = ?1",
                params![job_id],
                Self::row_to_schedule_state,
            )
            .optional()?;

        Ok(state)
    }

    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()> {
        let conn = self.lock()?;
        let next_run_at = Self::format_datetime(&state.next_run_at);
        let last_run_at = state.last_run_at.as_ref().map(Self::format_datetime);

        conn.execute(
            "INSERT INTO job_schedules (job_id, next_run_at, last_run_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET next_run_at = ?2, last_run_at = ?3",
            params![state.job_id, next_run_at, last_run_at],
        )?;

        Ok(())
    }

    fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64> {
        let conn = self.lock()?;
        let now = Self::format_datetime(&Utc::now());
        let details_str = details.map(|d| d.to_string());

        conn.execute(
            "INSERT INTO job_audit_log (job_id, event_type, timestamp, duration_ms, details, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job_id,
                event_type.as_str(),
                now,
                duration_ms,
                details_str,
                error
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, event_type, timestamp, duration_ms, details, error
             FROM job_audit_log
             WHERE job_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let entries = stmt
            .query_map(
                params![job_id, limit as i64, offset as i64],
                Self::row_to_audit_entry,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn append_cycle_log(&self, log: &RefreshCycleLog) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO refresh_cycle_logs (id, triggered_by, status, content_rating_status,
                 metadata_status, counts, errors, flagged, cancelled, started_at, finished_at,
                 duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                log.id,
                log.triggered_by,
                log.status.as_str(),
                log.content_rating_status.as_str(),
                log.metadata_status.as_str(),
                serde_json::to_string(&log.counts)?,
                serde_json::to_string(&log.errors)?,
                serde_json::to_string(&log.flagged)?,
                log.cancelled as i64,
                Self::format_datetime(&log.started_at),
                Self::format_datetime(&log.finished_at),
                log.duration_ms,
            ],
        )
        .with_context(|| format!("Failed to append cycle log {}", log.id))?;
        Ok(())
    }

    fn get_recent_cycle_logs(&self, limit: usize) -> Result<Vec<RefreshCycleLog>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM refresh_cycle_logs ORDER BY seq DESC LIMIT ?1",
            CYCLE_LOG_COLUMNS
        ))?;
        let logs = stmt
            .query_map(params![limit as i64], Self::row_to_cycle_log)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    fn get_last_completed_cycle(&self) -> Result<Option<RefreshCycleLog>> {
        let conn = self.lock()?;
        let log = conn
            .query_row(
                &format!(
                    "SELECT {} FROM refresh_cycle_logs WHERE status IN (?1, ?2)
                     ORDER BY seq DESC LIMIT 1",
                    CYCLE_LOG_COLUMNS
                ),
                params![CycleStatus::Success.as_str(), CycleStatus::Partial.as_str()],
                Self::row_to_cycle_log,
            )
            .optional()?;
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_store::{CycleError, ErrorKind, SourceRole};
    use tempfile::TempDir;

    struct TestStore {
        store: SqliteServerStore,
        _temp_dir: TempDir,
    }

    fn create_test_store() -> TestStore {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteServerStore::new(temp_dir.path().join("server.db")).unwrap();
        TestStore {
            store,
            _temp_dir: temp_dir,
        }
    }

    fn cycle_log(id: &str, status: CycleStatus) -> RefreshCycleLog {
        let now = Utc::now();
        RefreshCycleLog {
            id: id.to_string(),
            triggered_by: "manual".to_string(),
            status,
            content_rating_status: status,
            metadata_status: CycleStatus::Success,
            counts: CycleCounts {
                fetched: 3,
                created: 1,
                updated: 1,
                failed: 1,
                ..Default::default()
            },
            errors: vec![CycleError {
                kind: ErrorKind::MalformedListing,
                source: SourceRole::ContentRating,
                key: Some("broken-page".to_string()),
                message: "no scores".to_string(),
            }],
            flagged: vec!["tt0000001".to_string()],
            cancelled: false,
            started_at: now,
            finished_at: now,
            duration_ms: 12,
        }
    }

    #[test]
    fn test_record_job_start_and_finish() {
        let test = create_test_store();
        let store = &test.store;

        let run_id = store.record_job_start("refresh_catalog", "manual").unwrap();
        assert!(run_id > 0);

        let running = store.get_running_jobs().unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].status, JobRunStatus::Running);

        store
            .record_job_finish(run_id, JobRunStatus::Completed, None)
            .unwrap();

        assert!(store.get_running_jobs().unwrap().is_empty());
        let history = store.get_job_history("refresh_catalog", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobRunStatus::Completed);
        assert!(history[0].finished_at.is_some());
    }

    #[test]
    fn test_mark_stale_jobs_failed() {
        let test = create_test_store();
        let store = &test.store;

        store.record_job_start("refresh_catalog", "schedule").unwrap();
        assert_eq!(store.mark_stale_jobs_failed().unwrap(), 1);

        let last = store.get_last_run("refresh_catalog").unwrap().unwrap();
        assert_eq!(last.status, JobRunStatus::Failed);
        assert!(last.error_message.unwrap().contains("interrupted"));
    }

    #[test]
    fn test_schedule_state_upsert() {
        let test = create_test_store();
        let store = &test.store;
        assert!(store.get_schedule_state("refresh_catalog").unwrap().is_none());

        let next = Utc::now();
        store
            .update_schedule_state(&JobScheduleState {
                job_id: "refresh_catalog".to_string(),
                next_run_at: next,
                last_run_at: None,
            })
            .unwrap();
        store
            .update_schedule_state(&JobScheduleState {
                job_id: "refresh_catalog".to_string(),
                next_run_at: next,
                last_run_at: Some(next),
            })
            .unwrap();

        let state = store.get_schedule_state("refresh_catalog").unwrap().unwrap();
        assert!(state.last_run_at.is_some());
    }

    #[test]
    fn test_job_audit_log() {
        let test = create_test_store();
        let store = &test.store;

        store
            .log_job_audit("refresh_catalog", JobAuditEventType::Started, None, None, None)
            .unwrap();
        store
            .log_job_audit(
                "refresh_catalog",
                JobAuditEventType::Failed,
                Some(40),
                Some(&serde_json::json!({"status": "failed"})),
                Some("boom"),
            )
            .unwrap();

        let entries = store
            .get_job_audit_log_by_job("refresh_catalog", 10, 0)
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, JobAuditEventType::Failed);
        assert_eq!(entries[0].error.as_deref(), Some("boom"));
        assert_eq!(entries[0].details.as_ref().unwrap()["status"], "failed");
    }

    #[test]
    fn test_cycle_logs_are_returned_newest_first() {
        let test = create_test_store();
        let store = &test.store;

        store
            .append_cycle_log(&cycle_log("a", CycleStatus::Success))
            .unwrap();
        store
            .append_cycle_log(&cycle_log("b", CycleStatus::Partial))
            .unwrap();
        store
            .append_cycle_log(&cycle_log("c", CycleStatus::Failed))
            .unwrap();

        let logs = store.get_recent_cycle_logs(2).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].id, "c");
        assert_eq!(logs[1].id, "b");
        assert_eq!(logs[1].counts.failed, 1);
        assert_eq!(logs[1].errors[0].kind, ErrorKind::MalformedListing);
        assert_eq!(logs[1].flagged, vec!["tt0000001".to_string()]);

        let last = store.get_last_completed_cycle().unwrap().unwrap();
        assert_eq!(last.id, "b");
    }

    #[test]
    fn test_cycle_log_ids_are_unique() {
        let test = create_test_store();
        let store = &test.store;
        store
            .append_cycle_log(&cycle_log("same", CycleStatus::Success))
            .unwrap();
        assert!(store
            .append_cycle_log(&cycle_log("same", CycleStatus::Success))
            .is_err());
    }

    #[test]
    fn test_reopen_existing_database() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("server.db");
        {
            let store = SqliteServerStore::new(&path).unwrap();
            store
                .append_cycle_log(&cycle_log("persisted", CycleStatus::Success))
                .unwrap();
        }
        let store = SqliteServerStore::new(&path).unwrap();
        assert_eq!(store.get_recent_cycle_logs(10).unwrap().len(), 1);
    }
}
