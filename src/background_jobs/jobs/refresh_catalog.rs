//! Catalog refresh job.
//!
//! Runs one reconciliation cycle per trigger. The cycle log is persisted by
//! the orchestrator; this job only maps its outcome onto the job run record
//! and the job audit log.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
    JobAuditLogger,
};
use crate::config::RefreshSettings;
use crate::refresh::RefreshOrchestrator;
use crate::server_store::CycleStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const REFRESH_CATALOG_JOB_ID: &str = "refresh_catalog";

pub struct RefreshCatalogJob {
    orchestrator: Arc<RefreshOrchestrator>,
    interval: Duration,
    run_on_startup: bool,
}

impl RefreshCatalogJob {
    pub fn new(orchestrator: Arc<RefreshOrchestrator>, settings: &RefreshSettings) -> Self {
        Self {
            orchestrator,
            interval: Duration::from_secs(settings.interval_hours * 60 * 60),
            run_on_startup: settings.run_on_startup,
        }
    }
}

impl BackgroundJob for RefreshCatalogJob {
    fn id(&self) -> &'static str {
        REFRESH_CATALOG_JOB_ID
    }

    fn name(&self) -> &'static str {
        "Refresh Catalog"
    }

    fn description(&self) -> &'static str {
        "Reconcile content ratings with movie metadata and update the catalog"
    }

    fn schedule(&self) -> JobSchedule {
        let hooks = if self.run_on_startup {
            vec![HookEvent::OnStartup]
        } else {
            Vec::new()
        };
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks,
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let audit = JobAuditLogger::new(Arc::clone(&ctx.server_store), self.id());
        audit.log_started(Some(serde_json::json!({ "triggered_by": ctx.triggered_by })));

        let log = match self
            .orchestrator
            .run_cycle(&ctx.cancellation_token, &ctx.triggered_by)
        {
            Ok(log) => log,
            Err(e) => {
                let message = format!("{:#}", e);
                audit.log_failed(&message, None);
                return Err(JobError::ExecutionFailed(message));
            }
        };

        let details = serde_json::json!({
            "cycle_id": log.id,
            "status": log.status.as_str(),
            "counts": log.counts,
            "errors": log.errors.len(),
            "flagged": log.flagged.len(),
            "cancelled": log.cancelled,
        });

        if log.cancelled {
            info!("Refresh cycle {} cancelled", log.id);
            audit.log_failed("Cancelled", Some(details));
            return Err(JobError::Cancelled);
        }
        if log.status == CycleStatus::Failed {
            let message = log
                .errors
                .first()
                .map(|e| format!("cycle {} failed: {}", log.id, e.message))
                .unwrap_or_else(|| format!("cycle {} failed", log.id));
            warn!("{}", message);
            audit.log_failed(&message, Some(details));
            return Err(JobError::ExecutionFailed(message));
        }

        audit.log_completed(Some(details));
        Ok(())
    }
}
