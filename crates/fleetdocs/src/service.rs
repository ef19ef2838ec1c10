//! Extraction service facade.
//!
//! The boundary the upload/UI layer talks to: non-blocking submission
//! with a completion estimate, poll-based status as the source of
//! truth, an advisory push channel, and the operator remediation
//! surface. Holds the worker pool with an explicit start/stop
//! lifecycle.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;

use crate::broadcast::job_progress::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
use crate::config::schema::Config;
use crate::db::job_repo::{self, JobFilter, QueueStats};
use crate::db::{self, result_repo, Database};
use crate::error::{ConfigError, FleetdocsError, Result};
use crate::extractor::ExtractionMethod;
use crate::pipeline::Pipeline;
use crate::template::registry::TemplateRegistry;
use crate::template::watcher::TemplateWatcher;
use crate::worker::job::{ExtractionJob, FieldValue, JobStatus, SubmitRequest};
use crate::worker::pool::WorkerPool;

/// Returned immediately from `submit`; processing happens in the
/// background.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub job_id: String,
    pub estimated_completion: DateTime<Utc>,
}

/// Result payload exposed once a job completes.
#[derive(Debug, Clone)]
pub struct CompletedView {
    pub extracted_data: BTreeMap<String, FieldValue>,
    pub confidence: f64,
    pub fields_found: Vec<String>,
    pub fields_missing: Vec<String>,
    pub needs_review: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub method: Option<ExtractionMethod>,
    pub template_version: Option<String>,
}

/// Poll response for one job.
#[derive(Debug, Clone)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    /// Coarse phase while processing.
    pub phase: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub scheduled_at: DateTime<Utc>,
    /// Present once the job has completed.
    pub result: Option<CompletedView>,
}

pub struct ExtractionService {
    config: Config,
    db: Database,
    registry: Arc<TemplateRegistry>,
    pipeline: Arc<Pipeline>,
    broadcaster: JobProgressBroadcaster,
    pool: Mutex<Option<WorkerPool>>,
    watcher: Mutex<Option<TemplateWatcher>>,
}

impl ExtractionService {
    /// Opens the configured (or default) database and builds the
    /// production pipeline.
    pub fn open(config: Config) -> Result<Self> {
        let db_path = match config.database_path {
            Some(ref path) => PathBuf::from(path),
            None => db::default_database_path().ok_or_else(|| {
                FleetdocsError::Config(ConfigError::Validation {
                    message: "no database_path configured and no home directory found"
                        .to_string(),
                })
            })?,
        };
        let db = Database::open(&db_path)?;
        Self::with_database(config, db)
    }

    /// Builds the service against an existing database handle.
    pub fn with_database(config: Config, db: Database) -> Result<Self> {
        let registry = Arc::new(TemplateRegistry::new(
            config.templates_directory.as_ref().map(PathBuf::from),
        ));
        let pipeline = Arc::new(
            Pipeline::from_config(&config, Arc::clone(&registry))
                .map_err(FleetdocsError::Parse)?,
        );
        Ok(Self::with_pipeline(config, db, pipeline, registry))
    }

    /// Fully injected constructor. Embedders and tests supply their
    /// own pipeline (fake extractors, scripted parsers).
    pub fn with_pipeline(
        config: Config,
        db: Database,
        pipeline: Arc<Pipeline>,
        registry: Arc<TemplateRegistry>,
    ) -> Self {
        Self {
            config,
            db,
            registry,
            pipeline,
            broadcaster: JobProgressBroadcaster::new(256),
            pool: Mutex::new(None),
            watcher: Mutex::new(None),
        }
    }

    /// Starts the worker pool (and the template watcher when an
    /// override directory is configured). Fails fast on malformed
    /// template files. Idempotent.
    pub fn start(&self) -> Result<()> {
        let loaded = self.registry.preload().map_err(FleetdocsError::Template)?;
        tracing::debug!("templates loaded for {} document types", loaded.len());

        let mut pool = self.pool.lock().expect("pool lock");
        if pool.is_none() {
            *pool = Some(WorkerPool::start(
                self.db.clone(),
                Arc::clone(&self.pipeline),
                self.broadcaster.clone(),
                self.config.worker.clone(),
            ));
        }
        drop(pool);

        if let Some(ref dir) = self.config.templates_directory {
            let mut watcher = self.watcher.lock().expect("watcher lock");
            if watcher.is_none() {
                match TemplateWatcher::spawn(
                    std::path::Path::new(dir),
                    Arc::clone(&self.registry),
                ) {
                    Ok(spawned) => *watcher = Some(spawned),
                    Err(e) => {
                        log::warn!("Template watcher unavailable: {}", e);
                    }
                }
            }
        }

        Ok(())
    }

    /// Stops the worker pool and the watcher, waiting for in-flight
    /// jobs to finish their current step.
    pub fn stop(&self) {
        if let Some(pool) = self.pool.lock().expect("pool lock").take() {
            pool.shutdown();
            pool.wait();
        }
        if let Some(watcher) = self.watcher.lock().expect("watcher lock").take() {
            watcher.stop();
        }
    }

    /// Accepts a document for background extraction. Returns
    /// immediately with the job id and a coarse completion estimate.
    pub fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt> {
        let job = ExtractionJob::from_submit(request, self.config.worker.max_retries);
        job_repo::insert(&self.db, &job)?;

        self.broadcaster
            .track(
                &job.id,
                job.document_type.as_str(),
                job.document_ref.as_deref(),
            )
            .update_phase(JobPhase::Queued, "Job queued for extraction");

        if let Some(ref pool) = *self.pool.lock().expect("pool lock") {
            pool.wake();
        }

        let depth = job_repo::eligible_queue_depth(&self.db)?;
        let estimated_completion = Utc::now()
            + Duration::seconds(
                (depth.max(1) * self.config.worker.nominal_job_secs) as i64,
            );

        tracing::info!(
            job_id = %job.id,
            document_type = %job.document_type,
            "job submitted"
        );

        Ok(SubmitReceipt {
            job_id: job.id,
            estimated_completion,
        })
    }

    /// Poll interface: the authoritative view of a job.
    pub fn status(&self, job_id: &str) -> Result<Option<JobStatusView>> {
        let job = match job_repo::find_by_id(&self.db, job_id)? {
            Some(job) => job,
            None => return Ok(None),
        };

        let result = if job.status == JobStatus::Completed {
            result_repo::find_by_job_id(&self.db, job_id)?.map(|r| CompletedView {
                extracted_data: r.extracted_data,
                confidence: r.confidence,
                fields_found: r.fields_found,
                fields_missing: r.fields_missing,
                needs_review: r.needs_review,
                warnings: r.warnings,
                errors: r.errors,
                method: r.method,
                template_version: r.template_version,
            })
        } else {
            None
        };

        Ok(Some(JobStatusView {
            job_id: job.id,
            status: job.status,
            phase: job.current_phase,
            error: job.error,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            scheduled_at: job.scheduled_at,
            result,
        }))
    }

    /// Push interface: best-effort progress events. Advisory only;
    /// `status` never disagrees with the job row.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.broadcaster.subscribe()
    }

    /// Operator retry of one failed job (works even past the retry
    /// bound; resets the counter and discards the stale result).
    pub fn retry_job(&self, job_id: &str) -> Result<bool> {
        let retried = job_repo::retry_job(&self.db, job_id)?;
        if retried {
            result_repo::delete_by_job_id(&self.db, job_id)?;
            if let Some(ref pool) = *self.pool.lock().expect("pool lock") {
                pool.wake();
            }
        }
        Ok(retried)
    }

    /// Bulk retry of failed jobs that still have retries left.
    pub fn retry_all_eligible(&self) -> Result<u64> {
        let requeued = job_repo::retry_all_eligible(&self.db)?;
        if requeued > 0 {
            if let Some(ref pool) = *self.pool.lock().expect("pool lock") {
                pool.wake();
            }
        }
        Ok(requeued)
    }

    /// Cancels a queued or processing job. Terminal jobs are never
    /// affected.
    pub fn cancel_job(&self, job_id: &str) -> Result<bool> {
        Ok(job_repo::cancel_job(&self.db, job_id)?)
    }

    /// Returns jobs stuck in processing beyond the configured
    /// staleness threshold to the queue.
    pub fn reset_stuck_jobs(&self) -> Result<u64> {
        Ok(job_repo::reset_stuck(
            &self.db,
            Duration::seconds(self.config.worker.stuck_after_secs as i64),
        )?)
    }

    /// Deletes failed jobs older than the retention window.
    pub fn purge_failed_jobs(&self) -> Result<u64> {
        Ok(job_repo::purge_failed(
            &self.db,
            Duration::days(self.config.retention.purge_failed_after_days as i64),
        )?)
    }

    /// Queue depth by status.
    pub fn stats(&self) -> Result<QueueStats> {
        Ok(job_repo::stats(&self.db)?)
    }

    /// Filtered job listing with pagination.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<(Vec<ExtractionJob>, u64)> {
        Ok(job_repo::query(&self.db, filter)?)
    }

    /// Drops cached templates; the next parse reloads from disk.
    pub fn invalidate_templates(&self) {
        self.registry.invalidate_all();
    }
}

impl Drop for ExtractionService {
    fn drop(&mut self) {
        self.stop();
    }
}
