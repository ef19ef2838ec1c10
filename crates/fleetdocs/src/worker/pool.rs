//! Worker pool: claims queued jobs and runs them through the pipeline.
//!
//! Workers are plain OS threads polling the shared queue; mutual
//! exclusion lives entirely in the atomic claim at the storage layer,
//! so any number of pools (or processes) can run against one database.
//! A crossbeam wake channel turns submission into an immediate poll
//! instead of waiting out the idle interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::broadcast::job_progress::JobProgressBroadcaster;
use crate::config::schema::WorkerConfig;
use crate::db::{job_repo, result_repo, Database};
use crate::db::job_repo::FailureDisposition;
use crate::pipeline::{BroadcastProgress, Pipeline, ProgressEvent, ProgressReporter};
use crate::worker::job::{ExtractionJob, JobStatus};

pub struct WorkerPool {
    wake_sender: Sender<()>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `config.count` worker threads against the given queue.
    ///
    /// # Panics
    /// Panics if `config.count` is 0.
    pub fn start(
        db: Database,
        pipeline: Arc<Pipeline>,
        broadcaster: JobProgressBroadcaster,
        config: WorkerConfig,
    ) -> Self {
        assert!(config.count > 0, "worker count must be > 0");

        let (wake_sender, wake_receiver) = bounded::<()>(config.count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.count);
        for worker_id in 0..config.count {
            let db = db.clone();
            let pipeline = Arc::clone(&pipeline);
            let broadcaster = broadcaster.clone();
            let wake_rx = wake_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_config = config.clone();

            let handle = thread::spawn(move || {
                run_worker(
                    worker_id,
                    db,
                    pipeline,
                    broadcaster,
                    wake_rx,
                    shutdown_flag,
                    worker_config,
                );
            });

            workers.push(handle);
        }

        info!("Started {} extraction workers", config.count);

        Self {
            wake_sender,
            workers,
            shutdown,
        }
    }

    /// Nudges an idle worker to poll immediately (e.g. after a
    /// submission). Never blocks; a full channel means workers are
    /// already busy.
    pub fn wake(&self) {
        let _ = self.wake_sender.try_send(());
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop the wake sender so idle workers see the disconnect.
        drop(self.wake_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    db: Database,
    pipeline: Arc<Pipeline>,
    broadcaster: JobProgressBroadcaster,
    wake_receiver: Receiver<()>,
    shutdown: Arc<AtomicBool>,
    config: WorkerConfig,
) {
    debug!("Worker {} started", worker_id);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_repo::claim_next(&db) {
            Ok(Some(job)) => {
                debug!(
                    "Worker {} claimed job {} ({})",
                    worker_id, job.id, job.file_path
                );
                process_job(&db, &pipeline, &broadcaster, &config, job);
                // Immediately try for the next job.
            }
            Ok(None) => {
                // Idle: sleep until a wake nudge or the poll interval.
                match wake_receiver.recv_timeout(poll_interval) {
                    Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                        debug!("Worker {} wake channel disconnected", worker_id);
                        break;
                    }
                }
            }
            Err(e) => {
                error!("Worker {} failed to claim a job: {}", worker_id, e);
                thread::sleep(poll_interval);
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Progress reporter persisting the coarse phase on the job row while
/// forwarding events to the broadcast channel, so poll and push agree.
struct WorkerProgress {
    db: Database,
    job_id: String,
    broadcast: BroadcastProgress,
}

impl ProgressReporter for WorkerProgress {
    fn report(&self, event: ProgressEvent) {
        if let ProgressEvent::Phase { ref phase, .. } = event {
            if let Err(e) = job_repo::set_phase(&self.db, &self.job_id, phase.as_str()) {
                warn!("Failed to persist phase for job {}: {}", self.job_id, e);
            }
        }
        self.broadcast.report(event);
    }
}

fn process_job(
    db: &Database,
    pipeline: &Pipeline,
    broadcaster: &JobProgressBroadcaster,
    config: &WorkerConfig,
    job: ExtractionJob,
) {
    let tracker = broadcaster.track(
        &job.id,
        job.document_type.as_str(),
        job.document_ref.as_deref(),
    );
    let progress = WorkerProgress {
        db: db.clone(),
        job_id: job.id.clone(),
        broadcast: BroadcastProgress::new(tracker),
    };

    let outcome = pipeline.run(&job, &progress);

    // Cooperative cancellation: an operator may have canceled the job
    // while the pipeline was running. The claim is only released by
    // this worker, so any other status means hands off.
    if !still_processing(db, &job.id) {
        info!(
            "Job {} no longer processing (canceled or reset); discarding outcome",
            job.id
        );
        return;
    }

    match outcome {
        Ok(result) => {
            if let Some(ref version) = result.template_version {
                if let Err(e) = job_repo::set_template_version(db, &job.id, version) {
                    warn!("Failed to record template version for {}: {}", job.id, e);
                }
            }
            if let Err(e) = result_repo::upsert(db, &result) {
                error!("Failed to persist result for job {}: {}", job.id, e);
                let _ = job_repo::record_failure(
                    db,
                    &job.id,
                    &format!("result persistence failed: {}", e),
                    true,
                    config.retry_base_secs,
                );
                return;
            }
            if let Err(e) = job_repo::mark_completed(db, &job.id) {
                error!("Failed to mark job {} completed: {}", job.id, e);
            }
        }
        Err(pipeline_error) => {
            let message = pipeline_error.to_string();
            match job_repo::record_failure(
                db,
                &job.id,
                &message,
                pipeline_error.is_retryable(),
                config.retry_base_secs,
            ) {
                Ok(FailureDisposition::Requeued { scheduled_at }) => {
                    broadcaster
                        .track(
                            &job.id,
                            job.document_type.as_str(),
                            job.document_ref.as_deref(),
                        )
                        .requeued(&message, scheduled_at);
                }
                Ok(FailureDisposition::PermanentlyFailed) => {
                    // The pipeline already emitted the Failed event.
                    debug!("Job {} permanently failed: {}", job.id, message);
                }
                Err(e) => {
                    error!("Failed to record failure for job {}: {}", job.id, e);
                }
            }
        }
    }
}

fn still_processing(db: &Database, job_id: &str) -> bool {
    match job_repo::find_by_id(db, job_id) {
        Ok(Some(job)) => job.status == JobStatus::Processing,
        Ok(None) => false,
        Err(e) => {
            warn!("Failed to re-read job {}: {}", job_id, e);
            false
        }
    }
}
