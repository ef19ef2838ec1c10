//! Job progress broadcaster for real-time status streaming.
//!
//! Push delivery is best-effort and advisory: the job row remains the
//! source of truth, and consumers can always fall back to polling.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Coarse phase of job processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    ExtractingText,
    Parsing,
    Validating,
    Completed,
    Failed,
    Requeued,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Queued => "queued",
            JobPhase::ExtractingText => "extracting_text",
            JobPhase::Parsing => "parsing",
            JobPhase::Validating => "validating",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
            JobPhase::Requeued => "requeued",
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::ExtractingText => write!(f, "Extracting text"),
            JobPhase::Parsing => write!(f, "Parsing"),
            JobPhase::Validating => write!(f, "Validating"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
            JobPhase::Requeued => write!(f, "Requeued for retry"),
        }
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    /// Document type being extracted.
    pub document_type: String,
    /// Owning business entity reference, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_ref: Option<String>,
    /// Current phase of processing.
    pub phase: JobPhase,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
    /// Final confidence (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Whether the completed result needs manual review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_review: Option<bool>,
    /// Field names found (set on completion).
    #[serde(default)]
    pub fields_found: Vec<String>,
    /// Field names missing (set on completion).
    #[serde(default)]
    pub fields_missing: Vec<String>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    /// Creates a new progress event.
    pub fn new(
        job_id: &str,
        document_type: &str,
        document_ref: Option<&str>,
        phase: JobPhase,
        message: &str,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            document_type: document_type.to_string(),
            document_ref: document_ref.map(|s| s.to_string()),
            phase,
            message: message.to_string(),
            timestamp: Utc::now(),
            confidence: None,
            needs_review: None,
            fields_found: vec![],
            fields_missing: vec![],
            error: None,
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker bound to one job's identity.
    pub fn track(
        &self,
        job_id: &str,
        document_type: &str,
        document_ref: Option<&str>,
    ) -> JobProgressTracker {
        JobProgressTracker {
            job_id: job_id.to_string(),
            document_type: document_type.to_string(),
            document_ref: document_ref.map(|s| s.to_string()),
            sender: Arc::clone(&self.sender),
        }
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Tracks progress for a single job.
pub struct JobProgressTracker {
    job_id: String,
    document_type: String,
    document_ref: Option<String>,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    /// Updates the current phase with a message.
    pub fn update_phase(&self, phase: JobPhase, message: &str) {
        let event = JobProgressEvent::new(
            &self.job_id,
            &self.document_type,
            self.document_ref.as_deref(),
            phase,
            message,
        );
        let _ = self.sender.send(event);
    }

    /// Marks the job as completed with result details.
    pub fn completed(
        &self,
        confidence: f64,
        needs_review: bool,
        fields_found: &[String],
        fields_missing: &[String],
    ) {
        let mut event = JobProgressEvent::new(
            &self.job_id,
            &self.document_type,
            self.document_ref.as_deref(),
            JobPhase::Completed,
            "Extraction completed",
        );
        event.confidence = Some(confidence);
        event.needs_review = Some(needs_review);
        event.fields_found = fields_found.to_vec();
        event.fields_missing = fields_missing.to_vec();
        let _ = self.sender.send(event);
    }

    /// Marks the job as failed with an error message.
    pub fn failed(&self, error: &str) {
        let mut event = JobProgressEvent::new(
            &self.job_id,
            &self.document_type,
            self.document_ref.as_deref(),
            JobPhase::Failed,
            "Extraction failed",
        );
        event.error = Some(error.to_string());
        let _ = self.sender.send(event);
    }

    /// Announces the job went back to the queue for a retry.
    pub fn requeued(&self, error: &str, scheduled_at: DateTime<Utc>) {
        let mut event = JobProgressEvent::new(
            &self.job_id,
            &self.document_type,
            self.document_ref.as_deref(),
            JobPhase::Requeued,
            &format!("Retry scheduled for {}", scheduled_at.format("%Y-%m-%dT%H:%M:%SZ")),
        );
        event.error = Some(error.to_string());
        let _ = self.sender.send(event);
    }
}
