use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::extractor::ExtractionMethod;

/// The closed set of document types the pipeline knows how to extract.
/// Each variant selects one extraction template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    License,
    CarrierCert,
    Insurance,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::License => "license",
            Self::CarrierCert => "carrier_cert",
            Self::Insurance => "insurance",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "license" => Some(Self::License),
            "carrier_cert" => Some(Self::CarrierCert),
            "insurance" => Some(Self::Insurance),
            _ => None,
        }
    }

    pub fn all() -> [DocumentType; 3] {
        [Self::License, Self::CarrierCert, Self::Insurance]
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle state. A job only reaches `Completed` or `Failed`
/// through `Processing`; `Failed` jobs may be returned to `Queued`
/// while retries remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states require an operator action to move again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submission from the upload layer. The MIME type is advisory only;
/// classification re-sniffs file content.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub file_path: String,
    pub document_type: DocumentType,
    pub document_ref: Option<String>,
    pub priority: i64,
    pub file_size: u64,
    pub mime_claimed: Option<String>,
}

impl SubmitRequest {
    pub fn new(file_path: impl Into<String>, document_type: DocumentType) -> Self {
        let file_path = file_path.into();
        let mime_claimed = detect_mime_type(Path::new(&file_path));
        Self {
            file_path,
            document_type,
            document_ref: None,
            priority: 0,
            file_size: 0,
            mime_claimed,
        }
    }

    pub fn with_document_ref(mut self, document_ref: impl Into<String>) -> Self {
        self.document_ref = Some(document_ref.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_file_size(mut self, file_size: u64) -> Self {
        self.file_size = file_size;
        self
    }

    pub fn with_mime_claimed(mut self, mime: impl Into<String>) -> Self {
        self.mime_claimed = Some(mime.into());
        self
    }
}

/// Detects MIME type from file path using the mime_guess crate.
/// Returns `None` for unknown extensions.
fn detect_mime_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first().map(|m| m.to_string())
}

/// One submitted document awaiting or undergoing processing.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub id: String,
    pub document_ref: Option<String>,
    pub document_type: DocumentType,
    pub file_path: String,
    pub file_size: u64,
    pub mime_claimed: Option<String>,
    pub status: JobStatus,
    pub priority: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    pub template_version: Option<String>,
    pub current_phase: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExtractionJob {
    /// Creates a queued job from a submission.
    pub fn from_submit(request: SubmitRequest, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_ref: request.document_ref,
            document_type: request.document_type,
            file_path: request.file_path,
            file_size: request.file_size,
            mime_claimed: request.mime_claimed,
            status: JobStatus::Queued,
            priority: request.priority,
            retry_count: 0,
            max_retries,
            error: None,
            template_version: None,
            current_phase: None,
            created_at: now,
            updated_at: now,
            scheduled_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the automatic requeue path may return this job to the queue.
    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// A typed extracted value. Serialized self-describing so stored results
/// can be decoded without consulting the template again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Date(NaiveDate),
    Number(f64),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
        }
    }
}

/// The output of one extraction attempt, owned by the job that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub job_id: String,
    pub document_ref: Option<String>,
    pub document_type: DocumentType,
    pub file_path: String,
    pub extracted_data: BTreeMap<String, FieldValue>,
    pub confidence: f64,
    pub raw_text: String,
    pub method: Option<ExtractionMethod>,
    pub fields_found: Vec<String>,
    pub fields_missing: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub template_version: Option<String>,
    pub needs_review: bool,
}

impl ExtractionResult {
    /// Creates an empty result shell for a job. Filled in as the
    /// pipeline progresses, finalized at the terminal transition.
    pub fn new(job: &ExtractionJob) -> Self {
        Self {
            job_id: job.id.clone(),
            document_ref: job.document_ref.clone(),
            document_type: job.document_type,
            file_path: job.file_path.clone(),
            extracted_data: BTreeMap::new(),
            confidence: 0.0,
            raw_text: String::new(),
            method: None,
            fields_found: Vec::new(),
            fields_missing: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            template_version: None,
            needs_review: false,
        }
    }
}
