use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetdocsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Classification error: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Parsing error: {0}")]
    Parse(#[from] ParseError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Inspecting file content to pick a processing strategy.
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("File is empty")]
    EmptyFile,
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Failed to process image: {0}")]
    ImageProcessing(String),

    #[error("No extractable text: every strategy returned empty output")]
    NoExtractableText,
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Parsing backend request failed: {0}")]
    Backend(String),

    #[error("Parsing backend timed out after {0}s")]
    Timeout(u64),

    #[error("Malformed parser response ({reason}); raw response retained for diagnostics")]
    MalformedResponse { reason: String, raw: String },

    #[error("No parsing strategy available: parser endpoint unconfigured and template has no match patterns")]
    NoStrategy,
}

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Failed to read template file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse template JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Template schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid match pattern for field '{field}': {reason}")]
    InvalidPattern { field: String, reason: String },

    #[error("Template validation failed: {message}")]
    Validation { message: String },

    #[error("No template registered for document type '{0}'")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {0}")]
    NotFound(PathBuf),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Job not found: {0}")]
    JobNotFound(String),
}

pub type Result<T> = std::result::Result<T, FleetdocsError>;
