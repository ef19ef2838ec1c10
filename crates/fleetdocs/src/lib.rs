pub mod broadcast;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod service;
pub mod storage;
pub mod template;
pub mod validator;
pub mod worker;

pub use broadcast::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, Config};
pub use error::{
    ClassifyError, ConfigError, ExtractError, FleetdocsError, ParseError, Result, StorageError,
    TemplateError, WorkerError,
};
pub use extractor::{ExtractionMethod, TextExtraction, TextExtractor};
pub use parser::{FieldParser, LlmClient};
pub use pipeline::{Pipeline, PipelineError, ProgressReporter};
pub use service::{ExtractionService, JobStatusView, SubmitReceipt};
pub use storage::{FileStore, LocalFileStore};
pub use template::{Template, TemplateRegistry, TemplateWatcher};
pub use worker::{
    DocumentType, ExtractionJob, ExtractionResult, FieldValue, JobStatus, SubmitRequest,
    WorkerPool,
};
