pub mod job;
pub mod pool;

pub use job::{DocumentType, ExtractionJob, ExtractionResult, FieldValue, JobStatus, SubmitRequest};
pub use pool::WorkerPool;
