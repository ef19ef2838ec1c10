use thiserror::Error;

use crate::error::{ClassifyError, ExtractError, ParseError, StorageError, TemplateError};
use crate::extractor::ExtractorError;
use crate::parser::ParserError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("File storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Classification failed: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Text extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Template resolution failed: {0}")]
    Template(#[from] TemplateError),

    #[error("Structured parsing failed: {0}")]
    Parse(#[from] ParseError),
}

impl PipelineError {
    /// Whether the failure is worth feeding into the retry/backoff
    /// cycle. Classification and template problems will not fix
    /// themselves; provider hiccups, missing text, and infrastructure
    /// trouble plausibly will.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Classify(_) | Self::Template(_))
    }
}

impl From<ExtractorError> for PipelineError {
    fn from(error: ExtractorError) -> Self {
        match error {
            ExtractorError::Classify(e) => Self::Classify(e),
            ExtractorError::Extract(e) => Self::Extract(e),
        }
    }
}

impl From<ParserError> for PipelineError {
    fn from(error: ParserError) -> Self {
        match error {
            ParserError::Template(e) => Self::Template(e),
            ParserError::Parse(e) => Self::Parse(e),
        }
    }
}
