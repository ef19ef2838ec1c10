use std::sync::Arc;

use crate::extractor::TextExtraction;
use crate::parser::ParsedFields;
use crate::template::schema::Template;
use crate::validator::ValidationReport;
use crate::worker::job::ExtractionJob;

/// Working state threaded through one pipeline run.
pub struct PipelineContext {
    // Input
    pub job: ExtractionJob,

    // Step 1 result — guaranteed Some after step_load_file
    pub file_bytes: Option<Vec<u8>>,

    // Step 2 result — guaranteed Some after step_extract_text
    pub text: Option<TextExtraction>,

    // Step 3 results — guaranteed Some after step_parse
    pub template: Option<Arc<Template>>,
    pub parsed: Option<ParsedFields>,

    // Step 4 result — guaranteed Some after step_validate
    pub report: Option<ValidationReport>,
}

impl PipelineContext {
    pub fn new(job: ExtractionJob) -> Self {
        Self {
            job,
            file_bytes: None,
            text: None,
            template: None,
            parsed: None,
            report: None,
        }
    }
}
