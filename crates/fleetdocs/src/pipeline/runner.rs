//! Pipeline runner: one document through extraction, parsing, and
//! validation.
//!
//! The runner holds no per-job state; it composes injected
//! collaborators and short-circuits on hard failure (no text means no
//! parse attempt, a failed parse means no validation verdict). Field
//! validation issues are attached to the successful result, never
//! escalated to a job failure.

use std::sync::Arc;

use tracing::info_span;

use crate::broadcast::job_progress::JobPhase;
use crate::config::schema::Config;
use crate::error::ParseError;
use crate::extractor::{ExtractionMethod, TextExtractor};
use crate::parser::{FieldParser, ParseStrategy};
use crate::storage::{FileStore, LocalFileStore};
use crate::template::registry::TemplateRegistry;
use crate::validator::{aggregate_confidence, validate_fields};
use crate::worker::job::{ExtractionJob, ExtractionResult};

use super::context::PipelineContext;
use super::error::PipelineError;
use super::progress::{ProgressEvent, ProgressReporter};

pub struct Pipeline {
    store: Arc<dyn FileStore>,
    extractor: TextExtractor,
    parser: FieldParser,
    registry: Arc<TemplateRegistry>,
}

impl Pipeline {
    /// Test-friendly constructor — inject every collaborator.
    pub fn new(
        store: Arc<dyn FileStore>,
        extractor: TextExtractor,
        parser: FieldParser,
        registry: Arc<TemplateRegistry>,
    ) -> Self {
        Self {
            store,
            extractor,
            parser,
            registry,
        }
    }

    /// Production constructor — builds all sub-components from config.
    pub fn from_config(
        config: &Config,
        registry: Arc<TemplateRegistry>,
    ) -> Result<Self, ParseError> {
        let extractor = TextExtractor::from_config(&config.ocr);
        let parser = FieldParser::from_config(Arc::clone(&registry), &config.parser)?;
        Ok(Self {
            store: Arc::new(LocalFileStore::new()),
            extractor,
            parser,
            registry,
        })
    }

    /// Runs the full pipeline for a single job.
    pub fn run(
        &self,
        job: &ExtractionJob,
        progress: &dyn ProgressReporter,
    ) -> Result<ExtractionResult, PipelineError> {
        let _pipeline_span = info_span!("pipeline",
            job_id = %job.id,
            document_type = %job.document_type,
        )
        .entered();

        let mut ctx = PipelineContext::new(job.clone());

        // Step 1+2: fetch bytes and extract text
        {
            let _step = info_span!("extract_text").entered();
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::ExtractingText,
                message: "Recognizing document text...".to_string(),
            });
            if let Err(e) = self.step_extract_text(&mut ctx) {
                progress.report(ProgressEvent::Failed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        }

        // Step 3: structured parsing
        {
            let _step = info_span!("parse_fields").entered();
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Parsing,
                message: "Parsing structured fields...".to_string(),
            });
            if let Err(e) = self.step_parse(&mut ctx) {
                progress.report(ProgressEvent::Failed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        }

        // Step 4: validation + confidence (never fails the job)
        {
            let _step = info_span!("validate_fields").entered();
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Validating,
                message: "Validating extracted fields...".to_string(),
            });
            self.step_validate(&mut ctx);
        }

        let result = self.assemble_result(&ctx);

        progress.report(ProgressEvent::Completed {
            confidence: result.confidence,
            needs_review: result.needs_review,
            fields_found: result.fields_found.clone(),
            fields_missing: result.fields_missing.clone(),
        });

        Ok(result)
    }

    fn step_extract_text(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let bytes = self.store.load(&ctx.job.file_path)?;
        let extraction = self
            .extractor
            .extract(&bytes, ctx.job.mime_claimed.as_deref())?;

        tracing::debug!(
            method = %extraction.method,
            confidence = extraction.confidence,
            chars = extraction.text.chars().count(),
            cost = extraction.cost_estimate,
            "text extracted"
        );

        ctx.file_bytes = Some(bytes);
        ctx.text = Some(extraction);
        Ok(())
    }

    fn step_parse(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let text = ctx.text.as_ref().expect("extract step completed");
        let template = self.registry.get(ctx.job.document_type)?;
        let parsed = self.parser.parse_with_template(&text.text, &template)?;

        ctx.template = Some(template);
        ctx.parsed = Some(parsed);
        Ok(())
    }

    fn step_validate(&self, ctx: &mut PipelineContext) {
        let text = ctx.text.as_ref().expect("extract step completed");
        let parsed = ctx.parsed.as_ref().expect("parse step completed");
        let template = ctx.template.as_ref().expect("parse step completed");

        ctx.report = Some(validate_fields(template, &parsed.data, &text.text));
    }

    fn assemble_result(&self, ctx: &PipelineContext) -> ExtractionResult {
        let text = ctx.text.as_ref().expect("extract step completed");
        let parsed = ctx.parsed.as_ref().expect("parse step completed");
        let template = ctx.template.as_ref().expect("parse step completed");
        let report = ctx.report.as_ref().expect("validate step completed");

        // The pattern fallback is its own named strategy; otherwise the
        // text-extraction method stands.
        let method = match parsed.strategy {
            ParseStrategy::PatternFallback => ExtractionMethod::PatternFallback,
            ParseStrategy::Llm => text.method,
        };

        let confidence = aggregate_confidence(report, text.confidence, method);

        let mut errors: Vec<String> = parsed.errors.clone();
        errors.extend(report.errors.iter().map(|issue| issue.to_string()));
        let warnings: Vec<String> = report.warnings.iter().map(|issue| issue.to_string()).collect();

        let needs_review =
            confidence < template.confidence_threshold || !warnings.is_empty() || !errors.is_empty();

        let mut result = ExtractionResult::new(&ctx.job);
        result.extracted_data = report.values.clone();
        result.confidence = confidence;
        result.raw_text = text.text.clone();
        result.method = Some(method);
        result.fields_found = parsed.fields_found.clone();
        result.fields_missing = parsed.fields_missing.clone();
        result.errors = errors;
        result.warnings = warnings;
        result.template_version = Some(template.version.clone());
        result.needs_review = needs_review;
        result
    }
}
