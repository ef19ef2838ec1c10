//! Text extraction coordinator.
//!
//! One call turns file bytes into recognized text: classification picks
//! the strategy (direct text layer, OCR on a raster image, or
//! rasterize-then-OCR for scanned PDFs), and the result carries the
//! method used, a confidence estimate, and an operational cost
//! estimate.

pub mod ocr;
pub mod pdf;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::{self, Classification, PdfProbe};
use crate::config::schema::OcrConfig;
use crate::error::{ClassifyError, ExtractError};

pub use ocr::{DisabledOcr, OcrEngine, OcrOutcome, TesseractOcr};
pub use pdf::{PageRasterizer, PopplerRasterizer};

/// Confidence assigned to text read straight from a PDF text layer.
pub const DIRECT_TEXT_CONFIDENCE: f64 = 0.95;

/// Confidence assumed when the OCR engine reports none.
pub const OCR_DEFAULT_CONFIDENCE: f64 = 0.5;

/// Minimum characters a direct text-layer read must produce before it
/// is trusted without an OCR cross-check.
pub const MIN_DIRECT_TEXT_CHARS: usize = 50;

/// Fixed per-page unit cost of an OCR pass, surfaced for cost
/// tracking. Direct text extraction is treated as free.
pub const OCR_PAGE_UNIT_COST: f64 = 0.015;

/// Which strategy produced the recognized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    /// PDF text layer, no image processing.
    DirectText,
    /// Scanned PDF rasterized page by page and OCRed.
    OcrFallback,
    /// Both a text-layer attempt and an OCR attempt; the better one won.
    Hybrid,
    /// Raster image OCRed directly.
    DirectImageOcr,
    /// Regex pattern extraction used in place of the language-model
    /// parser (low-confidence strategy, never silently merged).
    PatternFallback,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectText => "direct-text",
            Self::OcrFallback => "ocr-fallback",
            Self::Hybrid => "hybrid",
            Self::DirectImageOcr => "direct-image-ocr",
            Self::PatternFallback => "pattern-fallback",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "direct-text" => Some(Self::DirectText),
            "ocr-fallback" => Some(Self::OcrFallback),
            "hybrid" => Some(Self::Hybrid),
            "direct-image-ocr" => Some(Self::DirectImageOcr),
            "pattern-fallback" => Some(Self::PatternFallback),
            _ => None,
        }
    }

    /// Whether OCR produced (or co-produced) the text.
    pub fn used_ocr(&self) -> bool {
        matches!(self, Self::OcrFallback | Self::Hybrid | Self::DirectImageOcr)
    }
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognized text and how it was obtained.
#[derive(Debug, Clone)]
pub struct TextExtraction {
    pub text: String,
    pub confidence: f64,
    pub method: ExtractionMethod,
    pub cost_estimate: f64,
    pub page_count: Option<usize>,
}

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// Coordinates the classifier and the extraction strategies.
pub struct TextExtractor {
    ocr: Arc<dyn OcrEngine>,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl TextExtractor {
    pub fn new(ocr: Arc<dyn OcrEngine>, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self { ocr, rasterizer }
    }

    /// Production constructor: Tesseract OCR + poppler rasterization.
    /// With OCR disabled, image and scanned-PDF jobs fail instead of
    /// silently succeeding empty.
    pub fn from_config(config: &OcrConfig) -> Self {
        let ocr: Arc<dyn OcrEngine> = if config.enabled {
            Arc::new(TesseractOcr::new(&config.languages, config.dpi))
        } else {
            Arc::new(ocr::DisabledOcr)
        };
        Self {
            ocr,
            rasterizer: Arc::new(PopplerRasterizer::new(config.dpi)),
        }
    }

    /// Classifies the bytes and runs the matching strategy.
    pub fn extract(
        &self,
        bytes: &[u8],
        mime_claimed: Option<&str>,
    ) -> Result<TextExtraction, ExtractorError> {
        let classification = classifier::classify(bytes, mime_claimed)?;
        Ok(self.extract_classified(&classification, bytes)?)
    }

    /// Runs the strategy for an already-classified file.
    pub fn extract_classified(
        &self,
        classification: &Classification,
        bytes: &[u8],
    ) -> Result<TextExtraction, ExtractError> {
        let _span = tracing::info_span!("extractor", kind = classification.kind()).entered();

        let extraction = match classification {
            Classification::Image => self.extract_image(bytes)?,
            Classification::Pdf(probe) if probe.has_text_layer => {
                self.extract_pdf_text_layer(probe, bytes)?
            }
            Classification::Pdf(probe) => self.extract_pdf_scanned(probe, bytes)?,
        };

        if extraction.text.trim().is_empty() {
            return Err(ExtractError::NoExtractableText);
        }
        Ok(extraction)
    }

    fn extract_image(&self, bytes: &[u8]) -> Result<TextExtraction, ExtractError> {
        let outcome = self.ocr.recognize(bytes)?;
        Ok(TextExtraction {
            text: outcome.text,
            confidence: outcome.confidence.unwrap_or(OCR_DEFAULT_CONFIDENCE),
            method: ExtractionMethod::DirectImageOcr,
            cost_estimate: OCR_PAGE_UNIT_COST,
            page_count: None,
        })
    }

    fn extract_pdf_text_layer(
        &self,
        probe: &PdfProbe,
        bytes: &[u8],
    ) -> Result<TextExtraction, ExtractError> {
        let direct = TextExtraction {
            text: probe.text.clone(),
            confidence: DIRECT_TEXT_CONFIDENCE,
            method: ExtractionMethod::DirectText,
            cost_estimate: 0.0,
            page_count: Some(probe.page_count),
        };

        if direct.text.trim().chars().count() >= MIN_DIRECT_TEXT_CHARS {
            return Ok(direct);
        }

        // The text layer exists but yielded almost nothing. Cross-check
        // with OCR and keep whichever read is more trustworthy.
        tracing::debug!(
            direct_chars = direct.text.trim().chars().count(),
            "text layer too thin, running OCR cross-check"
        );
        let ocr = match self.ocr_pdf_pages(bytes, probe.page_count.max(1)) {
            Ok(ocr) => ocr,
            Err(e) => {
                tracing::warn!("OCR cross-check failed: {}. Keeping direct text.", e);
                return Ok(direct);
            }
        };

        let preferred = prefer_better(&direct, &ocr);
        Ok(TextExtraction {
            text: preferred.text.clone(),
            confidence: preferred.confidence,
            method: ExtractionMethod::Hybrid,
            cost_estimate: ocr.cost_estimate,
            page_count: direct.page_count,
        })
    }

    fn extract_pdf_scanned(
        &self,
        probe: &PdfProbe,
        bytes: &[u8],
    ) -> Result<TextExtraction, ExtractError> {
        let page_count = if probe.page_count > 0 {
            probe.page_count
        } else {
            // lopdf could not parse the document; ask the rasterizer.
            self.rasterizer.page_count(bytes)?
        };
        self.ocr_pdf_pages(bytes, page_count)
    }

    /// Rasterizes and OCRs every page, concatenating with page markers.
    /// Individual page failures are skipped; if no page produced output
    /// the last error (if any) is surfaced.
    fn ocr_pdf_pages(
        &self,
        pdf_bytes: &[u8],
        page_count: usize,
    ) -> Result<TextExtraction, ExtractError> {
        let _span = tracing::info_span!("extractor.ocr_pages", pages = page_count).entered();

        let mut all_text = String::new();
        let mut confidences = Vec::new();
        let mut pages_ocred = 0usize;
        let mut last_error: Option<ExtractError> = None;

        for page_num in 1..=page_count {
            let page = self
                .rasterizer
                .rasterize_page(pdf_bytes, page_num as u32)
                .and_then(|image| self.ocr.recognize(&image));
            match page {
                Ok(outcome) => {
                    pages_ocred += 1;
                    confidences.push(outcome.confidence.unwrap_or(OCR_DEFAULT_CONFIDENCE));
                    // Blank pages get no marker; markers only delimit
                    // recognized content.
                    if !outcome.text.trim().is_empty() {
                        all_text.push_str(&format!("--- Page {} ---\n", page_num));
                        all_text.push_str(&outcome.text);
                        all_text.push('\n');
                    }
                }
                Err(e) => {
                    tracing::warn!("page {} OCR failed: {}", page_num, e);
                    last_error = Some(e);
                }
            }
        }

        if pages_ocred == 0 {
            return Err(last_error.unwrap_or(ExtractError::NoExtractableText));
        }
        if all_text.trim().is_empty() {
            return Err(ExtractError::NoExtractableText);
        }

        let confidence = confidences.iter().sum::<f64>() / confidences.len() as f64;

        Ok(TextExtraction {
            text: all_text,
            confidence,
            method: ExtractionMethod::OcrFallback,
            cost_estimate: OCR_PAGE_UNIT_COST * pages_ocred as f64,
            page_count: Some(page_count),
        })
    }
}

/// Picks the more trustworthy of two reads: more text wins, confidence
/// breaks ties.
fn prefer_better<'a>(a: &'a TextExtraction, b: &'a TextExtraction) -> &'a TextExtraction {
    let a_len = a.text.trim().chars().count();
    let b_len = b.text.trim().chars().count();
    if a_len != b_len {
        if a_len > b_len {
            a
        } else {
            b
        }
    } else if a.confidence >= b.confidence {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// OCR fake returning scripted outcomes and counting invocations.
    struct FakeOcr {
        outcomes: Mutex<Vec<Result<OcrOutcome, ExtractError>>>,
        calls: AtomicUsize,
    }

    impl FakeOcr {
        fn returning(outcomes: Vec<Result<OcrOutcome, ExtractError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            })
        }

        fn with_text(text: &str, confidence: Option<f64>) -> Arc<Self> {
            Self::returning(vec![Ok(OcrOutcome {
                text: text.to_string(),
                confidence,
            })])
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl OcrEngine for FakeOcr {
        fn recognize(&self, _image_bytes: &[u8]) -> Result<OcrOutcome, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                Ok(OcrOutcome {
                    text: String::new(),
                    confidence: None,
                })
            } else {
                outcomes.remove(0)
            }
        }
    }

    /// Rasterizer fake handing out placeholder page images.
    struct FakeRasterizer {
        pages: usize,
    }

    impl PageRasterizer for FakeRasterizer {
        fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractError> {
            Ok(self.pages)
        }

        fn rasterize_page(
            &self,
            _pdf_bytes: &[u8],
            page_num: u32,
        ) -> Result<Vec<u8>, ExtractError> {
            Ok(format!("page-image-{}", page_num).into_bytes())
        }
    }

    fn extractor(ocr: Arc<FakeOcr>, pages: usize) -> (TextExtractor, Arc<FakeOcr>) {
        let extractor = TextExtractor::new(ocr.clone(), Arc::new(FakeRasterizer { pages }));
        (extractor, ocr)
    }

    fn text_layer_probe(text: &str, page_count: usize) -> Classification {
        Classification::Pdf(PdfProbe {
            text: text.to_string(),
            page_count,
            has_text_layer: true,
        })
    }

    fn scanned_probe(page_count: usize) -> Classification {
        Classification::Pdf(PdfProbe {
            text: String::new(),
            page_count,
            has_text_layer: false,
        })
    }

    #[test]
    fn test_text_layer_pdf_never_invokes_ocr() {
        let body = "Carrier operating authority certificate. ".repeat(4);
        let (extractor, ocr) = extractor(FakeOcr::with_text("unused", None), 1);

        let result = extractor
            .extract_classified(&text_layer_probe(&body, 1), b"%PDF-")
            .unwrap();

        assert_eq!(result.method, ExtractionMethod::DirectText);
        assert_eq!(result.confidence, DIRECT_TEXT_CONFIDENCE);
        assert_eq!(result.cost_estimate, 0.0);
        assert_eq!(result.page_count, Some(1));
        assert_eq!(ocr.call_count(), 0, "direct text path must not OCR");
    }

    #[test]
    fn test_thin_text_layer_falls_back_to_hybrid() {
        // Under MIN_DIRECT_TEXT_CHARS: the coordinator cross-checks
        // with OCR and the longer read wins.
        let ocr_text = "INSURANCE CERTIFICATE policy number INS-2207-4415 effective through 2027";
        let (extractor, ocr) = extractor(FakeOcr::with_text(ocr_text, Some(0.9)), 1);

        let result = extractor
            .extract_classified(&text_layer_probe("stamp only", 1), b"%PDF-")
            .unwrap();

        assert_eq!(result.method, ExtractionMethod::Hybrid);
        assert!(result.text.contains("INS-2207-4415"));
        assert_eq!(result.confidence, 0.9);
        assert!(result.cost_estimate > 0.0);
        assert_eq!(ocr.call_count(), 1);
    }

    #[test]
    fn test_hybrid_keeps_direct_text_when_ocr_is_worse() {
        // OCR returns less text than even the thin layer: direct wins,
        // but the method still records that both ran.
        let (extractor, _ocr) = extractor(FakeOcr::with_text("x", Some(0.3)), 1);

        let result = extractor
            .extract_classified(&text_layer_probe("short but real text", 1), b"%PDF-")
            .unwrap();

        assert_eq!(result.method, ExtractionMethod::Hybrid);
        assert_eq!(result.text, "short but real text");
        assert_eq!(result.confidence, DIRECT_TEXT_CONFIDENCE);
    }

    #[test]
    fn test_scanned_pdf_ocrs_every_page_with_markers() {
        let ocr = FakeOcr::returning(vec![
            Ok(OcrOutcome {
                text: "first page words".to_string(),
                confidence: Some(0.9),
            }),
            Ok(OcrOutcome {
                text: "second page words".to_string(),
                confidence: Some(0.7),
            }),
        ]);
        let (extractor, ocr) = extractor(ocr, 2);

        let result = extractor
            .extract_classified(&scanned_probe(2), b"%PDF-")
            .unwrap();

        assert_eq!(result.method, ExtractionMethod::OcrFallback);
        assert!(result.text.contains("--- Page 1 ---"));
        assert!(result.text.contains("--- Page 2 ---"));
        assert!(result.text.contains("first page words"));
        assert!(result.text.contains("second page words"));
        assert!((result.confidence - 0.8).abs() < 1e-9);
        assert!((result.cost_estimate - 2.0 * OCR_PAGE_UNIT_COST).abs() < 1e-9);
        assert_eq!(result.page_count, Some(2));
        assert_eq!(ocr.call_count(), 2);
    }

    #[test]
    fn test_unparsable_pdf_asks_rasterizer_for_page_count() {
        // Probe with zero pages (lopdf failed): rasterizer page count
        // drives the loop.
        let ocr = FakeOcr::returning(vec![
            Ok(OcrOutcome {
                text: "recovered text".to_string(),
                confidence: None,
            }),
            Ok(OcrOutcome {
                text: "more recovered text".to_string(),
                confidence: None,
            }),
            Ok(OcrOutcome {
                text: "even more".to_string(),
                confidence: None,
            }),
        ]);
        let (extractor, ocr) = extractor(ocr, 3);

        let result = extractor
            .extract_classified(&scanned_probe(0), b"%PDF-")
            .unwrap();

        assert_eq!(result.page_count, Some(3));
        assert_eq!(ocr.call_count(), 3);
        // No engine-reported confidence: the default applies.
        assert_eq!(result.confidence, OCR_DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_empty_ocr_output_is_no_extractable_text() {
        let ocr = FakeOcr::returning(vec![
            Ok(OcrOutcome {
                text: String::new(),
                confidence: None,
            }),
            Ok(OcrOutcome {
                text: "   \n".to_string(),
                confidence: None,
            }),
        ]);
        let (extractor, _ocr) = extractor(ocr, 2);

        let result = extractor.extract_classified(&scanned_probe(2), b"%PDF-");
        assert!(matches!(result, Err(ExtractError::NoExtractableText)));
    }

    #[test]
    fn test_all_pages_failing_surfaces_ocr_error() {
        let ocr = FakeOcr::returning(vec![
            Err(ExtractError::OcrFailed("engine crashed".into())),
            Err(ExtractError::OcrFailed("engine crashed".into())),
        ]);
        let (extractor, _ocr) = extractor(ocr, 2);

        let result = extractor.extract_classified(&scanned_probe(2), b"%PDF-");
        match result {
            Err(ExtractError::OcrFailed(msg)) => assert!(msg.contains("engine crashed")),
            other => panic!("expected OcrFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_page_failure_keeps_going() {
        let ocr = FakeOcr::returning(vec![
            Err(ExtractError::OcrFailed("bad page".into())),
            Ok(OcrOutcome {
                text: "salvaged second page".to_string(),
                confidence: Some(0.6),
            }),
        ]);
        let (extractor, _ocr) = extractor(ocr, 2);

        let result = extractor
            .extract_classified(&scanned_probe(2), b"%PDF-")
            .unwrap();
        assert!(result.text.contains("salvaged second page"));
        assert!(!result.text.contains("--- Page 1 ---"));
        assert!((result.cost_estimate - OCR_PAGE_UNIT_COST).abs() < 1e-9);
    }

    #[test]
    fn test_image_goes_straight_to_ocr() {
        let (extractor, ocr) = extractor(
            FakeOcr::with_text("DRIVER LICENSE DL4471202", Some(0.85)),
            1,
        );

        let result = extractor
            .extract_classified(&Classification::Image, b"\x89PNG\r\n\x1a\n...")
            .unwrap();

        assert_eq!(result.method, ExtractionMethod::DirectImageOcr);
        assert_eq!(result.confidence, 0.85);
        assert_eq!(result.page_count, None);
        assert_eq!(ocr.call_count(), 1);
    }

    #[test]
    fn test_extract_classifies_real_pdf_bytes() {
        // Full path through classify(): a generated text-layer PDF
        // comes back as direct text with no OCR.
        let body = "Motor carrier certificate of registration. ".repeat(4);
        let pdf = crate::classifier::tests::make_text_pdf(&body);
        let (extractor, ocr) = extractor(FakeOcr::with_text("unused", None), 1);

        let result = extractor.extract(&pdf, Some("application/pdf")).unwrap();
        assert_eq!(result.method, ExtractionMethod::DirectText);
        assert!(result.text.contains("Motor carrier certificate"));
        assert_eq!(ocr.call_count(), 0);
    }

    #[test]
    fn test_extract_rejects_unsupported_bytes() {
        let (extractor, _ocr) = extractor(FakeOcr::with_text("unused", None), 1);
        let result = extractor.extract(b"MZ\x90\x00 executable", Some("application/msword"));
        assert!(matches!(result, Err(ExtractorError::Classify(_))));
    }

    #[test]
    fn test_method_string_round_trip() {
        for m in [
            ExtractionMethod::DirectText,
            ExtractionMethod::OcrFallback,
            ExtractionMethod::Hybrid,
            ExtractionMethod::DirectImageOcr,
            ExtractionMethod::PatternFallback,
        ] {
            assert_eq!(ExtractionMethod::from_str(m.as_str()), Some(m));
        }
        assert_eq!(ExtractionMethod::from_str("telepathy"), None);
    }

    #[test]
    fn test_used_ocr() {
        assert!(!ExtractionMethod::DirectText.used_ocr());
        assert!(!ExtractionMethod::PatternFallback.used_ocr());
        assert!(ExtractionMethod::OcrFallback.used_ocr());
        assert!(ExtractionMethod::Hybrid.used_ocr());
        assert!(ExtractionMethod::DirectImageOcr.used_ocr());
    }
}
