//! Document-level confidence aggregation.
//!
//! Two stages: a field score weighted heavily toward required fields,
//! then a blend with the text-extraction confidence favoring parsing
//! quality, with fixed adjustments for the extraction method and
//! hallucination warnings. Rounded to two decimals.

use crate::extractor::ExtractionMethod;
use crate::parser::PATTERN_FALLBACK_MAX_CONFIDENCE;
use crate::validator::ValidationReport;

/// Weight of the required-fields term in the field score. Missing even
/// one required field caps the score low regardless of optional hits.
pub const REQUIRED_WEIGHT: f64 = 0.8;

/// Weight of the all-fields term in the field score.
pub const ALL_FIELDS_WEIGHT: f64 = 0.2;

/// Weight of the field score in the final blend.
pub const PARSE_WEIGHT: f64 = 0.6;

/// Weight of the text-extraction confidence in the final blend.
pub const TEXT_WEIGHT: f64 = 0.4;

/// Upward adjustment for high-trust text-layer extraction.
pub const DIRECT_TEXT_BONUS: f64 = 0.05;

/// OCR confidence below this triggers the downward adjustment.
pub const LOW_OCR_THRESHOLD: f64 = 0.8;

/// Downward adjustment for low OCR confidence.
pub const LOW_OCR_PENALTY: f64 = 0.10;

/// Penalty per value that failed the hallucination check.
pub const HALLUCINATION_PENALTY: f64 = 0.15;

/// Field score: `valid_required/total_required * 0.8 +
/// valid/total * 0.2`.
pub fn field_score(report: &ValidationReport) -> f64 {
    let required_term = if report.total_required == 0 {
        1.0
    } else {
        report.valid_required as f64 / report.total_required as f64
    };
    let all_term = if report.total_fields == 0 {
        0.0
    } else {
        report.valid_fields as f64 / report.total_fields as f64
    };
    required_term * REQUIRED_WEIGHT + all_term * ALL_FIELDS_WEIGHT
}

/// Final document confidence from the validation report and the text
/// extraction outcome.
pub fn aggregate_confidence(
    report: &ValidationReport,
    text_confidence: f64,
    method: ExtractionMethod,
) -> f64 {
    let mut confidence = field_score(report) * PARSE_WEIGHT + text_confidence * TEXT_WEIGHT;

    if method == ExtractionMethod::DirectText {
        confidence += DIRECT_TEXT_BONUS;
    }
    if method.used_ocr() && text_confidence < LOW_OCR_THRESHOLD {
        confidence -= LOW_OCR_PENALTY;
    }

    confidence -= HALLUCINATION_PENALTY * report.hallucination_count as f64;

    if method == ExtractionMethod::PatternFallback {
        confidence = confidence.min(PATTERN_FALLBACK_MAX_CONFIDENCE);
    }

    round2(confidence.clamp(0.0, 1.0))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
