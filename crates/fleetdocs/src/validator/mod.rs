//! Field validation.
//!
//! Applies each field's transform, checks the type-specific rules from
//! the template's tagged union, and runs the hallucination check
//! against the raw recognized text. Validation failures never fail the
//! job; they are recorded on the result and lower its confidence.

pub mod confidence;

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Utc};

use crate::template::schema::{DateConstraint, FieldRules, Template};
use crate::worker::job::FieldValue;

pub use confidence::{aggregate_confidence, field_score};

/// One field-level problem found during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl FieldIssue {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Outcome of validating one document's parsed fields.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Transformed, typed values. Values that failed type validation
    /// are kept as text alongside an error entry.
    pub values: BTreeMap<String, FieldValue>,
    pub errors: Vec<FieldIssue>,
    pub warnings: Vec<FieldIssue>,
    pub valid_required: usize,
    pub total_required: usize,
    pub valid_fields: usize,
    pub total_fields: usize,
    /// Values flagged by the hallucination check (kept, penalized).
    pub hallucination_count: usize,
}

/// Validates parsed field values against the template.
///
/// Idempotent: feeding the stringified output back through produces
/// the same values and verdicts.
pub fn validate_fields(
    template: &Template,
    data: &BTreeMap<String, String>,
    raw_text: &str,
) -> ValidationReport {
    let _span = tracing::info_span!(
        "validator",
        document_type = %template.document_type,
    )
    .entered();

    let mut report = ValidationReport {
        total_fields: template.fields.len(),
        total_required: template.required_fields().count(),
        ..Default::default()
    };

    for field in &template.fields {
        let raw_value = match data.get(&field.name) {
            Some(value) => value,
            None => continue, // absent: already in fields_missing
        };

        if raw_value.trim().is_empty() {
            if field.required {
                report
                    .errors
                    .push(FieldIssue::new(&field.name, "required field is empty"));
            }
            continue;
        }

        let mut field_valid = true;
        let typed = match &field.rules {
            FieldRules::Text {
                min_len,
                max_len,
                charset,
                transform,
            } => {
                let value = transform.apply(raw_value);
                let len = value.chars().count();
                if let Some(min) = min_len {
                    if len < *min {
                        field_valid = false;
                        report.errors.push(FieldIssue::new(
                            &field.name,
                            format!("shorter than {} characters", min),
                        ));
                    }
                }
                if let Some(max) = max_len {
                    if len > *max {
                        field_valid = false;
                        report.errors.push(FieldIssue::new(
                            &field.name,
                            format!("longer than {} characters", max),
                        ));
                    }
                }
                if !charset.allows(&value) {
                    field_valid = false;
                    report.errors.push(FieldIssue::new(
                        &field.name,
                        "contains characters outside the allowed set",
                    ));
                }
                FieldValue::Text(value)
            }
            FieldRules::Date {
                min_year,
                max_year,
                must_be,
            } => match NaiveDate::parse_from_str(raw_value.trim(), "%Y-%m-%d") {
                Ok(date) => {
                    if let Some(min) = min_year {
                        if date.year() < *min {
                            field_valid = false;
                            report.errors.push(FieldIssue::new(
                                &field.name,
                                format!("year before {}", min),
                            ));
                        }
                    }
                    if let Some(max) = max_year {
                        if date.year() > *max {
                            field_valid = false;
                            report.errors.push(FieldIssue::new(
                                &field.name,
                                format!("year after {}", max),
                            ));
                        }
                    }
                    let today = Utc::now().date_naive();
                    match must_be {
                        DateConstraint::Past if date > today => {
                            field_valid = false;
                            report
                                .errors
                                .push(FieldIssue::new(&field.name, "date must be in the past"));
                        }
                        DateConstraint::Future if date < today => {
                            field_valid = false;
                            report
                                .errors
                                .push(FieldIssue::new(&field.name, "date must be in the future"));
                        }
                        _ => {}
                    }
                    FieldValue::Date(date)
                }
                Err(_) => {
                    field_valid = false;
                    report.errors.push(FieldIssue::new(
                        &field.name,
                        "not a canonical YYYY-MM-DD date",
                    ));
                    FieldValue::Text(raw_value.clone())
                }
            },
            FieldRules::Number { min, max } => match raw_value.trim().parse::<f64>() {
                Ok(number) => {
                    if let Some(min) = min {
                        if number < *min {
                            field_valid = false;
                            report.errors.push(FieldIssue::new(
                                &field.name,
                                format!("below minimum {}", min),
                            ));
                        }
                    }
                    if let Some(max) = max {
                        if number > *max {
                            field_valid = false;
                            report.errors.push(FieldIssue::new(
                                &field.name,
                                format!("above maximum {}", max),
                            ));
                        }
                    }
                    FieldValue::Number(number)
                }
                Err(_) => {
                    field_valid = false;
                    report
                        .errors
                        .push(FieldIssue::new(&field.name, "not a number"));
                    FieldValue::Text(raw_value.clone())
                }
            },
        };

        // Hallucination check, independent of type validation. False
        // positives happen (reformatted values), so a miss is a
        // warning, never a discard.
        if !value_traceable_to_text(&typed, raw_text) {
            report.hallucination_count += 1;
            report.warnings.push(FieldIssue::new(
                &field.name,
                "value could not be traced to the source text",
            ));
        }

        if field_valid {
            report.valid_fields += 1;
            if field.required {
                report.valid_required += 1;
            }
        }
        report.values.insert(field.name.clone(), typed);
    }

    report
}

/// Checks that an extracted value plausibly occurs in the recognized
/// text: normalized substring containment for text and numbers,
/// per-component presence for dates.
fn value_traceable_to_text(value: &FieldValue, raw_text: &str) -> bool {
    match value {
        FieldValue::Text(text) => {
            let haystack = normalize(raw_text);
            haystack.contains(&normalize(text))
        }
        FieldValue::Number(number) => {
            // Strip grouping characters from the text so "1,000,000"
            // matches the canonical 1000000.
            let haystack: String = raw_text
                .to_lowercase()
                .chars()
                .filter(|c| !c.is_whitespace() && *c != ',' && *c != '$')
                .collect();
            let canonical = FieldValue::Number(*number).to_string();
            haystack.contains(&canonical)
        }
        FieldValue::Date(date) => {
            let year = date.format("%Y").to_string();
            let month = date.format("%m").to_string();
            let day = date.format("%d").to_string();
            raw_text.contains(&year)
                && contains_component(raw_text, &month)
                && contains_component(raw_text, &day)
        }
    }
}

/// A date component counts as present zero-padded or not.
fn contains_component(text: &str, padded: &str) -> bool {
    if text.contains(padded) {
        return true;
    }
    let unpadded = padded.trim_start_matches('0');
    !unpadded.is_empty() && text.contains(unpadded)
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}
