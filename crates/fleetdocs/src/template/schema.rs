//! Extraction template model.
//!
//! A template is versioned, per-document-type configuration: which
//! fields to extract, their types, validation rules, and parsing
//! instructions. Rules are carried as a tagged union per field type so
//! a date rule can never be attached to a text field.

use serde::{Deserialize, Serialize};

use crate::worker::job::DocumentType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub document_type: DocumentType,
    pub version: String,
    /// Final confidence below this flags the result for manual review
    /// (the job still completes).
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Free-form guidance injected into the parsing request.
    #[serde(default)]
    pub document_instructions: Option<String>,
    pub fields: Vec<FieldDef>,
}

fn default_confidence_threshold() -> f64 {
    0.7
}

impl Template {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.required)
    }
}

/// One field to extract. Type-specific validation rules live in the
/// flattened `rules` variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    /// Per-field instruction for the parsing request.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Illustrative example values shown to the parser.
    #[serde(default)]
    pub examples: Vec<String>,
    /// Regexes for the pattern-fallback strategy. The first capture
    /// group (when present) is the extracted value.
    #[serde(default)]
    pub match_patterns: Vec<String>,
    #[serde(flatten)]
    pub rules: FieldRules,
}

/// Validation rules, tagged by the field's declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldRules {
    Text {
        #[serde(default)]
        min_len: Option<usize>,
        #[serde(default)]
        max_len: Option<usize>,
        #[serde(default)]
        charset: Charset,
        #[serde(default)]
        transform: Transform,
    },
    Date {
        #[serde(default)]
        min_year: Option<i32>,
        #[serde(default)]
        max_year: Option<i32>,
        #[serde(default)]
        must_be: DateConstraint,
    },
    Number {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
}

impl FieldRules {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Date { .. } => "date",
            Self::Number { .. } => "number",
        }
    }
}

/// Allowed character class for text fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Charset {
    #[default]
    Any,
    Digits,
    AlphaSpace,
    Alnum,
}

impl Charset {
    pub fn allows(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Digits => value.chars().all(|c| c.is_ascii_digit()),
            Self::AlphaSpace => value.chars().all(|c| c.is_alphabetic() || c == ' '),
            Self::Alnum => value.chars().all(|c| c.is_ascii_alphanumeric()),
        }
    }
}

/// Normalization applied before validation; the transformed value is
/// what gets stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    #[default]
    None,
    Uppercase,
    Lowercase,
    Trim,
}

impl Transform {
    pub fn apply(&self, value: &str) -> String {
        match self {
            Self::None => value.to_string(),
            Self::Uppercase => value.to_uppercase(),
            Self::Lowercase => value.to_lowercase(),
            Self::Trim => value.trim().to_string(),
        }
    }
}

/// Temporal constraint for date fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateConstraint {
    #[default]
    Any,
    Past,
    Future,
}
