//! Regex pattern fallback extraction.
//!
//! A deliberately separate, low-confidence strategy used only when the
//! language-model parser is unconfigured or its call fails. Its output
//! is never merged into an LLM result.

use std::collections::BTreeMap;

use regex::Regex;

use crate::template::schema::Template;

/// Confidence ceiling for pattern-extracted results.
pub const PATTERN_FALLBACK_MAX_CONFIDENCE: f64 = 0.5;

/// Runs each field's match patterns against the text. The first
/// matching pattern wins; capture group 1 (when present) is the value,
/// otherwise the whole match.
pub fn extract_with_patterns(template: &Template, text: &str) -> BTreeMap<String, String> {
    let _span = tracing::info_span!("parser.pattern_fallback").entered();

    let mut data = BTreeMap::new();

    for field in &template.fields {
        for pattern in &field.match_patterns {
            // Patterns were compile-checked at template load.
            let regex = match Regex::new(pattern) {
                Ok(regex) => regex,
                Err(e) => {
                    tracing::warn!("skipping bad pattern for '{}': {}", field.name, e);
                    continue;
                }
            };

            if let Some(captures) = regex.captures(text) {
                let value = captures
                    .get(1)
                    .or_else(|| captures.get(0))
                    .map(|m| m.as_str().trim().to_string());
                if let Some(value) = value {
                    if !value.is_empty() {
                        data.insert(field.name.clone(), value);
                        break;
                    }
                }
            }
        }
    }

    data
}
