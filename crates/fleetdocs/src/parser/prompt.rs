//! Extraction prompt construction.
//!
//! One request per document: global document-type instructions, one
//! instruction block per field (required and optional separated, with
//! examples), then the sanitized recognized text.

use std::fmt::Write;

use crate::parser::llm::{sanitize_for_prompt, ChatRequest};
use crate::template::schema::{FieldDef, Template};

const SYSTEM_PROMPT: &str = "You are a document field extraction engine. \
You are given recognized text from a scanned or digital document and a list of fields to extract. \
Respond with ONLY a single flat JSON object whose keys are exactly the requested field names. \
Use null for any field you cannot find in the text. \
Never invent, guess, or reformat a value into existence; a missing field must be null.";

/// Builds the per-document extraction request.
pub fn build_extraction_request(template: &Template, raw_text: &str) -> ChatRequest {
    let mut user = String::new();

    writeln!(
        user,
        "Extract structured fields from a '{}' document.",
        template.document_type
    )
    .ok();

    if let Some(ref instructions) = template.document_instructions {
        writeln!(user, "\nDocument notes: {}", instructions).ok();
    }

    let required: Vec<&FieldDef> = template.fields.iter().filter(|f| f.required).collect();
    let optional: Vec<&FieldDef> = template.fields.iter().filter(|f| !f.required).collect();

    if !required.is_empty() {
        user.push_str("\nRequired fields:\n");
        for field in &required {
            user.push_str(&field_block(field));
        }
    }
    if !optional.is_empty() {
        user.push_str("\nOptional fields (null if absent):\n");
        for field in &optional {
            user.push_str(&field_block(field));
        }
    }

    user.push_str(
        "\nOutput rules:\n\
         - Return a single JSON object, no prose, no code fences.\n\
         - Keys must match the field names exactly; include every field.\n\
         - Dates must be formatted YYYY-MM-DD.\n\
         - Numbers must be plain digits with an optional decimal point, \
           no currency symbols or thousands separators.\n",
    );

    writeln!(
        user,
        "\nDocument text:\n\"\"\"\n{}\n\"\"\"",
        sanitize_for_prompt(raw_text)
    )
    .ok();

    ChatRequest {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

fn field_block(field: &FieldDef) -> String {
    let mut block = format!("- {} ({})", field.name, field.rules.type_name());
    if let Some(ref prompt) = field.prompt {
        block.push_str(": ");
        block.push_str(prompt);
    }
    if !field.examples.is_empty() {
        block.push_str(&format!(" Examples: {}", field.examples.join(", ")));
    }
    block.push('\n');
    block
}
