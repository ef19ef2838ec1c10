//! Template registry: loading, validation, and caching.
//!
//! Templates are read-mostly: loaded once per document type, cached,
//! and invalidated explicitly (the watcher does this on file change,
//! operators can too). Files in the configured templates directory
//! override the built-in set shipped with the crate.

use std::path::PathBuf;
use std::sync::Arc;

use moka::sync::Cache;

use crate::error::TemplateError;
use crate::template::schema::Template;
use crate::worker::job::DocumentType;

const TEMPLATE_SCHEMA_JSON: &str = include_str!("../../../../schema/template-v1.json");

const BUILTIN_LICENSE: &str = include_str!("builtin/license.json");
const BUILTIN_CARRIER_CERT: &str = include_str!("builtin/carrier_cert.json");
const BUILTIN_INSURANCE: &str = include_str!("builtin/insurance.json");

fn builtin_source(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::License => BUILTIN_LICENSE,
        DocumentType::CarrierCert => BUILTIN_CARRIER_CERT,
        DocumentType::Insurance => BUILTIN_INSURANCE,
    }
}

/// Parses and validates a template document.
pub fn parse_template(content: &str) -> Result<Template, TemplateError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let template: Template = serde_json::from_value(json_value)?;

    validate_template(&template)?;

    Ok(template)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), TemplateError> {
    let schema: serde_json::Value =
        serde_json::from_str(TEMPLATE_SCHEMA_JSON).map_err(|e| TemplateError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let compiled =
        jsonschema::JSONSchema::compile(&schema).map_err(|e| TemplateError::Validation {
            message: format!("Failed to compile JSON schema: {}", e),
        })?;

    let result = compiled.validate(json_value);
    if let Err(errors) = result {
        let error_messages: Vec<String> = errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        return Err(TemplateError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_template(template: &Template) -> Result<(), TemplateError> {
    if !(0.0..=1.0).contains(&template.confidence_threshold) {
        return Err(TemplateError::Validation {
            message: format!(
                "confidence_threshold out of range: {}",
                template.confidence_threshold
            ),
        });
    }

    let mut names = std::collections::HashSet::new();
    for field in &template.fields {
        if !names.insert(&field.name) {
            return Err(TemplateError::Validation {
                message: format!("Duplicate field name '{}'", field.name),
            });
        }

        for pattern in &field.match_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(TemplateError::InvalidPattern {
                    field: field.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Caching template lookup keyed by document type.
pub struct TemplateRegistry {
    templates_dir: Option<PathBuf>,
    cache: Cache<&'static str, Arc<Template>>,
}

impl TemplateRegistry {
    /// Registry serving only the built-in templates.
    pub fn builtin() -> Self {
        Self::new(None)
    }

    /// Registry with a directory of override files. A file named
    /// `<document_type>.json` replaces the built-in for that type.
    pub fn new(templates_dir: Option<PathBuf>) -> Self {
        Self {
            templates_dir,
            cache: Cache::builder().max_capacity(16).build(),
        }
    }

    /// Resolves the template for a document type, cached after first
    /// load.
    pub fn get(&self, document_type: DocumentType) -> Result<Arc<Template>, TemplateError> {
        let key = document_type.as_str();
        if let Some(template) = self.cache.get(key) {
            return Ok(template);
        }

        let template = Arc::new(self.load(document_type)?);
        self.cache.insert(key, Arc::clone(&template));
        Ok(template)
    }

    /// Drops one cached template; the next `get` reloads from disk.
    pub fn invalidate(&self, document_type: DocumentType) {
        self.cache.invalidate(document_type.as_str());
    }

    /// Drops every cached template.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn templates_dir(&self) -> Option<&PathBuf> {
        self.templates_dir.as_ref()
    }

    /// Eagerly loads every template and inventories the override
    /// directory, so malformed template files surface at startup
    /// instead of on the first job that needs them. Files not named
    /// after a document type are ignored with a warning.
    pub fn preload(&self) -> Result<Vec<DocumentType>, TemplateError> {
        if let Some(ref dir) = self.templates_dir {
            if dir.exists() {
                for entry in walkdir::WalkDir::new(dir)
                    .min_depth(1)
                    .max_depth(1)
                    .into_iter()
                    .filter_map(|e| e.ok())
                {
                    let path = entry.path();
                    let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
                    if !is_json {
                        continue;
                    }
                    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
                    if DocumentType::from_str(stem).is_none() {
                        tracing::warn!(
                            "Ignoring template file {}: '{}' is not a known document type",
                            path.display(),
                            stem
                        );
                    }
                }
            }
        }

        let mut loaded = Vec::new();
        for document_type in DocumentType::all() {
            self.get(document_type)?;
            loaded.push(document_type);
        }
        Ok(loaded)
    }

    fn load(&self, document_type: DocumentType) -> Result<Template, TemplateError> {
        if let Some(ref dir) = self.templates_dir {
            let path = dir.join(format!("{}.json", document_type.as_str()));
            if path.exists() {
                tracing::info!(
                    "Loading template override for '{}' from {}",
                    document_type,
                    path.display()
                );
                let content =
                    std::fs::read_to_string(&path).map_err(|e| TemplateError::ReadFile {
                        path: path.clone(),
                        source: e,
                    })?;
                let template = parse_template(&content)?;
                if template.document_type != document_type {
                    return Err(TemplateError::Validation {
                        message: format!(
                            "Template file {} declares document_type '{}', expected '{}'",
                            path.display(),
                            template.document_type,
                            document_type
                        ),
                    });
                }
                return Ok(template);
            }
        }

        parse_template(builtin_source(document_type))
    }
}
