use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let compiled =
        jsonschema::JSONSchema::compile(&schema).map_err(|e| ConfigError::Validation {
            message: format!("Failed to compile JSON schema: {}", e),
        })?;

    let result = compiled.validate(json_value);
    if let Err(errors) = result {
        let error_messages: Vec<String> = errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker.count == 0 {
        return Err(ConfigError::Validation {
            message: "worker.count must be at least 1".to_string(),
        });
    }

    if let Some(ref endpoint) = config.parser.endpoint {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::Validation {
                message: format!("parser.endpoint must be an HTTP(S) URL: {}", endpoint),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_config() {
        let config = load_config_from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(config.version, "1.0");
        assert!(config.ocr.enabled);
    }

    #[test]
    fn test_load_full_config() {
        let content = r#"{
            "version": "1.0",
            "database_path": "/var/lib/fleetdocs/fleetdocs.db",
            "templates_directory": "/etc/fleetdocs/templates",
            "ocr": {"enabled": true, "languages": ["eng", "spa"], "dpi": 300},
            "parser": {
                "endpoint": "https://api.example.com/v1/chat/completions",
                "model": "gpt-4o-mini",
                "timeout_secs": 20
            },
            "worker": {"count": 4, "max_retries": 5},
            "retention": {"purge_failed_after_days": 14}
        }"#;

        let config = load_config_from_str(content).unwrap();
        assert_eq!(config.ocr.languages, vec!["eng", "spa"]);
        assert_eq!(
            config.parser.endpoint.as_deref(),
            Some("https://api.example.com/v1/chat/completions")
        );
        assert_eq!(config.worker.count, 4);
        assert_eq!(config.worker.max_retries, 5);
        assert_eq!(config.retention.purge_failed_after_days, 14);
    }

    #[test]
    fn test_missing_version_fails_schema() {
        let result = load_config_from_str(r#"{"ocr": {"enabled": false}}"#);
        assert!(matches!(
            result,
            Err(ConfigError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_unknown_key_fails_schema() {
        let result = load_config_from_str(r#"{"version": "1.0", "workers": 4}"#);
        assert!(matches!(
            result,
            Err(ConfigError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let result = load_config_from_str(r#"{"version": "2.0"}"#);
        // Fails schema (enum) before semantic validation even runs.
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = load_config_from_str(r#"{"version": "1.0", "worker": {"count": 0}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_non_http_endpoint_rejected() {
        let result = load_config_from_str(
            r#"{"version": "1.0", "parser": {"endpoint": "ftp://nope"}}"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let result = load_config_from_str("{not json");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }
}
