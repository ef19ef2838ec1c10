use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Overrides the default `~/.fleetdocs/data/fleetdocs.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    /// Directory of template files overriding the built-in set.
    #[serde(default)]
    pub templates_directory: Option<String>,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            templates_directory: None,
            ocr: OcrConfig::default(),
            parser: ParserConfig::default(),
            worker: WorkerConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_true() -> bool {
    true
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

fn default_dpi() -> u32 {
    300
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            languages: default_languages(),
            dpi: 300,
        }
    }
}

/// Structured-parsing backend settings. With no endpoint configured the
/// parser falls back to template match patterns only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// OpenAI-compatible chat completions URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key (never stored in config).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_parser_timeout")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "FLEETDOCS_PARSER_API_KEY".to_string()
}

fn default_parser_timeout() -> u64 {
    30
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_parser_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Idle wait between queue polls when no wake nudge arrives.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Processing jobs older than this are assumed orphaned by a
    /// crashed worker.
    #[serde(default = "default_stuck_after")]
    pub stuck_after_secs: u64,
    /// Base of the exponential retry backoff.
    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Nominal per-job duration used for completion estimates.
    #[serde(default = "default_nominal_job_secs")]
    pub nominal_job_secs: u64,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_poll_interval() -> u64 {
    500
}

fn default_stuck_after() -> u64 {
    15 * 60
}

fn default_retry_base() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_nominal_job_secs() -> u64 {
    5
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval(),
            stuck_after_secs: default_stuck_after(),
            retry_base_secs: default_retry_base(),
            max_retries: default_max_retries(),
            nominal_job_secs: default_nominal_job_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Failed jobs (and their results) older than this are purged.
    #[serde(default = "default_purge_after_days")]
    pub purge_failed_after_days: u32,
}

fn default_purge_after_days() -> u32 {
    7
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            purge_failed_after_days: default_purge_after_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ocr_config_default() {
        let config = OcrConfig::default();
        assert!(config.enabled);
        assert_eq!(config.languages, vec!["eng".to_string()]);
        assert_eq!(config.dpi, 300);
    }

    #[test]
    fn test_parser_config_default_has_no_endpoint() {
        let config = ParserConfig::default();
        assert!(config.endpoint.is_none());
        assert_eq!(config.api_key_env, "FLEETDOCS_PARSER_API_KEY");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert!(config.count > 0);
        assert_eq!(config.stuck_after_secs, 900);
        assert_eq!(config.retry_base_secs, 60);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_retention_default() {
        assert_eq!(RetentionConfig::default().purge_failed_after_days, 7);
    }

    #[test]
    fn test_minimal_config_deserializes() {
        let config: Config = serde_json::from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(config.version, "1.0");
        assert!(config.ocr.enabled);
        assert!(config.parser.endpoint.is_none());
    }
}
