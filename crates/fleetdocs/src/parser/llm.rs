//! Language-model client for structured parsing.
//!
//! The production client posts to an OpenAI-compatible chat
//! completions endpoint over a blocking reqwest client. `LlmClient` is
//! the seam tests and the pattern fallback work against.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::config::schema::ParserConfig;
use crate::error::ParseError;

/// Sanitizes document text for safe inclusion in LLM prompts.
///
/// Escapes ChatML tokens (`<|...|>`) and common instruction tokens to
/// prevent prompt injection from recognized document text.
pub fn sanitize_for_prompt(text: &str) -> String {
    text.replace("<|", "< |")
        .replace("|>", "| >")
        .replace("<s>", "< s >")
        .replace("</s>", "< / s >")
        .replace("[INST]", "[ INST ]")
        .replace("[/INST]", "[ / INST ]")
        .replace("<<SYS>>", "< < SYS > >")
        .replace("<</SYS>>", "< < / SYS > >")
}

/// One extraction request: a fixed system role plus the per-document
/// user prompt.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
}

pub trait LlmClient: Send + Sync {
    /// Runs one completion and returns the raw response text.
    fn complete(&self, request: &ChatRequest) -> Result<String, ParseError>;
}

/// OpenAI-compatible HTTP chat client.
pub struct HttpLlmClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout_secs: u64,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpLlmClient {
    pub fn new(
        endpoint: String,
        model: String,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, ParseError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ParseError::Backend(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            model,
            api_key,
            timeout_secs,
            client,
        })
    }

    /// Builds a client from config. Returns `None` when no endpoint is
    /// configured (the parser then runs pattern fallback only). The
    /// API key is read from the configured environment variable, never
    /// from the config file itself.
    pub fn from_config(config: &ParserConfig) -> Result<Option<Self>, ParseError> {
        let endpoint = match config.endpoint {
            Some(ref endpoint) => endpoint.clone(),
            None => return Ok(None),
        };
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            log::warn!(
                "Parser endpoint configured but {} is unset; requests will be unauthenticated",
                config.api_key_env
            );
        }
        Ok(Some(Self::new(
            endpoint,
            config.model.clone(),
            api_key,
            config.timeout_secs,
        )?))
    }
}

impl LlmClient for HttpLlmClient {
    fn complete(&self, request: &ChatRequest) -> Result<String, ParseError> {
        let _span = tracing::info_span!("parser.llm", model = %self.model).entered();

        let body = json!({
            "model": self.model,
            "temperature": 0.0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
        });

        let mut http_request = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send().map_err(|e| {
            if e.is_timeout() {
                ParseError::Timeout(self.timeout_secs)
            } else {
                ParseError::Backend(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(ParseError::Backend(format!(
                "endpoint returned {}: {}",
                status, snippet
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .map_err(|e| ParseError::Backend(format!("unreadable completion body: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ParseError::Backend("completion had no choices".to_string()))
    }
}
