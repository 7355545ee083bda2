//! LLM client for OpenAI-compatible chat completion APIs.
//!
//! Guarantees:
//! - LLM output is text only, never executed
//! - No network calls unless the backend is enabled in config
//! - API keys are read from the environment, never from config files

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::debug;

/// LLM configuration (`[llm]` section of the daemon config)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// e.g. "https://api.openai.com/v1" or "http://localhost:11434/v1"
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    800
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Local servers (Ollama, llama.cpp) accept requests without a key
    pub fn is_local(&self) -> bool {
        self.base_url.contains("://localhost") || self.base_url.contains("://127.0.0.1")
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant"
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One chat completion request; unset fields fall back to config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub content: String,
    pub model: String,
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub completion_tokens: Option<u32>,
}

/// LLM errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("LLM backend is disabled")]
    Disabled,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// LLM backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError>;

    /// Model used when a request does not name one
    fn default_model(&self) -> &str;
}

/// Backend used when the LLM is disabled
pub struct DisabledBackend;

#[async_trait]
impl LlmBackend for DisabledBackend {
    async fn chat(&self, _request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        Err(LlmError::Disabled)
    }

    fn default_model(&self) -> &str {
        ""
    }
}

/// HTTP OpenAI-compatible backend
pub struct HttpOpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl HttpOpenAiBackend {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        if !config.enabled {
            return Err(LlmError::Disabled);
        }
        if config.base_url.trim().is_empty() {
            return Err(LlmError::Config("base_url is required".to_string()));
        }
        if config.model.trim().is_empty() {
            return Err(LlmError::Config("model is required".to_string()));
        }

        let api_key = match env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => Some(key),
            _ if config.is_local() => None,
            _ => {
                return Err(LlmError::Config(format!(
                    "API key env var {} not set",
                    config.api_key_env
                )))
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl LlmBackend for HttpOpenAiBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());

        let request_body = serde_json::json!({
            "model": model,
            "messages": request.messages,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "temperature": request.temperature.unwrap_or(self.temperature),
        });

        let mut req = self.client.post(&url).json(&request_body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        debug!("POST {} model={}", url, model);
        let response = req
            .send()
            .await
            .map_err(|e| LlmError::Http(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http(format!("HTTP {}: {}", status, body)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Http(format!("Failed to parse response: {}", e)))?;

        parse_completion(&response_json, &model)
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

/// Extract the first choice of a chat completion response
pub fn parse_completion(json: &serde_json::Value, requested_model: &str) -> Result<ChatCompletion, LlmError> {
    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| LlmError::Unexpected("No content in response".to_string()))?
        .to_string();

    let model = json["model"].as_str().unwrap_or(requested_model).to_string();
    let tokens = |field: &str| json["usage"][field].as_u64().map(|n| n as u32);

    Ok(ChatCompletion {
        content,
        model,
        prompt_tokens: tokens("prompt_tokens"),
        completion_tokens: tokens("completion_tokens"),
    })
}

/// Backend for the given config; disabled configs get [`DisabledBackend`]
pub fn backend_from_config(config: &LlmConfig) -> Result<Box<dyn LlmBackend>, LlmError> {
    if !config.enabled {
        return Ok(Box::new(DisabledBackend));
    }
    Ok(Box::new(HttpOpenAiBackend::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_backend_returns_disabled() {
        let result = DisabledBackend.chat(&ChatRequest::default()).await;
        assert_eq!(result, Err(LlmError::Disabled));
    }

    #[test]
    fn test_http_backend_rejects_disabled_config() {
        let result = HttpOpenAiBackend::new(&LlmConfig::disabled());
        assert!(matches!(result, Err(LlmError::Disabled)));
    }

    #[test]
    fn test_http_backend_requires_model() {
        let config = LlmConfig {
            base_url: "http://localhost:11434/v1".to_string(),
            model: String::new(),
            ..Default::default()
        };
        assert!(matches!(HttpOpenAiBackend::new(&config), Err(LlmError::Config(_))));
    }

    #[test]
    fn test_remote_backend_requires_api_key() {
        let config = LlmConfig {
            api_key_env: "FOUNDATIONS_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..Default::default()
        };
        assert!(matches!(HttpOpenAiBackend::new(&config), Err(LlmError::Config(_))));
    }

    #[test]
    fn test_local_backend_needs_no_key() {
        let config = LlmConfig {
            base_url: "http://localhost:11434/v1".to_string(),
            api_key_env: "FOUNDATIONS_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            model: "llama3".to_string(),
            ..Default::default()
        };
        assert!(HttpOpenAiBackend::new(&config).is_ok());
    }

    #[test]
    fn test_parse_completion() {
        let json = serde_json::json!({
            "model": "gpt-4o-mini-2024",
            "choices": [{"message": {"role": "assistant", "content": "hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let completion = parse_completion(&json, "gpt-4o-mini").unwrap();
        assert_eq!(completion.content, "hello");
        assert_eq!(completion.model, "gpt-4o-mini-2024");
        assert_eq!(completion.completion_tokens, Some(3));

        let empty = serde_json::json!({"choices": []});
        assert!(matches!(parse_completion(&empty, "m"), Err(LlmError::Unexpected(_))));
    }
}
