//! LLM provider abstractions for doppel-runtime.
//!
//! A provider performs exactly one remote call per `complete`. Retries,
//! backoff and the empty-body rule live one level up in
//! [`CompletionClient`](crate::completion::CompletionClient).
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling.
//! See [`ApiCredential`] for the recommended patterns.

use async_trait::async_trait;
use doppel_core::{Message, ProviderSettings, ToolCall};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(feature = "openai")]
mod openai;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderFactory, OPENAI_API_KEY_ENV};

/// Errors from LLM providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider returned an empty response")]
    EmptyResponse,
}

/// Output format requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Ask for a single JSON object (structured evaluation).
    JsonObject,
}

/// Configuration for a completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate (provider default when `None`)
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Nucleus sampling
    pub top_p: Option<f32>,

    pub frequency_penalty: Option<f32>,

    pub presence_penalty: Option<f32>,

    /// Request timeout
    pub timeout: Duration,

    /// Text or JSON object output
    pub response_format: ResponseFormat,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: doppel_core::settings::DEFAULT_GENERATION_MODEL.to_string(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            timeout: Duration::from_secs(60),
            response_format: ResponseFormat::Text,
        }
    }
}

impl CompletionConfig {
    pub fn json_object(mut self) -> Self {
        self.response_format = ResponseFormat::JsonObject;
        self
    }
}

impl From<&ProviderSettings> for CompletionConfig {
    fn from(settings: &ProviderSettings) -> Self {
        Self {
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
            frequency_penalty: settings.frequency_penalty,
            presence_penalty: settings.presence_penalty,
            timeout: settings.timeout,
            response_format: ResponseFormat::Text,
        }
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    pub description: String,

    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// Response from an LLM completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    /// Tool calls requested instead of (or alongside) content
    pub tool_calls: Vec<ToolCall>,

    /// Token usage
    pub usage: TokenUsage,

    /// Model used
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,
}

impl CompletionResponse {
    /// Plain text response, mostly for tests and mocks.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            stop_reason: Some("stop".to_string()),
            ..Self::default()
        }
    }

    /// No usable content and no tool calls.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// Token usage from a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Provider abstraction allows swapping LLM backends.
///
/// The generation and evaluation endpoints are both `LlmProvider`s; they
/// differ only in configuration.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute one chat completion call.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Check if provider is usable (credentials present).
    async fn health_check(&self) -> bool;

    /// Get provider name for logging.
    fn name(&self) -> &str;

    /// Estimate tokens for a prompt.
    fn estimate_tokens(&self, text: &str) -> u32 {
        // ~4 chars per token
        (text.len() / 4) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
        };
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn test_response_emptiness() {
        assert!(CompletionResponse::text("").is_empty());
        assert!(CompletionResponse::text(" \n").is_empty());
        assert!(!CompletionResponse::text("hi").is_empty());

        let tool_only = CompletionResponse {
            tool_calls: vec![ToolCall {
                id: "1".to_string(),
                name: "record_unknown_question".to_string(),
                arguments: "{}".to_string(),
            }],
            ..CompletionResponse::default()
        };
        assert!(!tool_only.is_empty());
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = ProviderSettings::evaluation_defaults();
        settings.temperature = Some(0.2);
        let config = CompletionConfig::from(&settings).json_object();
        assert_eq!(config.model, "gemini-2.0-flash");
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.response_format, ResponseFormat::JsonObject);
    }
}
