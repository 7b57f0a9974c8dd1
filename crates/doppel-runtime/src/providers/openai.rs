//! OpenAI-compatible chat completions provider.
//!
//! Talks to any endpoint implementing `POST {base_url}/chat/completions`
//! with bearer auth: OpenAI itself, and Gemini's OpenAI-compatible surface
//! used for evaluation.

use super::{
    factory::ProviderFactory, secrets::ApiCredential, CompletionConfig, CompletionResponse,
    LlmProvider, ProviderError, ResponseFormat, TokenUsage, ToolDefinition,
};
use async_trait::async_trait;
use doppel_core::{Message, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// Default environment variable holding the API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(credential: ApiCredential) -> Self {
        Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from factory config.
    ///
    /// Keys: `api_key` (optional), `api_key_env` (defaults to
    /// `OPENAI_API_KEY`), `base_url`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let env_var = config["api_key_env"].as_str().unwrap_or(OPENAI_API_KEY_ENV);
        let credential = ApiCredential::from_config_or_env(config, "api_key", env_var, "API key")?;

        let base_url = config["base_url"].as_str().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self::new(credential).with_base_url(base_url))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(
        messages: &[Message],
        tools: &[ToolDefinition],
        config: &CompletionConfig,
    ) -> ChatRequest {
        ChatRequest {
            model: config.model.clone(),
            messages: messages.iter().map(WireMessage::from).collect(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            tools: (!tools.is_empty()).then(|| tools.iter().map(WireTool::from).collect()),
            response_format: match config.response_format {
                ResponseFormat::Text => None,
                ResponseFormat::JsonObject => Some(WireResponseFormat {
                    type_: "json_object".to_string(),
                }),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let tool_calls: Option<Vec<WireToolCall>> = message.has_tool_calls().then(|| {
            message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    type_: "function".to_string(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect()
        });

        // Assistant tool-call messages are sent with null content when empty.
        let content = if message.content.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(message.content.clone())
        };

        Self {
            role: message.role.as_str(),
            content,
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    type_: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    type_: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: JsonValue,
}

impl From<&ToolDefinition> for WireTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            type_: "function",
            function: WireFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireResponseFormat {
    #[serde(rename = "type")]
    type_: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Several OpenAI-compatible servers wrap the error object in a list.
fn error_message(body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        return envelope.error.message;
    }
    if let Some(envelope) = serde_json::from_str::<Vec<ErrorEnvelope>>(body)
        .ok()
        .and_then(|mut list| list.pop())
    {
        return envelope.error.message;
    }
    body.chars().take(200).collect()
}

impl ChatResponse {
    fn into_completion(self) -> Result<CompletionResponse, ProviderError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        let usage = self
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage,
            model: self.model,
            stop_reason: choice.finish_reason,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = Self::build_request(messages, tools, config);

        // Expose the credential only at the point of use
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.credential.expose())
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| ProviderError::HttpError(e.to_string()))?;
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        body.into_completion()
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Factory for OpenAI-compatible providers.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "sk-...",            // Optional, falls back to the env var below
///   "api_key_env": "GOOGLE_API_KEY", // Optional, default OPENAI_API_KEY
///   "base_url": "https://..."        // Optional, default https://api.openai.com/v1
/// }
/// ```
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OpenAiProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        let env_var = config["api_key_env"].as_str().unwrap_or(OPENAI_API_KEY_ENV);
        if !ApiCredential::is_available(config, "api_key", env_var) {
            return Err(ProviderError::NotConfigured(format!(
                "API key required: set 'api_key' in config or {} env",
                env_var
            )));
        }

        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({
            "base_url": DEFAULT_BASE_URL,
            "api_key_env": OPENAI_API_KEY_ENV,
        })
    }

    fn description(&self) -> &'static str {
        "OpenAI-compatible chat completions provider"
    }
}
