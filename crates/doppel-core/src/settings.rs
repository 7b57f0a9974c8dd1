//! Application settings.
//!
//! Loaded from YAML; every section is optional and falls back to the
//! defaults below. Credentials are never stored here, only the name of the
//! environment variable that holds them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::persona::{FilePersonaSource, PersonaProfile, PersonaSource, StaticPersona};
use crate::policy::{CompletionRetryConfig, ConfigError, RetryPolicyConfig, StrategyKind};

pub const DEFAULT_GENERATION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_GENERATION_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_GENERATION_KEY_ENV: &str = "OPENAI_API_KEY";

pub const DEFAULT_EVALUATION_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_EVALUATION_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_EVALUATION_KEY_ENV: &str = "GOOGLE_API_KEY";

pub const DEFAULT_PUSHOVER_USER_ENV: &str = "PUSHOVER_USER";
pub const DEFAULT_PUSHOVER_TOKEN_ENV: &str = "PUSHOVER_TOKEN";

fn default_provider() -> String {
    "openai".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

/// One model endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Provider type registered in the runtime factory.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier.
    pub model: String,

    /// API base URL (OpenAI-compatible).
    pub base_url: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-request timeout.
    #[serde(default = "default_timeout", with = "crate::durations")]
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn generation_defaults() -> Self {
        Self::endpoint(
            DEFAULT_GENERATION_MODEL,
            DEFAULT_GENERATION_BASE_URL,
            DEFAULT_GENERATION_KEY_ENV,
        )
    }

    pub fn evaluation_defaults() -> Self {
        Self::endpoint(
            DEFAULT_EVALUATION_MODEL,
            DEFAULT_EVALUATION_BASE_URL,
            DEFAULT_EVALUATION_KEY_ENV,
        )
    }

    fn endpoint(model: &str, base_url: &str, api_key_env: &str) -> Self {
        Self {
            provider: default_provider(),
            model: model.to_string(),
            base_url: base_url.to_string(),
            api_key_env: api_key_env.to_string(),
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            max_tokens: None,
            timeout: default_timeout(),
        }
    }

    /// JSON config understood by the runtime provider factories.
    pub fn factory_config(&self) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "base_url": self.base_url,
            "api_key_env": self.api_key_env,
        })
    }

    fn validate(&self, section: &'static str) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::invalid(section, "model must not be empty"));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                section,
                format!("base_url must be an http(s) URL, got '{}'", self.base_url),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid(section, "timeout must be positive"));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::invalid(section, "temperature must be within 0.0..=2.0"));
            }
        }
        Ok(())
    }
}

/// Where the persona profile comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaSettings {
    /// Name the persona answers as.
    pub name: String,

    /// Inline summary, used when no `summary_path` is set.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub summary: String,

    /// Inline background, used when no `background_path` is set.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub background: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_path: Option<PathBuf>,
}

impl Default for PersonaSettings {
    fn default() -> Self {
        Self {
            name: "Assistant".to_string(),
            summary: String::new(),
            background: String::new(),
            summary_path: None,
            background_path: None,
        }
    }
}

impl PersonaSettings {
    /// Build the persona source these settings describe.
    ///
    /// Relative paths are resolved against `base_dir`.
    pub fn source(&self, base_dir: &Path) -> Box<dyn PersonaSource> {
        match &self.summary_path {
            Some(summary) => {
                let mut source = FilePersonaSource::new(&self.name, base_dir.join(summary));
                if let Some(background) = &self.background_path {
                    source = source.with_background(base_dir.join(background));
                }
                Box::new(source)
            }
            None => Box::new(StaticPersona::new(PersonaProfile::new(
                &self.name,
                &self.summary,
                &self.background,
            ))),
        }
    }
}

/// Where tool-call notifications are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationBackend {
    /// Log lines only.
    Log,
    /// Pushover push messages, falling back to the log without credentials.
    #[default]
    Pushover,
}

/// Tool-call notification delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub backend: NotificationBackend,

    /// Environment variable holding the Pushover user key.
    pub user_env: String,

    /// Environment variable holding the Pushover application token.
    pub token_env: String,

    /// Override for the Pushover messages endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            backend: NotificationBackend::default(),
            user_env: DEFAULT_PUSHOVER_USER_ENV.to_string(),
            token_env: DEFAULT_PUSHOVER_TOKEN_ENV.to_string(),
            url: None,
        }
    }
}

impl NotificationSettings {
    /// JSON config understood by the runtime Pushover sink.
    pub fn pushover_config(&self) -> serde_json::Value {
        let mut config = serde_json::json!({
            "user_env": self.user_env,
            "token_env": self.token_env,
        });
        if let Some(url) = &self.url {
            config["url"] = serde_json::Value::String(url.clone());
        }
        config
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend != NotificationBackend::Pushover {
            return Ok(());
        }
        if self.user_env.trim().is_empty() || self.token_env.trim().is_empty() {
            return Err(ConfigError::invalid(
                "notifications",
                "user_env and token_env must not be empty",
            ));
        }
        if let Some(url) = &self.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::invalid(
                    "notifications",
                    format!("url must be an http(s) URL, got '{}'", url),
                ));
            }
        }
        Ok(())
    }
}

fn default_best_of_n() -> usize {
    3
}

fn default_max_tool_rounds() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Reply generation endpoint.
    #[serde(default = "ProviderSettings::generation_defaults")]
    pub generation: ProviderSettings,

    /// Independent evaluation endpoint.
    #[serde(default = "ProviderSettings::evaluation_defaults")]
    pub evaluation: ProviderSettings,

    /// Attempts per provider call.
    #[serde(default)]
    pub completion: CompletionRetryConfig,

    /// Regeneration rounds after a rejected reply.
    #[serde(default)]
    pub retry: RetryPolicyConfig,

    /// Strategy used by the orchestrator.
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Candidate count for `best_of_n`.
    #[serde(default = "default_best_of_n")]
    pub best_of_n: usize,

    /// Tool-call round trips allowed per generation.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    #[serde(default)]
    pub persona: PersonaSettings,

    /// Delivery of tool-call notifications.
    #[serde(default)]
    pub notifications: NotificationSettings,

    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            generation: ProviderSettings::generation_defaults(),
            evaluation: ProviderSettings::evaluation_defaults(),
            completion: CompletionRetryConfig::default(),
            retry: RetryPolicyConfig::default(),
            strategy: StrategyKind::default(),
            best_of_n: default_best_of_n(),
            max_tool_rounds: default_max_tool_rounds(),
            persona: PersonaSettings::default(),
            notifications: NotificationSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Parse and validate settings from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.generation.validate("generation")?;
        self.evaluation.validate("evaluation")?;
        self.completion.validate()?;
        self.retry.validate()?;
        self.notifications.validate()?;
        if self.best_of_n == 0 {
            return Err(ConfigError::invalid("best_of_n", "must be at least 1"));
        }
        if self.persona.name.trim().is_empty() {
            return Err(ConfigError::invalid("persona.name", "must not be empty"));
        }
        Ok(())
    }
}
