//! Credential handling for LLM providers.
//!
//! API keys are wrapped in [`secrecy::SecretString`] as soon as they are
//! read. They never show up in `Debug`/`Display` output and are only handed
//! out through [`ApiCredential::expose`] when a request header is built.
//!
//! ## Usage
//!
//! ```ignore
//! // Key from config, falling back to the env var named in config
//! let env_var = config["api_key_env"].as_str().unwrap_or("OPENAI_API_KEY");
//! let cred = ApiCredential::from_config_or_env(&config, "api_key", env_var, "API key")?;
//!
//! request.bearer_auth(cred.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Loaded from configuration file/JSON
    Config,
    /// Loaded from environment variable
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// An API key that refuses to be printed.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    /// Env var the key came from (or would have come from), for messages.
    env_var: Option<String>,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            env_var: None,
            name,
        }
    }

    /// Read the credential from `env_var`; unset or blank is an error.
    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, ProviderError> {
        match std::env::var(env_var) {
            Ok(value) if !value.trim().is_empty() => Ok(Self {
                env_var: Some(env_var.to_string()),
                ..Self::new(value, CredentialSource::Environment, name)
            }),
            _ => Err(ProviderError::NotConfigured(format!(
                "{} not set: configure '{}' environment variable",
                name, env_var
            ))),
        }
    }

    /// Prefer `config[config_key]`, fall back to `env_var`.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        if let Some(value) = config[config_key].as_str().filter(|v| !v.trim().is_empty()) {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        Self::from_env(env_var, name).map_err(|_| {
            ProviderError::NotConfigured(format!(
                "{} required: set '{}' in config or {} environment variable",
                name, config_key, env_var
            ))
        })
    }

    /// Whether a credential could be loaded, without loading it.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str) -> bool {
        config[config_key].as_str().is_some_and(|v| !v.trim().is_empty())
            || std::env::var(env_var).is_ok_and(|v| !v.trim().is_empty())
    }

    /// The raw key. Call only where the request header is set.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn env_var(&self) -> Option<&str> {
        self.env_var.as_deref()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("env_var", &self.env_var)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}
