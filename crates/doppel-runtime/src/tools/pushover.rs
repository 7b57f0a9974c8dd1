//! Pushover notification sink.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{Notification, ToolError, ToolSink};
use crate::providers::{ApiCredential, ProviderError};

pub const PUSHOVER_USER_ENV: &str = "PUSHOVER_USER";
pub const PUSHOVER_TOKEN_ENV: &str = "PUSHOVER_TOKEN";
const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";

/// Sends every notification as a Pushover message.
pub struct PushoverSink {
    user: ApiCredential,
    token: ApiCredential,
    url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for PushoverSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushoverSink")
            .field("user", &self.user)
            .field("token", &self.token)
            .field("url", &self.url)
            .finish()
    }
}

impl PushoverSink {
    pub fn new(user: ApiCredential, token: ApiCredential) -> Self {
        Self {
            user,
            token,
            url: PUSHOVER_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// `user`/`token` from config, falling back to the variables named by
    /// `user_env`/`token_env` (default `PUSHOVER_USER` and `PUSHOVER_TOKEN`).
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let user_env = config["user_env"].as_str().unwrap_or(PUSHOVER_USER_ENV);
        let token_env = config["token_env"].as_str().unwrap_or(PUSHOVER_TOKEN_ENV);

        let user = ApiCredential::from_config_or_env(config, "user", user_env, "Pushover user")?;
        let token =
            ApiCredential::from_config_or_env(config, "token", token_env, "Pushover token")?;
        let mut sink = Self::new(user, token);
        if let Some(url) = config["url"].as_str() {
            sink.url = url.to_string();
        }
        Ok(sink)
    }
}

#[async_trait]
impl ToolSink for PushoverSink {
    async fn notify(&self, notification: &Notification) -> Result<(), ToolError> {
        let message = notification.message();
        let form = [
            ("user", self.user.expose()),
            ("token", self.token.expose()),
            ("message", message.as_str()),
        ];

        let response = self
            .client
            .post(&self.url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ToolError::Sink(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ToolError::Sink(format!(
                "Pushover returned status {}",
                response.status().as_u16()
            )));
        }

        tracing::debug!(tool = notification.tool_name(), "Pushover notification sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "pushover"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_both_credentials() {
        let config = serde_json::json!({"user": "u-123"});
        let result = PushoverSink::from_config(&serde_json::json!({
            "user": "u-123",
            "token": "t-456",
            "url": "http://localhost:9/push"
        }));
        assert_eq!(result.unwrap().url, "http://localhost:9/push");

        if std::env::var(PUSHOVER_TOKEN_ENV).is_err() {
            assert!(PushoverSink::from_config(&config).is_err());
        }
    }

    #[test]
    fn test_from_config_reads_named_env_vars() {
        std::env::set_var("DOPPEL_PUSHOVER_NAMED_USER", "u-env");
        std::env::set_var("DOPPEL_PUSHOVER_NAMED_TOKEN", "t-env");

        let sink = PushoverSink::from_config(&serde_json::json!({
            "user_env": "DOPPEL_PUSHOVER_NAMED_USER",
            "token_env": "DOPPEL_PUSHOVER_NAMED_TOKEN"
        }))
        .unwrap();
        assert_eq!(sink.user.expose(), "u-env");
        assert_eq!(sink.token.expose(), "t-env");

        let missing = PushoverSink::from_config(&serde_json::json!({
            "user_env": "DOPPEL_PUSHOVER_NAMED_USER",
            "token_env": "DOPPEL_PUSHOVER_NEVER_SET"
        }));
        assert!(missing.is_err());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let sink = PushoverSink::from_config(&serde_json::json!({
            "user": "user-secret-1",
            "token": "token-secret-2"
        }))
        .unwrap();
        let debug_output = format!("{:?}", sink);
        assert!(!debug_output.contains("user-secret-1"));
        assert!(!debug_output.contains("token-secret-2"));
    }
}
