//! Retrying completion client.
//!
//! Wraps one [`LlmProvider`] with the per-call attempt policy:
//! - up to `max_attempts` provider calls
//! - after a provider error, wait `backoff_unit * 2^attempt_index` (never
//!   after the last attempt, never capped)
//! - an empty body counts as an attempt but is not an error and is not
//!   followed by a wait
//!
//! Exhaustion is reported as [`CompletionOutcome::Failed`], a value rather
//! than an `Err`, so callers pick their own fallback.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use doppel_core::{CompletionRetryConfig, Conversation};
use thiserror::Error;

use crate::providers::{
    CompletionConfig, CompletionResponse, LlmProvider, ProviderError, ToolDefinition,
};

/// No usable result after every attempt was spent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "no result from {provider} after {attempts} attempt(s): {}",
    .last_error.as_deref().unwrap_or("empty responses")
)]
pub struct CompletionFailure {
    /// Provider name.
    pub provider: String,

    /// Attempts actually made.
    pub attempts: u32,

    /// Last error seen, if any attempt failed outright.
    pub last_error: Option<String>,
}

/// Result of a retried completion call.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome<T = CompletionResponse> {
    Completed(T),
    Failed(CompletionFailure),
}

impl<T> CompletionOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            CompletionOutcome::Completed(value) => Some(value),
            CompletionOutcome::Failed(_) => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, CompletionOutcome::Completed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CompletionOutcome<U> {
        match self {
            CompletionOutcome::Completed(value) => CompletionOutcome::Completed(f(value)),
            CompletionOutcome::Failed(failure) => CompletionOutcome::Failed(failure),
        }
    }
}

/// What one attempt produced.
enum Attempt<T> {
    Done(T),
    /// Soft failure: counted, logged, no wait.
    Empty,
    Failed(ProviderError),
}

/// A provider plus its request config and attempt policy.
#[derive(Clone)]
pub struct CompletionClient {
    provider: Arc<dyn LlmProvider>,
    config: CompletionConfig,
    retry: CompletionRetryConfig,
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("provider", &self.provider.name())
            .field("model", &self.config.model)
            .field("retry", &self.retry)
            .finish()
    }
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn LlmProvider>, config: CompletionConfig) -> Self {
        Self {
            provider,
            config,
            retry: CompletionRetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: CompletionRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_config(mut self, config: CompletionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    pub fn retry(&self) -> &CompletionRetryConfig {
        &self.retry
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Wait after a failed attempt `attempt_index` (0-based).
    pub fn backoff_delay(&self, attempt_index: u32) -> Duration {
        ExponentialBuilder::default()
            .with_min_delay(self.retry.backoff_unit)
            .with_factor(2.0)
            .with_max_delay(Duration::MAX)
            .with_max_times(self.retry.max_attempts as usize)
            .build()
            .nth(attempt_index as usize)
            .unwrap_or(self.retry.backoff_unit)
    }

    /// Complete a conversation, tool calls allowed.
    pub async fn complete(
        &self,
        conversation: &Conversation,
        tools: &[ToolDefinition],
    ) -> CompletionOutcome {
        self.run(conversation, tools, |response| {
            if response.is_empty() {
                Attempt::Empty
            } else {
                Attempt::Done(response)
            }
        })
        .await
    }

    /// Complete a conversation and return only its text.
    pub async fn complete_text(&self, conversation: &Conversation) -> CompletionOutcome<String> {
        self.run(conversation, &[], |response| {
            if response.content.trim().is_empty() {
                Attempt::Empty
            } else {
                Attempt::Done(response.content)
            }
        })
        .await
    }

    /// Complete a conversation and parse the text into `T`.
    ///
    /// A parse failure is treated like a provider error: it is retried with
    /// backoff, and reported if it happens on the last attempt.
    pub async fn complete_structured<T, E, F>(
        &self,
        conversation: &Conversation,
        parse: F,
    ) -> CompletionOutcome<T>
    where
        T: Send,
        E: Display,
        F: Fn(&str) -> Result<T, E> + Send + Sync,
    {
        self.run(conversation, &[], |response| {
            if response.content.trim().is_empty() {
                return Attempt::Empty;
            }
            match parse(&response.content) {
                Ok(value) => Attempt::Done(value),
                Err(e) => Attempt::Failed(ProviderError::ParseError(e.to_string())),
            }
        })
        .await
    }

    async fn run<T, F>(
        &self,
        conversation: &Conversation,
        tools: &[ToolDefinition],
        accept: F,
    ) -> CompletionOutcome<T>
    where
        T: Send,
        F: Fn(CompletionResponse) -> Attempt<T> + Send + Sync,
    {
        let provider = self.provider.name().to_string();
        let max_attempts = self.retry.max_attempts;

        if conversation.is_empty() {
            return CompletionOutcome::Failed(CompletionFailure {
                provider,
                attempts: 0,
                last_error: Some("conversation is empty".to_string()),
            });
        }

        let mut last_error = None;

        for attempt in 0..max_attempts {
            tracing::debug!(
                provider = %provider,
                attempt = attempt + 1,
                max_attempts,
                messages = conversation.len(),
                prompt_chars = conversation.content_chars(),
                "Calling provider"
            );

            let result = self
                .provider
                .complete(conversation.messages(), tools, &self.config)
                .await
                .map(&accept);

            let error = match result {
                Ok(Attempt::Done(value)) => return CompletionOutcome::Completed(value),
                Ok(Attempt::Empty) => {
                    tracing::warn!(
                        provider = %provider,
                        attempt = attempt + 1,
                        max_attempts,
                        "Provider returned an empty response"
                    );
                    continue;
                }
                Ok(Attempt::Failed(e)) | Err(e) => e,
            };

            tracing::warn!(
                provider = %provider,
                attempt = attempt + 1,
                max_attempts,
                error = %error,
                "Provider attempt failed"
            );
            last_error = Some(error.to_string());

            if attempt + 1 < max_attempts {
                let delay = self.backoff_delay(attempt);
                tracing::debug!(
                    provider = %provider,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before next attempt"
                );
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(
            provider = %provider,
            attempts = max_attempts,
            last_error = last_error.as_deref().unwrap_or("empty responses"),
            "Provider attempts exhausted"
        );

        CompletionOutcome::Failed(CompletionFailure {
            provider,
            attempts: max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use doppel_core::Message;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    /// Provider replaying a fixed script; `None` entries fail with an HTTP error.
    pub(crate) struct ScriptedProvider {
        script: Mutex<VecDeque<Option<String>>>,
        pub(crate) calls: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(script: Vec<Option<&str>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().map(|s| s.map(String::from)).collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(
            &self,
            messages: &[Message],
            _tools: &[ToolDefinition],
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.lock().push(messages.to_vec());
            match self.script.lock().pop_front() {
                Some(Some(text)) => Ok(CompletionResponse::text(text)),
                Some(None) => Err(ProviderError::HttpError("connection reset".to_string())),
                None => Err(ProviderError::HttpError("script exhausted".to_string())),
            }
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn client(provider: Arc<ScriptedProvider>, max_attempts: u32) -> CompletionClient {
        CompletionClient::new(provider, CompletionConfig::default()).with_retry(
            CompletionRetryConfig {
                max_attempts,
                backoff_unit: Duration::from_secs(1),
            },
        )
    }

    fn conversation() -> Conversation {
        Conversation::for_turn("sys", &[], "hello").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_returns_immediately() {
        let provider = ScriptedProvider::new(vec![Some("hi!"), Some("unused")]);
        let start = Instant::now();

        let outcome = client(provider.clone(), 3).complete_text(&conversation()).await;

        assert_eq!(outcome, CompletionOutcome::Completed("hi!".to_string()));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_back_off_exponentially() {
        let provider = ScriptedProvider::new(vec![None, None, Some("finally")]);
        let start = Instant::now();

        let outcome = client(provider.clone(), 3).complete_text(&conversation()).await;

        assert_eq!(outcome.ok().as_deref(), Some("finally"));
        assert_eq!(provider.call_count(), 3);
        // 1s after attempt 0, 2s after attempt 1
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_final_attempt() {
        let provider = ScriptedProvider::new(vec![None, None, None]);
        let start = Instant::now();

        let outcome = client(provider.clone(), 3).complete_text(&conversation()).await;

        match outcome {
            CompletionOutcome::Failed(failure) => {
                assert_eq!(failure.attempts, 3);
                assert_eq!(failure.provider, "scripted");
                assert!(failure.last_error.unwrap().contains("connection reset"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(provider.call_count(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_body_is_soft_failure_without_wait() {
        let provider = ScriptedProvider::new(vec![Some(""), Some("   "), Some("ok")]);
        let start = Instant::now();

        let outcome = client(provider.clone(), 3).complete_text(&conversation()).await;

        assert_eq!(outcome.ok().as_deref(), Some("ok"));
        assert_eq!(provider.call_count(), 3);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_empty_fails_without_error() {
        let provider = ScriptedProvider::new(vec![Some(""), Some(""), Some("")]);

        let outcome = client(provider.clone(), 3).complete_text(&conversation()).await;

        match outcome {
            CompletionOutcome::Failed(failure) => {
                assert_eq!(failure.attempts, 3);
                assert_eq!(failure.last_error, None);
                assert!(failure.to_string().contains("empty responses"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_uses_attempt_index_not_error_count() {
        // empty (no wait), error on index 1 waits 2s
        let provider = ScriptedProvider::new(vec![Some(""), None, Some("ok")]);
        let start = Instant::now();

        client(provider, 3).complete_text(&conversation()).await;

        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_empty_conversation_is_not_sent() {
        let provider = ScriptedProvider::new(vec![Some("never")]);
        let outcome = client(provider.clone(), 3)
            .complete_text(&Conversation::new())
            .await;
        assert!(!outcome.is_completed());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_structured_parse_failure_is_retried() {
        let provider = ScriptedProvider::new(vec![Some("not a number"), Some("42")]);
        let start = Instant::now();

        let outcome = client(provider.clone(), 3)
            .complete_structured(&conversation(), |text| text.trim().parse::<u32>())
            .await;

        assert_eq!(outcome, CompletionOutcome::Completed(42));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_schedule() {
        let client = client(ScriptedProvider::new(vec![]), 5)
            .with_retry(CompletionRetryConfig {
                max_attempts: 5,
                backoff_unit: Duration::from_millis(250),
            });
        let delays: Vec<Duration> = (0..4).map(|i| client.backoff_delay(i)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
            ]
        );
    }

    #[test]
    fn test_outcome_map() {
        let outcome: CompletionOutcome<u32> = CompletionOutcome::Completed(2);
        assert_eq!(outcome.map(|v| v * 2).ok(), Some(4));
    }
}
