//! One chat turn: generate, evaluate, retry.
//!
//! # Execution Flow
//! 1. Generate a reply (tool calls allowed). No reply gives the fixed
//!    generation apology and nothing is evaluated.
//! 2. Evaluate it. Accepted or unjudged replies are returned as-is.
//! 3. A rejected reply starts a retry session with the configured strategy.
//!    A successful session replaces the reply; a failed one keeps the
//!    original.
//!
//! Any fault inside the turn, panics included, is turned into the fixed
//! error message at [`Orchestrator::handle`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use doppel_core::{
    excerpt, history_from_turns, ChatTurn, ConfigError, ConversationError, Message,
    PersonaSource, RetryPolicyConfig, RetryPolicyUpdate, Settings, StrategyKind, Verdict,
    LOG_EXCERPT_CHARS,
};
use futures::FutureExt;
use thiserror::Error;

use crate::completion::CompletionClient;
use crate::evaluator::Evaluator;
use crate::generation::ReplyGenerator;
use crate::persona::{CachedPersonaSource, DEFAULT_PERSONA_TTL};
use crate::prompts::PromptBuilder;
use crate::providers::{CompletionConfig, LlmProvider, ProviderError, ProviderRegistry};
use crate::retry::{RetryEngine, RetryOutcome, RetryRequest, SharedRetryPolicy};
use crate::tools::{sink_from_settings, ToolRouter, ToolSink};

/// Returned when no reply could be generated.
pub const GENERATION_FALLBACK: &str = "Sorry, I couldn't generate a response.";

/// Returned when the turn failed internally.
pub const ERROR_FALLBACK: &str = "Sorry, I encountered an error while processing your request.";

/// Errors from the orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid conversation: {0}")]
    Conversation(#[from] ConversationError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Turn panicked: {0}")]
    Panicked(String),
}

/// What the caller gets back for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub content: String,

    /// Verdict on `content`, `None` if it was never judged.
    pub verdict: Option<Verdict>,

    pub was_retried: bool,

    /// Retry session, when one ran.
    pub retry: Option<RetryOutcome>,
}

impl ChatReply {
    fn unjudged(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            verdict: None,
            was_retried: false,
            retry: None,
        }
    }

    pub fn error() -> Self {
        Self::unjudged(ERROR_FALLBACK)
    }

    pub fn is_acceptable(&self) -> bool {
        self.verdict.as_ref().is_some_and(|v| v.acceptable)
    }
}

/// Health of both providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderHealth {
    pub generation: bool,
    pub evaluation: bool,
}

impl ProviderHealth {
    pub fn is_healthy(&self) -> bool {
        self.generation && self.evaluation
    }
}

pub struct Orchestrator {
    generator: Arc<ReplyGenerator>,
    evaluator: Arc<Evaluator>,
    retry: RetryEngine,
    strategy: StrategyKind,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<ReplyGenerator>,
        evaluator: Arc<Evaluator>,
        policy: SharedRetryPolicy,
    ) -> Self {
        let retry = RetryEngine::new(generator.clone(), evaluator.clone(), policy);
        Self {
            generator,
            evaluator,
            retry,
            strategy: StrategyKind::default(),
        }
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Orchestrator wired from settings: providers from the built-in
    /// registry, persona files resolved against `base_dir`, tool
    /// notifications to the configured sink.
    pub fn from_settings(settings: &Settings, base_dir: &Path) -> Result<Self, OrchestratorError> {
        let registry = ProviderRegistry::with_defaults();
        let generation = registry.create(
            &settings.generation.provider,
            &settings.generation.factory_config(),
        )?;
        let evaluation = registry.create(
            &settings.evaluation.provider,
            &settings.evaluation.factory_config(),
        )?;

        OrchestratorBuilder::new()
            .settings(settings.clone())
            .generation_provider(generation)
            .evaluation_provider(evaluation)
            .persona(Arc::from(settings.persona.source(base_dir)))
            .tool_sink(sink_from_settings(&settings.notifications))
            .build()
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_best_of_n(mut self, n: usize) -> Self {
        self.retry = self.retry.with_best_of_n(n);
        self
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn retry_policy(&self) -> &SharedRetryPolicy {
        self.retry.policy()
    }

    /// Change the retry policy for sessions that start afterwards.
    pub fn update_retry_policy(
        &self,
        update: &RetryPolicyUpdate,
    ) -> Result<RetryPolicyConfig, ConfigError> {
        self.retry.policy().update(update)
    }

    pub fn generator(&self) -> &ReplyGenerator {
        &self.generator
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Name of the sink tool notifications are delivered to.
    pub fn notification_sink(&self) -> Option<&'static str> {
        self.generator.tools().map(ToolRouter::sink_name)
    }

    /// Answer `message`. Never fails: faults become [`ERROR_FALLBACK`].
    pub async fn handle(&self, message: &str, history: &[Message]) -> ChatReply {
        let turn = AssertUnwindSafe(self.try_handle(message, history)).catch_unwind();
        let error = match turn.await {
            Ok(Ok(reply)) => return reply,
            Ok(Err(e)) => e,
            Err(payload) => OrchestratorError::Panicked(panic_message(payload.as_ref())),
        };

        tracing::error!(
            error = %error,
            message = %excerpt(message, LOG_EXCERPT_CHARS),
            "Failed to process chat turn"
        );
        ChatReply::error()
    }

    /// [`handle`](Self::handle) with UI-style `(user, assistant)` history.
    pub async fn handle_turns(&self, message: &str, turns: &[ChatTurn]) -> ChatReply {
        self.handle(message, &history_from_turns(turns)).await
    }

    /// The turn itself, with internal faults as errors.
    pub async fn try_handle(
        &self,
        message: &str,
        history: &[Message],
    ) -> Result<ChatReply, OrchestratorError> {
        let Some(reply) = self.generator.generate(message, history).await? else {
            tracing::warn!("No reply generated, using fallback");
            return Ok(ChatReply::unjudged(GENERATION_FALLBACK));
        };

        let verdict = match self.evaluator.evaluate(&reply, message, history).await {
            None => {
                tracing::warn!("Evaluation failed, keeping original reply");
                return Ok(ChatReply::unjudged(reply));
            }
            Some(verdict) if verdict.acceptable => {
                tracing::info!("Reply accepted by evaluator");
                return Ok(ChatReply {
                    content: reply,
                    verdict: Some(verdict),
                    was_retried: false,
                    retry: None,
                });
            }
            Some(verdict) => verdict,
        };

        tracing::info!(
            strategy = %self.strategy,
            feedback = %excerpt(&verdict.feedback, LOG_EXCERPT_CHARS),
            "Reply rejected, retrying"
        );

        let request = RetryRequest::new(&reply, message, history.to_vec(), &verdict.feedback);
        let outcome = self.retry.retry(&request, self.strategy).await;

        if outcome.success {
            tracing::info!(attempts_made = outcome.attempts_made, "Retry successful");
            Ok(ChatReply {
                content: outcome.final_reply.clone(),
                verdict: outcome.final_verdict.clone(),
                was_retried: true,
                retry: Some(outcome),
            })
        } else {
            tracing::warn!(
                attempts_made = outcome.attempts_made,
                "Retry failed, keeping original reply"
            );
            Ok(ChatReply {
                content: reply,
                verdict: Some(verdict),
                was_retried: false,
                retry: Some(outcome),
            })
        }
    }

    pub async fn health_check(&self) -> ProviderHealth {
        ProviderHealth {
            generation: self.generator.client().provider().health_check().await,
            evaluation: self.evaluator.client().provider().health_check().await,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    generation: Option<Arc<dyn LlmProvider>>,
    evaluation: Option<Arc<dyn LlmProvider>>,
    persona: Option<Arc<CachedPersonaSource>>,
    sink: Option<Arc<dyn ToolSink>>,
    settings: Settings,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            generation: None,
            evaluation: None,
            persona: None,
            sink: None,
            settings: Settings::default(),
        }
    }

    pub fn generation_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.generation = Some(provider);
        self
    }

    pub fn evaluation_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.evaluation = Some(provider);
        self
    }

    /// Persona source, cached for [`DEFAULT_PERSONA_TTL`].
    pub fn persona(self, source: Arc<dyn PersonaSource>) -> Self {
        self.cached_persona(Arc::new(CachedPersonaSource::new(source, DEFAULT_PERSONA_TTL)))
    }

    pub fn cached_persona(mut self, persona: Arc<CachedPersonaSource>) -> Self {
        self.persona = Some(persona);
        self
    }

    pub fn tool_sink(mut self, sink: Arc<dyn ToolSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let settings = self.settings;
        settings.validate()?;

        let generation = self
            .generation
            .ok_or_else(|| OrchestratorError::ProviderNotConfigured("generation".to_string()))?;
        let evaluation = self
            .evaluation
            .ok_or_else(|| OrchestratorError::ProviderNotConfigured("evaluation".to_string()))?;

        let persona = match self.persona {
            Some(persona) => persona,
            None => Arc::new(CachedPersonaSource::new(
                Arc::from(settings.persona.source(Path::new("."))),
                DEFAULT_PERSONA_TTL,
            )),
        };
        let sink = self
            .sink
            .unwrap_or_else(|| sink_from_settings(&settings.notifications));
        let prompts = PromptBuilder::new(persona);

        let generation_client =
            CompletionClient::new(generation, CompletionConfig::from(&settings.generation))
                .with_retry(settings.completion.clone());
        let evaluation_client =
            CompletionClient::new(evaluation, CompletionConfig::from(&settings.evaluation))
                .with_retry(settings.completion.clone());

        let generator = ReplyGenerator::new(generation_client, prompts.clone())
            .with_tools(ToolRouter::new(sink))
            .with_max_tool_rounds(settings.max_tool_rounds);
        let evaluator = Evaluator::new(evaluation_client, prompts);
        let policy = SharedRetryPolicy::new(settings.retry.clone())?;

        tracing::debug!(
            strategy = %settings.strategy,
            best_of_n = settings.best_of_n,
            "Orchestrator configured"
        );

        Ok(
            Orchestrator::new(Arc::new(generator), Arc::new(evaluator), policy)
                .with_strategy(settings.strategy)
                .with_best_of_n(settings.best_of_n),
        )
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
