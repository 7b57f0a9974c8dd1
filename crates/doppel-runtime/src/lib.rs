//! # doppel-runtime
//!
//! The LLM-facing half of doppel: a persona answers chat messages through a
//! generation model, a second model judges every reply, and rejected replies
//! are regenerated under a retry strategy.
//!
//! ## Layers
//!
//! - [`providers`]: one remote call per request (OpenAI-compatible HTTP)
//! - [`completion`]: bounded attempts with exponential backoff around a provider
//! - [`evaluator`]: structured verdicts on candidate replies
//! - [`retry`]: regeneration sessions (single, progressive, best-of-n)
//! - [`orchestrator`]: the full turn, with safe fallbacks
//!
//! Everything runs sequentially on the calling task. There is no fan-out,
//! even for best-of-n.
//!
//! ## Example
//!
//! ```rust,ignore
//! use doppel_core::Settings;
//! use doppel_runtime::Orchestrator;
//!
//! let settings = Settings::from_yaml_file("doppel.yaml")?;
//! let orchestrator = Orchestrator::from_settings(&settings, Path::new("."))?;
//!
//! let reply = orchestrator.handle("What do you work on?", &[]).await;
//! println!("{}", reply.content);
//! ```

pub mod completion;
pub mod evaluator;
pub mod generation;
pub mod orchestrator;
pub mod persona;
pub mod prompts;
pub mod providers;
pub mod retry;
pub mod tools;

pub use completion::{CompletionClient, CompletionFailure, CompletionOutcome};
pub use evaluator::{choose_first_acceptable, Evaluator, Selection};
pub use generation::ReplyGenerator;
pub use orchestrator::{
    ChatReply, Orchestrator, OrchestratorBuilder, OrchestratorError, ProviderHealth,
    ERROR_FALLBACK, GENERATION_FALLBACK,
};
pub use persona::CachedPersonaSource;
pub use prompts::PromptBuilder;
pub use providers::{
    ApiCredential, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
    ProviderFactory, ProviderRegistry, ResponseFormat, TokenUsage, ToolDefinition,
};
pub use retry::{
    AttemptRecord, RetryEngine, RetryMetrics, RetryOutcome, RetryRequest, RetrySession,
    RetryState, RetryStrategy, SharedRetryPolicy,
};
pub use tools::{
    sink_from_settings, LoggingToolSink, Notification, RecordingToolSink, ToolError, ToolRouter,
    ToolSink,
};
