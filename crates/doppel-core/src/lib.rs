//! # doppel-core
//!
//! LLM-free building blocks for a persona chatbot whose replies are judged
//! by an independent evaluator model.
//!
//! This crate holds the data the runtime loop works on:
//! - conversations and the ordering rules they obey
//! - evaluator verdicts and their JSON schema
//! - persona profiles and where they are loaded from
//! - retry policy values and the delay schedule
//! - settings files
//!
//! ## Example
//!
//! ```rust,ignore
//! use doppel_core::{Conversation, Settings, Verdict};
//!
//! let settings = Settings::from_yaml_file("doppel.yaml")?;
//! let conversation = Conversation::for_turn("You are Ada.", &[], "Hi!")?;
//! let verdict = Verdict::parse(r#"{"is_acceptable": true, "feedback": "ok"}"#)?;
//! assert!(verdict.acceptable);
//! ```

pub mod conversation;
pub mod durations;
pub mod persona;
pub mod policy;
pub mod settings;
pub mod verdict;

pub use conversation::{
    excerpt, history_from_turns, ChatTurn, Conversation, ConversationError, Message, Role,
    ToolCall,
};
pub use persona::{FilePersonaSource, PersonaError, PersonaProfile, PersonaSource, StaticPersona};
pub use policy::{
    CompletionRetryConfig, ConfigError, RetryPolicyConfig, RetryPolicyUpdate, StrategyKind,
};
pub use settings::{
    NotificationBackend, NotificationSettings, PersonaSettings, ProviderSettings, Settings,
};
pub use verdict::{Verdict, VerdictError};

/// Character budget for message excerpts in log lines.
pub const LOG_EXCERPT_CHARS: usize = 50;
