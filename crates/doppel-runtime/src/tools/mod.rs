//! Tool calls requested by the generation model.
//!
//! Two tools are advertised:
//! - `record_user_details` {email, name?, notes?}
//! - `record_unknown_question` {question}
//!
//! Calls are routed to a [`ToolSink`]. Every call produces a JSON result
//! that goes back into the conversation as a tool-role message:
//! `{"recorded": "ok"}` or `{"error": "..."}`. Routing never fails the turn.
//!
//! [`sink_from_settings`] picks the sink named in the notification settings.
//! Pushover needs both credentials; without them notifications go to the log.

mod sink;

#[cfg(feature = "pushover")]
mod pushover;

use std::sync::Arc;

use async_trait::async_trait;
use doppel_core::{
    excerpt, Message, NotificationBackend, NotificationSettings, ToolCall, LOG_EXCERPT_CHARS,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

use crate::providers::ToolDefinition;

pub use sink::{LoggingToolSink, RecordingToolSink};

#[cfg(feature = "pushover")]
pub use pushover::PushoverSink;

pub const RECORD_USER_DETAILS: &str = "record_user_details";
pub const RECORD_UNKNOWN_QUESTION: &str = "record_unknown_question";

/// Errors routing or delivering a tool call.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    UnknownTool(String),

    #[error("Invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool execution failed: {0}")]
    Sink(String),
}

/// Something the persona owner should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    UserDetails {
        email: String,
        name: String,
        notes: String,
    },
    UnknownQuestion {
        question: String,
    },
}

impl Notification {
    /// Human-readable push text.
    pub fn message(&self) -> String {
        match self {
            Notification::UserDetails { email, name, notes } => format!(
                "Recording interest from {} with email {} and notes {}",
                name, email, notes
            ),
            Notification::UnknownQuestion { question } => {
                format!("Recording {} asked that I couldn't answer", question)
            }
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            Notification::UserDetails { .. } => RECORD_USER_DETAILS,
            Notification::UnknownQuestion { .. } => RECORD_UNKNOWN_QUESTION,
        }
    }
}

/// Receives notifications produced by tool calls.
#[async_trait]
pub trait ToolSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), ToolError>;

    /// Short name for logs and diagnostics, e.g. "pushover".
    fn name(&self) -> &'static str;
}

/// The sink described by `settings`.
pub fn sink_from_settings(settings: &NotificationSettings) -> Arc<dyn ToolSink> {
    let sink = match settings.backend {
        NotificationBackend::Log => Arc::new(LoggingToolSink) as Arc<dyn ToolSink>,
        NotificationBackend::Pushover => pushover_sink(settings),
    };
    tracing::debug!(sink = sink.name(), "Notification sink selected");
    sink
}

#[cfg(feature = "pushover")]
fn pushover_sink(settings: &NotificationSettings) -> Arc<dyn ToolSink> {
    match PushoverSink::from_config(&settings.pushover_config()) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            tracing::warn!(error = %e, "Pushover not configured, logging notifications instead");
            Arc::new(LoggingToolSink)
        }
    }
}

#[cfg(not(feature = "pushover"))]
fn pushover_sink(_settings: &NotificationSettings) -> Arc<dyn ToolSink> {
    tracing::warn!("Built without the pushover feature, logging notifications instead");
    Arc::new(LoggingToolSink)
}

fn default_name() -> String {
    "Name not provided".to_string()
}

fn default_notes() -> String {
    "not provided".to_string()
}

#[derive(Debug, Deserialize)]
struct UserDetailsArgs {
    email: String,
    #[serde(default = "default_name")]
    name: String,
    #[serde(default = "default_notes")]
    notes: String,
}

#[derive(Debug, Deserialize)]
struct UnknownQuestionArgs {
    question: String,
}

/// Tool definitions advertised to the generation model.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: RECORD_USER_DETAILS.to_string(),
            description: "Use this tool to record that a user is interested in being in touch \
                          and provided an email address"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "email": {
                        "type": "string",
                        "description": "The email address of this user"
                    },
                    "name": {
                        "type": "string",
                        "description": "The user's name, if they provided it"
                    },
                    "notes": {
                        "type": "string",
                        "description": "Any additional information about the conversation that's worth recording to give context"
                    }
                },
                "required": ["email"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: RECORD_UNKNOWN_QUESTION.to_string(),
            description: "Always use this tool to record any question that couldn't be answered \
                          as you didn't know the answer"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "The question that couldn't be answered"
                    }
                },
                "required": ["question"],
                "additionalProperties": false
            }),
        },
    ]
}

/// Parses tool calls and forwards them to a sink.
#[derive(Clone)]
pub struct ToolRouter {
    sink: Arc<dyn ToolSink>,
    definitions: Vec<ToolDefinition>,
}

impl ToolRouter {
    pub fn new(sink: Arc<dyn ToolSink>) -> Self {
        Self {
            sink,
            definitions: tool_definitions(),
        }
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    fn parse_arguments<T: for<'de> Deserialize<'de>>(
        tool: &str,
        arguments: &str,
    ) -> Result<T, ToolError> {
        let raw = if arguments.trim().is_empty() { "{}" } else { arguments };
        serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: e.to_string(),
        })
    }

    fn notification(name: &str, arguments: &str) -> Result<Notification, ToolError> {
        match name {
            RECORD_USER_DETAILS => {
                let args: UserDetailsArgs = Self::parse_arguments(name, arguments)?;
                Ok(Notification::UserDetails {
                    email: args.email,
                    name: args.name,
                    notes: args.notes,
                })
            }
            RECORD_UNKNOWN_QUESTION => {
                let args: UnknownQuestionArgs = Self::parse_arguments(name, arguments)?;
                Ok(Notification::UnknownQuestion {
                    question: args.question,
                })
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    /// Run one tool and return its JSON result.
    pub async fn execute(&self, name: &str, arguments: &str) -> JsonValue {
        tracing::info!(tool = name, "Executing tool");

        let result = match Self::notification(name, arguments) {
            Ok(notification) => self.sink.notify(&notification).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => json!({"recorded": "ok"}),
            Err(e) => {
                tracing::warn!(
                    tool = name,
                    arguments = %excerpt(arguments, LOG_EXCERPT_CHARS),
                    error = %e,
                    "Tool call failed"
                );
                json!({"error": e.to_string()})
            }
        }
    }

    /// Run every call in order and return the tool-role result messages.
    pub async fn handle_calls(&self, calls: &[ToolCall]) -> Vec<Message> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = self.execute(&call.name, &call.arguments).await;
            results.push(Message::tool(&call.id, result.to_string()));
        }
        results
    }
}
