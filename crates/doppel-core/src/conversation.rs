//! Conversation model.
//!
//! A conversation is an ordered list of messages:
//! - an optional system message, at most one, always first
//! - alternating user/assistant turns after it
//! - tool-role messages only directly after an assistant tool-call message
//!   (or another tool message)

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Speaker of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back on the tool-role result.
    pub id: String,

    /// Name of the tool to invoke.
    pub name: String,

    /// Raw JSON arguments as produced by the model.
    pub arguments: String,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Speaker.
    pub role: Role,

    /// Text content (may be empty on an assistant tool-call message).
    pub content: String,

    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Call id this tool-role message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant message carrying tool calls.
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Tool-role result for the call `call_id`.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Violations of the conversation ordering rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    #[error("System message must be the first message")]
    SystemNotFirst,

    #[error("Two consecutive {0} messages")]
    ConsecutiveRole(Role),

    #[error("Tool message must follow an assistant tool call or another tool message")]
    OrphanToolMessage,

    #[error("Tool message is missing its tool_call_id")]
    MissingToolCallId,
}

/// An ordered, validated sequence of messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversation starting with a system prompt.
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    /// Validate and collect a list of messages.
    pub fn from_messages(messages: Vec<Message>) -> Result<Self, ConversationError> {
        let mut conversation = Self::new();
        for message in messages {
            conversation.push(message)?;
        }
        Ok(conversation)
    }

    /// Build `system + history + user_message`.
    ///
    /// History comes from a UI and is not trusted to alternate cleanly, so
    /// adjacent same-role turns are merged rather than rejected.
    pub fn for_turn(
        system_prompt: &str,
        history: &[Message],
        user_message: &str,
    ) -> Result<Self, ConversationError> {
        let mut conversation = Self::with_system(system_prompt);
        for message in history.iter().filter(|m| m.role != Role::System) {
            conversation.push_or_merge(message.clone())?;
        }
        conversation.push_or_merge(Message::user(user_message))?;
        Ok(conversation)
    }

    /// Append a message, enforcing the ordering rules.
    pub fn push(&mut self, message: Message) -> Result<(), ConversationError> {
        self.check_next(&message)?;
        self.messages.push(message);
        Ok(())
    }

    /// Append a message, folding it into the previous one when both are
    /// plain user or assistant turns of the same role.
    pub fn push_or_merge(&mut self, message: Message) -> Result<(), ConversationError> {
        if let Some(last) = self.messages.last_mut() {
            let mergeable = matches!(message.role, Role::User | Role::Assistant)
                && last.role == message.role
                && !last.has_tool_calls()
                && !message.has_tool_calls();
            if mergeable {
                if !message.content.is_empty() {
                    if !last.content.is_empty() {
                        last.content.push_str("\n\n");
                    }
                    last.content.push_str(&message.content);
                }
                return Ok(());
            }
        }
        self.push(message)
    }

    fn check_next(&self, message: &Message) -> Result<(), ConversationError> {
        let last = self.messages.last();
        match message.role {
            Role::System if last.is_some() => Err(ConversationError::SystemNotFirst),
            Role::System => Ok(()),
            Role::Tool => {
                if message.tool_call_id.is_none() {
                    return Err(ConversationError::MissingToolCallId);
                }
                match last {
                    Some(prev) if prev.role == Role::Tool => Ok(()),
                    Some(prev) if prev.role == Role::Assistant && prev.has_tool_calls() => Ok(()),
                    _ => Err(ConversationError::OrphanToolMessage),
                }
            }
            role => match last {
                Some(prev) if prev.role == role => Err(ConversationError::ConsecutiveRole(role)),
                _ => Ok(()),
            },
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The system prompt, if present.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Total characters of content, used for rough size logging.
    pub fn content_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

/// One UI-style exchange: what the user said and what the persona answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub user: String,
    pub assistant: String,
}

impl ChatTurn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

/// Flatten turn pairs into history messages, skipping empty sides.
pub fn history_from_turns(turns: &[ChatTurn]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(turns.len() * 2);
    for turn in turns {
        if !turn.user.is_empty() {
            messages.push(Message::user(&turn.user));
        }
        if !turn.assistant.is_empty() {
            messages.push(Message::assistant(&turn.assistant));
        }
    }
    messages
}

/// First `max_chars` characters of `text`, with an ellipsis when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_alternating_conversation_is_valid() {
        let conversation = Conversation::from_messages(vec![
            Message::system("be nice"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("how are you?"),
        ]);
        assert!(conversation.is_ok());
        assert_eq!(conversation.unwrap().system_prompt(), Some("be nice"));
    }

    #[test]
    fn test_system_must_be_first() {
        let result = Conversation::from_messages(vec![Message::user("hi"), Message::system("late")]);
        assert_eq!(result.unwrap_err(), ConversationError::SystemNotFirst);
    }

    #[test]
    fn test_consecutive_user_rejected() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user("one")).unwrap();
        let err = conversation.push(Message::user("two")).unwrap_err();
        assert_eq!(err, ConversationError::ConsecutiveRole(Role::User));
    }

    #[test]
    fn test_tool_messages_follow_tool_call() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "record_unknown_question".to_string(),
            arguments: r#"{"question":"?"}"#.to_string(),
        };
        let mut conversation = Conversation::with_system("sys");
        conversation.push(Message::user("q")).unwrap();
        conversation
            .push(Message::assistant_tool_calls("", vec![call]))
            .unwrap();
        conversation.push(Message::tool("call_1", "{}")).unwrap();
        conversation.push(Message::tool("call_2", "{}")).unwrap();
        conversation.push(Message::assistant("done")).unwrap();
        assert_eq!(conversation.len(), 6);
    }

    #[test]
    fn test_orphan_tool_message_rejected() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user("q")).unwrap();
        assert_eq!(
            conversation.push(Message::tool("x", "{}")).unwrap_err(),
            ConversationError::OrphanToolMessage
        );
    }

    #[test]
    fn test_for_turn_merges_dangling_user_turns() {
        let history = vec![Message::user("first"), Message::user("second")];
        let conversation = Conversation::for_turn("sys", &history, "third").unwrap();

        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.messages()[1].content, "first\n\nsecond\n\nthird");
    }

    #[test]
    fn test_for_turn_drops_history_system_messages() {
        let history = vec![Message::system("old"), Message::user("a"), Message::assistant("b")];
        let conversation = Conversation::for_turn("new", &history, "c").unwrap();
        assert_eq!(conversation.system_prompt(), Some("new"));
        assert_eq!(conversation.len(), 4);
    }

    #[test]
    fn test_history_from_turns_skips_empty_sides() {
        let turns = vec![
            ChatTurn::new("hello", "hi there"),
            ChatTurn::new("", "unprompted"),
            ChatTurn::new("question", ""),
        ];
        let history = history_from_turns(&turns);
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Assistant, Role::User]
        );
    }

    #[test]
    fn test_excerpt_is_char_boundary_safe() {
        assert_eq!(excerpt("short", 50), "short");
        assert_eq!(excerpt("héllo wörld", 4), "héll...");
    }

    #[test]
    fn test_message_serializes_role_lowercase() {
        let json = serde_json::to_value(Message::assistant("x")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("tool_calls").is_none());
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        (0..3u8, "[a-z]{0,8}").prop_map(|(kind, text)| match kind {
            0 => Message::user(text),
            1 => Message::assistant(text),
            _ => Message::system(text),
        })
    }

    proptest! {
        #[test]
        fn prop_for_turn_never_repeats_roles(history in proptest::collection::vec(arb_message(), 0..20)) {
            let conversation = Conversation::for_turn("sys", &history, "now").unwrap();
            let messages = conversation.messages();
            prop_assert_eq!(messages[0].role, Role::System);
            prop_assert_eq!(messages.last().map(|m| m.role), Some(Role::User));
            for pair in messages.windows(2) {
                prop_assert_ne!(pair[0].role, pair[1].role);
            }
        }

        #[test]
        fn prop_excerpt_never_exceeds_limit(text in "\\PC{0,80}", limit in 0usize..60) {
            let cut = excerpt(&text, limit);
            prop_assert!(cut.chars().count() <= limit + 3);
        }
    }
}
