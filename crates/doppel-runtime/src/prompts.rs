//! Prompt templates.
//!
//! Four prompts drive a turn:
//! 1. persona system prompt (generation)
//! 2. evaluator system prompt (judging, carries the same persona context)
//! 3. evaluator user prompt (conversation, latest message, candidate reply)
//! 4. retry system prompt (persona prompt plus the rejected reply and why)
//!
//! When the persona cannot be loaded the generic fallbacks are used and the
//! turn goes on.

use std::sync::Arc;

use doppel_core::{Message, PersonaProfile, Role};

use crate::persona::CachedPersonaSource;

/// Generation prompt used when no persona is available.
pub const FALLBACK_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Evaluator prompt used when no persona is available.
pub const FALLBACK_EVALUATOR_PROMPT: &str =
    "You are an AI assistant that evaluates responses for quality and appropriateness.";

/// Output contract appended to every evaluator system prompt.
pub const VERDICT_FORMAT_INSTRUCTIONS: &str = r#"Reply with a single JSON object and nothing else:
{"is_acceptable": true or false, "feedback": "why, and what to change if rejected"}"#;

pub fn system_prompt(profile: &PersonaProfile) -> String {
    let name = &profile.name;
    format!(
        "You are acting as {name}. You are answering questions on {name}'s website, \
particularly questions related to {name}'s career, background, skills and experience. \
Your responsibility is to represent {name} for interactions on the website as faithfully as possible. \
You are given a summary of {name}'s background and profile which you can use to answer questions. \
Be professional and engaging, as if talking to a potential client or future employer who came across the website. \
If you don't know the answer to any question, use your record_unknown_question tool to record the question \
that you couldn't answer, even if it's about something trivial or unrelated to career. \
If the user is engaging in discussion, try to steer them towards getting in touch via email; \
ask for their email and record it using your record_user_details tool.\n\n\
## Summary:\n{summary}\n\n\
## Background:\n{background}\n\n\
With this context, please chat with the user, always staying in character as {name}.",
        name = name,
        summary = profile.summary,
        background = profile.background,
    )
}

pub fn evaluator_system_prompt(profile: &PersonaProfile) -> String {
    let name = &profile.name;
    format!(
        "You are an evaluator that decides whether a response to a question is acceptable. \
You are provided with a conversation between a User and an Agent. \
Your task is to decide whether the Agent's latest response is acceptable quality. \
The Agent is playing the role of {name} and is representing {name} on their website. \
The Agent has been instructed to be professional and engaging, as if talking to a potential client \
or future employer who came across the website. \
The Agent has been provided with context on {name} in the form of their summary and background. \
Here's the information:\n\n\
## Summary:\n{summary}\n\n\
## Background:\n{background}\n\n\
With this context, please evaluate the latest response, replying with whether the response is \
acceptable and your feedback.\n\n{format}",
        name = name,
        summary = profile.summary,
        background = profile.background,
        format = VERDICT_FORMAT_INSTRUCTIONS,
    )
}

/// `User:` / `Agent:` transcript of the prior turns.
pub fn render_history(history: &[Message]) -> String {
    let lines: Vec<String> = history
        .iter()
        .filter_map(|message| {
            let speaker = match message.role {
                Role::User => "User",
                Role::Assistant => "Agent",
                Role::System | Role::Tool => return None,
            };
            (!message.content.is_empty()).then(|| format!("{}: {}", speaker, message.content))
        })
        .collect();

    if lines.is_empty() {
        "(no earlier messages)".to_string()
    } else {
        lines.join("\n")
    }
}

pub fn evaluator_user_prompt(reply: &str, message: &str, history: &[Message]) -> String {
    format!(
        "Here's the conversation between the User and the Agent:\n\n{history}\n\n\
Here's the latest message from the User:\n\n{message}\n\n\
Here's the latest response from the Agent:\n\n{reply}\n\n\
Please evaluate the response, replying with whether it is acceptable and your feedback.",
        history = render_history(history),
        message = message,
        reply = reply,
    )
}

pub fn retry_system_prompt(base_prompt: &str, rejected_reply: &str, feedback: &str) -> String {
    format!(
        "{base_prompt}\n\n\
## Previous answer rejected\n\
You just tried to reply, but the quality control rejected your reply\n\n\
## Your attempted answer:\n{rejected_reply}\n\n\
## Reason for rejection:\n{feedback}\n\n\
Please provide a better response that addresses the feedback."
    )
}

/// Fills the persona templates from a cached profile.
#[derive(Clone)]
pub struct PromptBuilder {
    persona: Arc<CachedPersonaSource>,
}

impl PromptBuilder {
    pub fn new(persona: Arc<CachedPersonaSource>) -> Self {
        Self { persona }
    }

    pub fn persona(&self) -> &Arc<CachedPersonaSource> {
        &self.persona
    }

    async fn profile(&self, purpose: &'static str) -> Option<PersonaProfile> {
        match self.persona.profile().await {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::error!(error = %e, purpose, "Persona unavailable, using fallback prompt");
                None
            }
        }
    }

    pub async fn system_prompt(&self) -> String {
        match self.profile("generation").await {
            Some(profile) => system_prompt(&profile),
            None => FALLBACK_SYSTEM_PROMPT.to_string(),
        }
    }

    pub async fn evaluator_system_prompt(&self) -> String {
        match self.profile("evaluation").await {
            Some(profile) => evaluator_system_prompt(&profile),
            None => format!("{}\n\n{}", FALLBACK_EVALUATOR_PROMPT, VERDICT_FORMAT_INSTRUCTIONS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doppel_core::{PersonaError, PersonaSource, StaticPersona};
    use std::time::Duration;

    fn ada() -> PersonaProfile {
        PersonaProfile::new("Ada", "I write programs for engines.", "Worked with Babbage.")
    }

    struct Broken;

    impl PersonaSource for Broken {
        fn load(&self) -> Result<PersonaProfile, PersonaError> {
            Err(PersonaError::MissingField("name"))
        }
    }

    #[test]
    fn test_system_prompt_carries_persona() {
        let prompt = system_prompt(&ada());
        assert!(prompt.starts_with("You are acting as Ada."));
        assert!(prompt.contains("## Summary:\nI write programs for engines."));
        assert!(prompt.contains("## Background:\nWorked with Babbage."));
        assert!(prompt.contains("record_unknown_question"));
        assert!(prompt.contains("record_user_details"));
    }

    #[test]
    fn test_evaluator_prompt_asks_for_json() {
        let prompt = evaluator_system_prompt(&ada());
        assert!(prompt.contains("playing the role of Ada"));
        assert!(prompt.contains("\"is_acceptable\""));
    }

    #[test]
    fn test_evaluator_user_prompt_sections() {
        let history = vec![Message::user("hi"), Message::assistant("hello!")];
        let prompt = evaluator_user_prompt("I am Ada.", "who are you?", &history);
        assert!(prompt.contains("User: hi\nAgent: hello!"));
        assert!(prompt.contains("latest message from the User:\n\nwho are you?"));
        assert!(prompt.contains("latest response from the Agent:\n\nI am Ada."));
    }

    #[test]
    fn test_render_history_skips_system_and_tools() {
        let history = vec![
            Message::system("sys"),
            Message::user("q"),
            Message::tool("c1", "{}"),
        ];
        assert_eq!(render_history(&history), "User: q");
        assert_eq!(render_history(&[]), "(no earlier messages)");
    }

    #[test]
    fn test_retry_prompt() {
        let prompt = retry_system_prompt("BASE", "yo whats up", "too informal");
        assert!(prompt.starts_with("BASE\n\n## Previous answer rejected"));
        assert!(prompt.contains("## Your attempted answer:\nyo whats up"));
        assert!(prompt.contains("## Reason for rejection:\ntoo informal"));
    }

    #[tokio::test]
    async fn test_builder_uses_persona() {
        let persona = CachedPersonaSource::new(
            Arc::new(StaticPersona::new(ada())),
            Duration::from_secs(60),
        );
        let builder = PromptBuilder::new(Arc::new(persona));
        assert!(builder.system_prompt().await.contains("acting as Ada"));
    }

    #[tokio::test]
    async fn test_builder_falls_back_on_persona_error() {
        let persona = CachedPersonaSource::new(Arc::new(Broken), Duration::from_secs(60));
        let builder = PromptBuilder::new(Arc::new(persona));

        assert_eq!(builder.system_prompt().await, FALLBACK_SYSTEM_PROMPT);
        assert!(builder
            .evaluator_system_prompt()
            .await
            .starts_with(FALLBACK_EVALUATOR_PROMPT));
    }
}
