//! Reply generation against the primary provider.
//!
//! `generate` advertises the tool definitions and runs the tool-call loop:
//! whenever the model answers with tool calls they are routed, their results
//! are appended as tool messages, and the provider is called again. The loop
//! stops at the first plain-text answer or after `max_tool_rounds` round trips.
//!
//! `regenerate` is used by retry rounds. It sends the retry system prompt and
//! never advertises tools.

use doppel_core::{excerpt, Conversation, ConversationError, Message, LOG_EXCERPT_CHARS};

use crate::completion::{CompletionClient, CompletionOutcome};
use crate::prompts::{self, PromptBuilder};
use crate::tools::ToolRouter;

/// Default bound on tool-call round trips per generation.
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 5;

pub struct ReplyGenerator {
    client: CompletionClient,
    prompts: PromptBuilder,
    tools: Option<ToolRouter>,
    max_tool_rounds: u32,
}

impl ReplyGenerator {
    pub fn new(client: CompletionClient, prompts: PromptBuilder) -> Self {
        Self {
            client,
            prompts,
            tools: None,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_tools(mut self, router: ToolRouter) -> Self {
        self.tools = Some(router);
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    pub fn client(&self) -> &CompletionClient {
        &self.client
    }

    pub fn tools(&self) -> Option<&ToolRouter> {
        self.tools.as_ref()
    }

    /// First reply to `message`. `Ok(None)` means the provider produced
    /// nothing usable.
    pub async fn generate(
        &self,
        message: &str,
        history: &[Message],
    ) -> Result<Option<String>, ConversationError> {
        let system_prompt = self.prompts.system_prompt().await;
        let mut conversation = Conversation::for_turn(&system_prompt, history, message)?;

        tracing::debug!(
            message = %excerpt(message, LOG_EXCERPT_CHARS),
            history = history.len(),
            "Generating reply"
        );

        let definitions = self
            .tools
            .as_ref()
            .map(|router| router.definitions())
            .unwrap_or_default();

        let mut tool_rounds = 0;
        loop {
            let response = match self.client.complete(&conversation, definitions).await {
                CompletionOutcome::Completed(response) => response,
                CompletionOutcome::Failed(failure) => {
                    tracing::warn!(error = %failure, "Reply generation failed");
                    return Ok(None);
                }
            };

            let router = match &self.tools {
                Some(router) if !response.tool_calls.is_empty() => router,
                _ => return Ok(Self::text_reply(response.content)),
            };

            if tool_rounds >= self.max_tool_rounds {
                tracing::warn!(
                    max_tool_rounds = self.max_tool_rounds,
                    "Tool round limit reached"
                );
                return Ok(Self::text_reply(response.content));
            }
            tool_rounds += 1;

            tracing::debug!(
                round = tool_rounds,
                calls = response.tool_calls.len(),
                "Model requested tool calls"
            );

            let results = router.handle_calls(&response.tool_calls).await;
            conversation.push(Message::assistant_tool_calls(
                response.content,
                response.tool_calls,
            ))?;
            for result in results {
                conversation.push(result)?;
            }
        }
    }

    /// Reply produced after `rejected_reply` was turned down with `feedback`.
    pub async fn regenerate(
        &self,
        rejected_reply: &str,
        feedback: &str,
        message: &str,
        history: &[Message],
    ) -> Option<String> {
        let base_prompt = self.prompts.system_prompt().await;
        let system_prompt = prompts::retry_system_prompt(&base_prompt, rejected_reply, feedback);

        let conversation = match Conversation::for_turn(&system_prompt, history, message) {
            Ok(conversation) => conversation,
            Err(e) => {
                tracing::warn!(error = %e, "Could not build retry request");
                return None;
            }
        };

        tracing::debug!(
            feedback = %excerpt(feedback, LOG_EXCERPT_CHARS),
            "Regenerating reply"
        );

        match self.client.complete_text(&conversation).await {
            CompletionOutcome::Completed(reply) => Some(reply),
            CompletionOutcome::Failed(failure) => {
                tracing::warn!(error = %failure, "Retry generation failed");
                None
            }
        }
    }

    fn text_reply(content: String) -> Option<String> {
        if content.trim().is_empty() {
            None
        } else {
            Some(content)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::tests::ScriptedProvider;
    use crate::evaluator::tests::prompt_builder;
    use crate::providers::{
        CompletionConfig, CompletionResponse, LlmProvider, ProviderError, ToolDefinition,
    };
    use crate::tools::{Notification, RecordingToolSink, RECORD_UNKNOWN_QUESTION};
    use async_trait::async_trait;
    use doppel_core::{CompletionRetryConfig, Role, ToolCall};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    /// Replays full responses and records what it was sent.
    struct ToolCallingProvider {
        responses: Mutex<VecDeque<CompletionResponse>>,
        calls: Mutex<Vec<(Vec<Message>, usize)>>,
    }

    impl ToolCallingProvider {
        fn new(responses: Vec<CompletionResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ToolCallingProvider {
        async fn complete(
            &self,
            messages: &[Message],
            tools: &[ToolDefinition],
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.lock().push((messages.to_vec(), tools.len()));
            self.responses
                .lock()
                .pop_front()
                .ok_or_else(|| ProviderError::HttpError("no more responses".to_string()))
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "tool-calling"
        }
    }

    fn question_call(id: &str) -> CompletionResponse {
        CompletionResponse {
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: RECORD_UNKNOWN_QUESTION.to_string(),
                arguments: r#"{"question": "Favourite colour?"}"#.to_string(),
            }],
            ..CompletionResponse::default()
        }
    }

    fn client(provider: Arc<dyn LlmProvider>) -> CompletionClient {
        CompletionClient::new(provider, CompletionConfig::default()).with_retry(
            CompletionRetryConfig {
                max_attempts: 2,
                backoff_unit: Duration::from_millis(10),
            },
        )
    }

    #[tokio::test]
    async fn test_generate_plain_reply() {
        let provider = ScriptedProvider::new(vec![Some("Hello, I'm Ada.")]);
        let generator = ReplyGenerator::new(client(provider.clone()), prompt_builder());

        let reply = generator
            .generate("Who are you?", &[Message::user("hi"), Message::assistant("hey")])
            .await
            .unwrap();

        assert_eq!(reply.as_deref(), Some("Hello, I'm Ada."));
        let sent = &provider.calls.lock()[0];
        assert_eq!(sent.len(), 4);
        assert!(sent[0].content.starts_with("You are acting as Ada."));
        assert_eq!(sent[3].content, "Who are you?");
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_failure_is_none() {
        let provider = ScriptedProvider::new(vec![None, None]);
        let generator = ReplyGenerator::new(client(provider), prompt_builder());
        assert_eq!(generator.generate("hi", &[]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tool_calls_are_routed_and_answered() {
        let provider = ToolCallingProvider::new(vec![
            question_call("call-1"),
            CompletionResponse::text("I'm not sure, I've noted the question."),
        ]);
        let sink = Arc::new(RecordingToolSink::default());
        let generator = ReplyGenerator::new(client(provider.clone()), prompt_builder())
            .with_tools(ToolRouter::new(sink.clone()));

        let reply = generator.generate("Favourite colour?", &[]).await.unwrap();

        assert_eq!(reply.as_deref(), Some("I'm not sure, I've noted the question."));
        assert!(matches!(
            sink.notifications().as_slice(),
            [Notification::UnknownQuestion { .. }]
        ));

        let calls = provider.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, 2);
        let second = &calls[1].0;
        assert_eq!(second[2].role, Role::Assistant);
        assert!(second[2].has_tool_calls());
        assert_eq!(second[3].role, Role::Tool);
        assert_eq!(second[3].tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(second[3].content, r#"{"recorded":"ok"}"#);
    }

    #[tokio::test]
    async fn test_tool_rounds_are_bounded() {
        let provider = ToolCallingProvider::new(vec![
            question_call("a"),
            question_call("b"),
            question_call("c"),
        ]);
        let sink = Arc::new(RecordingToolSink::default());
        let generator = ReplyGenerator::new(client(provider.clone()), prompt_builder())
            .with_tools(ToolRouter::new(sink.clone()))
            .with_max_tool_rounds(2);

        let reply = generator.generate("?", &[]).await.unwrap();

        assert_eq!(reply, None);
        assert_eq!(provider.calls.lock().len(), 3);
        assert_eq!(sink.notifications().len(), 2);
    }

    #[tokio::test]
    async fn test_regenerate_uses_retry_prompt_without_tools() {
        let provider = ToolCallingProvider::new(vec![CompletionResponse::text("Good day.")]);
        let generator = ReplyGenerator::new(client(provider.clone()), prompt_builder())
            .with_tools(ToolRouter::new(Arc::new(RecordingToolSink::default())));

        let reply = generator
            .regenerate("yo", "too informal", "hello?", &[])
            .await;

        assert_eq!(reply.as_deref(), Some("Good day."));
        let calls = provider.calls.lock();
        assert_eq!(calls[0].1, 0);
        let system = &calls[0].0[0].content;
        assert!(system.contains("## Your attempted answer:\nyo"));
        assert!(system.contains("## Reason for rejection:\ntoo informal"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_regenerate_failure_is_none() {
        let provider = ScriptedProvider::new(vec![Some(""), Some("")]);
        let generator = ReplyGenerator::new(client(provider), prompt_builder());
        assert_eq!(generator.regenerate("r", "f", "m", &[]).await, None);
    }
}
