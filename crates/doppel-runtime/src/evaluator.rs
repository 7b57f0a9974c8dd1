//! Reply evaluator.
//!
//! Sends a candidate reply, the message that triggered it and the prior
//! history to the evaluation provider and reads back a [`Verdict`].
//!
//! `None` means the evaluator could not judge (provider exhausted or output
//! never parsed); it is not the same as a rejection.

use doppel_core::{excerpt, Conversation, Message, Verdict, LOG_EXCERPT_CHARS};

use crate::completion::{CompletionClient, CompletionOutcome};
use crate::prompts::{self, PromptBuilder};

/// The candidate picked by [`Evaluator::select_best`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Position in the candidate list.
    pub index: usize,

    pub reply: String,

    pub verdict: Option<Verdict>,
}

impl Selection {
    pub fn is_acceptable(&self) -> bool {
        self.verdict.as_ref().is_some_and(|v| v.acceptable)
    }
}

/// First acceptable candidate in order, else the first candidate.
///
/// `verdicts[i]` belongs to `replies[i]`. Returns `None` for an empty list.
pub fn choose_first_acceptable(replies: &[String], verdicts: &[Option<Verdict>]) -> Option<Selection> {
    let pick = |index: usize| Selection {
        index,
        reply: replies[index].clone(),
        verdict: verdicts.get(index).cloned().flatten(),
    };

    if replies.is_empty() {
        return None;
    }

    let accepted = verdicts
        .iter()
        .take(replies.len())
        .position(|v| v.as_ref().is_some_and(|v| v.acceptable));

    Some(pick(accepted.unwrap_or(0)))
}

pub struct Evaluator {
    client: CompletionClient,
    prompts: PromptBuilder,
}

impl Evaluator {
    /// The client is switched to JSON-object output.
    pub fn new(client: CompletionClient, prompts: PromptBuilder) -> Self {
        let config = client.config().clone().json_object();
        Self {
            client: client.with_config(config),
            prompts,
        }
    }

    pub fn client(&self) -> &CompletionClient {
        &self.client
    }

    pub async fn evaluate(&self, reply: &str, message: &str, history: &[Message]) -> Option<Verdict> {
        let system_prompt = self.prompts.evaluator_system_prompt().await;
        self.evaluate_with_prompt(&system_prompt, reply, message, history)
            .await
    }

    /// Evaluate with a caller-supplied evaluator system prompt.
    pub async fn evaluate_with_prompt(
        &self,
        system_prompt: &str,
        reply: &str,
        message: &str,
        history: &[Message],
    ) -> Option<Verdict> {
        let user_prompt = prompts::evaluator_user_prompt(reply, message, history);
        let conversation = match Conversation::for_turn(system_prompt, &[], &user_prompt) {
            Ok(conversation) => conversation,
            Err(e) => {
                tracing::warn!(error = %e, "Could not build evaluation request");
                return None;
            }
        };

        match self.client.complete_structured(&conversation, Verdict::parse).await {
            CompletionOutcome::Completed(verdict) => {
                tracing::info!(
                    acceptable = verdict.acceptable,
                    reply = %excerpt(reply, LOG_EXCERPT_CHARS),
                    feedback = %excerpt(&verdict.feedback, LOG_EXCERPT_CHARS),
                    "Reply evaluated"
                );
                Some(verdict)
            }
            CompletionOutcome::Failed(failure) => {
                tracing::warn!(
                    error = %failure,
                    reply = %excerpt(reply, LOG_EXCERPT_CHARS),
                    "Evaluation produced no verdict"
                );
                None
            }
        }
    }

    /// Evaluate each reply in order, one call at a time.
    pub async fn evaluate_many(
        &self,
        replies: &[String],
        message: &str,
        history: &[Message],
    ) -> Vec<Option<Verdict>> {
        if replies.is_empty() {
            return Vec::new();
        }

        let system_prompt = self.prompts.evaluator_system_prompt().await;
        let mut verdicts = Vec::with_capacity(replies.len());
        for reply in replies {
            verdicts.push(
                self.evaluate_with_prompt(&system_prompt, reply, message, history)
                    .await,
            );
        }
        verdicts
    }

    /// Evaluate all replies and pick the first acceptable one.
    ///
    /// When none is acceptable the first reply is returned with its verdict;
    /// check [`Selection::is_acceptable`] before trusting it.
    pub async fn select_best(
        &self,
        replies: &[String],
        message: &str,
        history: &[Message],
    ) -> Option<Selection> {
        let verdicts = self.evaluate_many(replies, message, history).await;
        choose_first_acceptable(replies, &verdicts)
    }

    /// `true` only for an explicit acceptable verdict.
    pub async fn is_acceptable(&self, reply: &str, message: &str, history: &[Message]) -> bool {
        self.evaluate(reply, message, history)
            .await
            .is_some_and(|v| v.acceptable)
    }

    /// Feedback text, `None` when unavailable or blank.
    pub async fn feedback(&self, reply: &str, message: &str, history: &[Message]) -> Option<String> {
        self.evaluate(reply, message, history)
            .await
            .and_then(|v| v.feedback().map(str::to_string))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::completion::tests::ScriptedProvider;
    use crate::persona::CachedPersonaSource;
    use crate::providers::{CompletionConfig, ResponseFormat};
    use doppel_core::{CompletionRetryConfig, PersonaProfile, StaticPersona};
    use std::sync::Arc;
    use std::time::Duration;

    pub(crate) fn prompt_builder() -> PromptBuilder {
        let persona = StaticPersona::new(PersonaProfile::new("Ada", "Mathematician", "Engines"));
        PromptBuilder::new(Arc::new(CachedPersonaSource::new(
            Arc::new(persona),
            Duration::from_secs(60),
        )))
    }

    pub(crate) fn verdict_json(acceptable: bool, feedback: &str) -> String {
        serde_json::to_string(&Verdict {
            acceptable,
            feedback: feedback.to_string(),
        })
        .unwrap()
    }

    fn evaluator(provider: Arc<ScriptedProvider>, attempts: u32) -> Evaluator {
        let client = CompletionClient::new(provider, CompletionConfig::default()).with_retry(
            CompletionRetryConfig {
                max_attempts: attempts,
                backoff_unit: Duration::from_millis(10),
            },
        );
        Evaluator::new(client, prompt_builder())
    }

    fn replies(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_choose_empty() {
        assert_eq!(choose_first_acceptable(&[], &[]), None);
    }

    #[test]
    fn test_choose_first_acceptable_by_order() {
        let replies = replies(&["a", "b", "c"]);
        let verdicts = vec![
            Some(Verdict::reject("no")),
            Some(Verdict::accept("yes")),
            Some(Verdict::accept("also yes")),
        ];
        let selection = choose_first_acceptable(&replies, &verdicts).unwrap();
        assert_eq!(selection.index, 1);
        assert_eq!(selection.reply, "b");
        assert!(selection.is_acceptable());
    }

    #[test]
    fn test_choose_falls_back_to_first() {
        let replies = replies(&["a", "b"]);
        let verdicts = vec![None, Some(Verdict::reject("no"))];
        let selection = choose_first_acceptable(&replies, &verdicts).unwrap();
        assert_eq!(selection.index, 0);
        assert_eq!(selection.verdict, None);
        assert!(!selection.is_acceptable());
    }

    #[tokio::test]
    async fn test_evaluate_parses_verdict() {
        let provider = ScriptedProvider::new(vec![Some(&verdict_json(false, "too informal"))]);
        let verdict = evaluator(provider.clone(), 3)
            .evaluate("yo", "hello?", &[Message::user("hi"), Message::assistant("hey")])
            .await
            .unwrap();

        assert!(!verdict.acceptable);
        assert_eq!(verdict.feedback, "too informal");

        let sent = provider.calls.lock()[0].clone();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].content.contains("playing the role of Ada"));
        assert!(sent[1].content.contains("User: hi\nAgent: hey"));
        assert!(sent[1].content.contains("latest response from the Agent:\n\nyo"));
    }

    #[tokio::test]
    async fn test_evaluator_requests_json_output() {
        let provider = ScriptedProvider::new(vec![]);
        let evaluator = evaluator(provider, 1);
        assert_eq!(evaluator.client().config().response_format, ResponseFormat::JsonObject);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_output_is_none_not_rejection() {
        let provider = ScriptedProvider::new(vec![Some("looks fine"), Some("{\"ok\": 1}")]);
        let verdict = evaluator(provider.clone(), 2).evaluate("r", "m", &[]).await;
        assert_eq!(verdict, None);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_failure_is_none() {
        let provider = ScriptedProvider::new(vec![None, None]);
        let evaluator = evaluator(provider, 2);
        assert_eq!(evaluator.evaluate("r", "m", &[]).await, None);
    }

    #[tokio::test]
    async fn test_evaluate_is_idempotent_for_deterministic_provider() {
        let json = verdict_json(true, "good");
        let provider = ScriptedProvider::new(vec![Some(&json), Some(&json)]);
        let evaluator = evaluator(provider.clone(), 1);

        let first = evaluator.evaluate("r", "m", &[]).await;
        let second = evaluator.evaluate("r", "m", &[]).await;

        assert_eq!(first, second);
        let calls = provider.calls.lock();
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn test_evaluate_many_preserves_order() {
        let provider = ScriptedProvider::new(vec![
            Some(&verdict_json(false, "first")),
            Some("garbage"),
            Some(&verdict_json(true, "third")),
        ]);
        let verdicts = evaluator(provider, 1)
            .evaluate_many(&replies(&["1", "2", "3"]), "m", &[])
            .await;

        assert_eq!(verdicts.len(), 3);
        assert_eq!(verdicts[0].as_ref().unwrap().feedback, "first");
        assert!(verdicts[1].is_none());
        assert!(verdicts[2].as_ref().unwrap().acceptable);
    }

    #[tokio::test]
    async fn test_select_best_empty_makes_no_calls() {
        let provider = ScriptedProvider::new(vec![]);
        let selection = evaluator(provider.clone(), 1).select_best(&[], "m", &[]).await;
        assert_eq!(selection, None);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_helpers() {
        let provider = ScriptedProvider::new(vec![
            Some(&verdict_json(true, "")),
            Some(&verdict_json(false, "be formal")),
            Some(&verdict_json(true, "  ")),
        ]);
        let evaluator = evaluator(provider, 1);

        assert!(evaluator.is_acceptable("r", "m", &[]).await);
        assert_eq!(evaluator.feedback("r", "m", &[]).await.as_deref(), Some("be formal"));
        assert_eq!(evaluator.feedback("r", "m", &[]).await, None);
    }

    #[tokio::test]
    async fn test_custom_prompt() {
        let provider = ScriptedProvider::new(vec![Some(&verdict_json(true, ""))]);
        let evaluator = evaluator(provider.clone(), 1);
        evaluator
            .evaluate_with_prompt("Judge strictly.", "r", "m", &[])
            .await;
        assert_eq!(provider.calls.lock()[0][0].content, "Judge strictly.");
    }
}
