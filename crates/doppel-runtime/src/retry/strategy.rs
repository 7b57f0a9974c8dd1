//! Retry strategies.
//!
//! Each strategy drives one [`RetrySession`] to a terminal state. They differ
//! only in how rounds are chained:
//! - [`SingleStrategy`]: one round
//! - [`ProgressiveStrategy`]: a chain, each round seeded by the latest reply
//!   and feedback (also used for `multiple`)
//! - [`BestOfNStrategy`]: siblings, all seeded by the original reply and
//!   feedback

use async_trait::async_trait;
use doppel_core::{excerpt, StrategyKind, Verdict, LOG_EXCERPT_CHARS};

use super::{RetryOutcome, RetryRequest, RetrySession, SharedRetryPolicy};
use crate::evaluator::{choose_first_acceptable, Evaluator};
use crate::generation::ReplyGenerator;

/// Collaborators a strategy works with.
#[derive(Clone, Copy)]
pub struct RetryContext<'a> {
    pub generator: &'a ReplyGenerator,
    pub evaluator: &'a Evaluator,
    pub policy: &'a SharedRetryPolicy,
}

impl RetryContext<'_> {
    async fn regenerate(&self, request: &RetryRequest, rejected: &str, feedback: &str) -> Option<String> {
        self.generator
            .regenerate(rejected, feedback, &request.user_message, &request.history)
            .await
    }

    async fn evaluate(&self, request: &RetryRequest, reply: &str) -> Option<Verdict> {
        self.evaluator
            .evaluate(reply, &request.user_message, &request.history)
            .await
    }
}

/// One way of spending regeneration rounds.
#[async_trait]
pub trait RetryStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn run(&self, ctx: RetryContext<'_>, request: &RetryRequest) -> RetryOutcome;
}

/// Strategy implementing `kind`. `best_of_n` is the candidate count for
/// [`StrategyKind::BestOfN`].
pub fn strategy_for(kind: StrategyKind, best_of_n: usize) -> Box<dyn RetryStrategy> {
    match kind {
        StrategyKind::Single => Box::new(SingleStrategy),
        StrategyKind::Multiple | StrategyKind::Progressive => {
            Box::new(ProgressiveStrategy { kind })
        }
        StrategyKind::BestOfN => Box::new(BestOfNStrategy { n: best_of_n }),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SingleStrategy;

#[async_trait]
impl RetryStrategy for SingleStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Single
    }

    async fn run(&self, ctx: RetryContext<'_>, request: &RetryRequest) -> RetryOutcome {
        let mut session = RetrySession::new(self.kind(), &request.original_reply, &request.feedback);
        let round = session.begin_round();

        let Some(reply) = ctx
            .regenerate(request, &request.original_reply, &request.feedback)
            .await
        else {
            tracing::warn!(strategy = %self.kind(), "Retry produced no reply");
            return session.finish(request.original_reply.clone(), None, 1);
        };

        let verdict = ctx.evaluate(request, &reply).await;
        session.record(round, reply.clone(), verdict.clone());
        session.finish(reply, verdict, 1)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressiveStrategy {
    kind: StrategyKind,
}

impl ProgressiveStrategy {
    pub fn new() -> Self {
        Self {
            kind: StrategyKind::Progressive,
        }
    }

    /// Same loop, reported as `multiple`.
    pub fn multiple() -> Self {
        Self {
            kind: StrategyKind::Multiple,
        }
    }
}

impl Default for ProgressiveStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RetryStrategy for ProgressiveStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn run(&self, ctx: RetryContext<'_>, request: &RetryRequest) -> RetryOutcome {
        let mut session = RetrySession::new(self.kind, &request.original_reply, &request.feedback);
        let max_attempts = ctx.policy.max_attempts();
        let mut feedback = request.feedback.clone();
        let mut last_verdict = None;

        while session.rounds() < max_attempts {
            let round = session.begin_round();
            tracing::debug!(strategy = %self.kind, round, max_attempts, "Retry round");

            let latest = session.latest_reply().to_string();
            let Some(reply) = ctx.regenerate(request, &latest, &feedback).await else {
                tracing::warn!(round, "Retry round produced no reply");
                continue;
            };

            let verdict = ctx.evaluate(request, &reply).await;
            session.record(round, reply.clone(), verdict.clone());

            if verdict.as_ref().is_some_and(|v| v.acceptable) {
                tracing::info!(strategy = %self.kind, round, "Retry accepted");
                return session.finish(reply, verdict, round);
            }

            match verdict.as_ref().map(Verdict::feedback) {
                Some(Some(next)) => {
                    tracing::debug!(
                        round,
                        feedback = %excerpt(next, LOG_EXCERPT_CHARS),
                        "Feedback updated"
                    );
                    feedback = next.to_string();
                }
                Some(None) => {}
                None => tracing::warn!(round, "Retry round could not be evaluated"),
            }
            last_verdict = verdict;

            if round < max_attempts {
                let delay = ctx.policy.delay_for_round(round);
                tracing::debug!(
                    round,
                    delay_ms = delay.as_millis() as u64,
                    "Waiting before next retry round"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let final_reply = session
            .latest_generated()
            .unwrap_or(request.original_reply.as_str())
            .to_string();
        tracing::warn!(strategy = %self.kind, max_attempts, "Retry rounds exhausted");
        session.finish(final_reply, last_verdict, max_attempts)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BestOfNStrategy {
    pub n: usize,
}

#[async_trait]
impl RetryStrategy for BestOfNStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BestOfN
    }

    async fn run(&self, ctx: RetryContext<'_>, request: &RetryRequest) -> RetryOutcome {
        let mut session = RetrySession::new(self.kind(), &request.original_reply, &request.feedback);
        let mut rounds = Vec::with_capacity(self.n);
        let mut candidates = Vec::with_capacity(self.n);

        for _ in 0..self.n {
            let round = session.begin_round();
            match ctx
                .regenerate(request, &request.original_reply, &request.feedback)
                .await
            {
                Some(reply) => {
                    rounds.push(round);
                    candidates.push(reply);
                }
                None => tracing::warn!(round, "Candidate generation failed"),
            }
        }

        if candidates.is_empty() {
            tracing::warn!(n = self.n, "No candidates generated");
            return session.finish(request.original_reply.clone(), None, 0);
        }

        let verdicts = ctx
            .evaluator
            .evaluate_many(&candidates, &request.user_message, &request.history)
            .await;
        for ((round, reply), verdict) in rounds.iter().zip(&candidates).zip(&verdicts) {
            session.record(*round, reply.clone(), verdict.clone());
        }

        let generated = candidates.len() as u32;
        match choose_first_acceptable(&candidates, &verdicts) {
            Some(selection) => {
                if selection.is_acceptable() {
                    tracing::info!(index = selection.index, generated, "Acceptable candidate found");
                } else {
                    tracing::warn!(generated, "No acceptable candidate");
                }
                session.finish(selection.reply, selection.verdict, generated)
            }
            None => session.finish(request.original_reply.clone(), None, generated),
        }
    }
}
