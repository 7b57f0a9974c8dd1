//! Entry point for retry sessions.
//!
//! Picks the strategy for each call and logs the outcome metrics.

use std::sync::Arc;

use doppel_core::StrategyKind;

use super::{strategy_for, RetryContext, RetryOutcome, RetryRequest, SharedRetryPolicy};
use crate::evaluator::Evaluator;
use crate::generation::ReplyGenerator;

/// Default candidate count for best-of-n.
pub const DEFAULT_BEST_OF_N: usize = 3;

/// Runs retry sessions against a generator and an evaluator.
pub struct RetryEngine {
    generator: Arc<ReplyGenerator>,
    evaluator: Arc<Evaluator>,
    policy: SharedRetryPolicy,
    best_of_n: usize,
}

impl RetryEngine {
    pub fn new(
        generator: Arc<ReplyGenerator>,
        evaluator: Arc<Evaluator>,
        policy: SharedRetryPolicy,
    ) -> Self {
        Self {
            generator,
            evaluator,
            policy,
            best_of_n: DEFAULT_BEST_OF_N,
        }
    }

    pub fn with_best_of_n(mut self, n: usize) -> Self {
        self.best_of_n = n;
        self
    }

    pub fn policy(&self) -> &SharedRetryPolicy {
        &self.policy
    }

    pub fn best_of_n(&self) -> usize {
        self.best_of_n
    }

    /// Run one session with the given strategy.
    pub async fn retry(&self, request: &RetryRequest, kind: StrategyKind) -> RetryOutcome {
        let strategy = strategy_for(kind, self.best_of_n);
        tracing::info!(strategy = %kind, "Starting retry");

        let ctx = RetryContext {
            generator: &self.generator,
            evaluator: &self.evaluator,
            policy: &self.policy,
        };
        let outcome = strategy.run(ctx, request).await;

        let metrics = outcome.metrics();
        tracing::info!(
            strategy = %kind,
            success = outcome.success,
            attempts_made = metrics.attempts_made,
            responses = metrics.total_responses_generated,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Retry finished"
        );

        outcome
    }
}
