//! Regeneration of rejected replies.
//!
//! A retry session starts from a rejected reply and the evaluator's feedback
//! and runs one of the [`StrategyKind`] strategies:
//!
//! ```text
//! INITIAL --begin_round--> ATTEMPTING --accepted--> ACCEPTED
//!                              |
//!                              +--rounds spent-----> EXHAUSTED
//! ```
//!
//! Every generated reply is kept in the session trace next to its verdict.
//! The session ends in a [`RetryOutcome`], which is never mutated afterwards.

mod engine;
mod policy;
mod strategy;

use std::time::Duration;

use chrono::{DateTime, Utc};
use doppel_core::{Message, StrategyKind, Verdict};
use serde::Serialize;

pub use engine::RetryEngine;
pub use policy::SharedRetryPolicy;
pub use strategy::{
    strategy_for, BestOfNStrategy, ProgressiveStrategy, RetryContext, RetryStrategy,
    SingleStrategy,
};

/// Where a retry session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    Initial,
    Attempting,
    Accepted,
    Exhausted,
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryState::Accepted | RetryState::Exhausted)
    }
}

/// Input of a retry session.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRequest {
    pub original_reply: String,
    pub user_message: String,
    pub history: Vec<Message>,
    pub feedback: String,
}

impl RetryRequest {
    pub fn new(
        original_reply: impl Into<String>,
        user_message: impl Into<String>,
        history: Vec<Message>,
        feedback: impl Into<String>,
    ) -> Self {
        Self {
            original_reply: original_reply.into(),
            user_message: user_message.into(),
            history,
            feedback: feedback.into(),
        }
    }
}

/// One reply in the session trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// 0 for the original reply, then the round that produced it.
    pub round: u32,

    pub reply: String,

    /// `None` when evaluation failed.
    pub verdict: Option<Verdict>,

    pub generated_at: DateTime<Utc>,
}

/// Mutable state of one retry invocation.
#[derive(Debug)]
pub struct RetrySession {
    strategy: StrategyKind,
    state: RetryState,
    attempts: Vec<AttemptRecord>,
    rounds: u32,
    started_at: DateTime<Utc>,
    clock: tokio::time::Instant,
}

impl RetrySession {
    /// Session seeded with the rejected reply as its first record.
    pub fn new(strategy: StrategyKind, original_reply: &str, feedback: &str) -> Self {
        let started_at = Utc::now();
        Self {
            strategy,
            state: RetryState::Initial,
            attempts: vec![AttemptRecord {
                round: 0,
                reply: original_reply.to_string(),
                verdict: Some(Verdict::reject(feedback)),
                generated_at: started_at,
            }],
            rounds: 0,
            started_at,
            clock: tokio::time::Instant::now(),
        }
    }

    /// Start the next round and return its 1-based number.
    pub fn begin_round(&mut self) -> u32 {
        self.state = RetryState::Attempting;
        self.rounds += 1;
        self.rounds
    }

    pub fn record(&mut self, round: u32, reply: impl Into<String>, verdict: Option<Verdict>) {
        self.attempts.push(AttemptRecord {
            round,
            reply: reply.into(),
            verdict,
            generated_at: Utc::now(),
        });
    }

    /// Most recent reply in the trace, the original one included.
    pub fn latest_reply(&self) -> &str {
        self.attempts
            .last()
            .map(|record| record.reply.as_str())
            .unwrap_or_default()
    }

    /// Most recent reply produced by a round.
    pub fn latest_generated(&self) -> Option<&str> {
        self.attempts
            .iter()
            .skip(1)
            .last()
            .map(|record| record.reply.as_str())
    }

    pub fn original_reply(&self) -> &str {
        &self.attempts[0].reply
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Close the session. Success is decided by `final_verdict`.
    pub fn finish(
        mut self,
        final_reply: impl Into<String>,
        final_verdict: Option<Verdict>,
        attempts_made: u32,
    ) -> RetryOutcome {
        let success = final_verdict.as_ref().is_some_and(|v| v.acceptable);
        self.state = if success {
            RetryState::Accepted
        } else {
            RetryState::Exhausted
        };

        RetryOutcome {
            final_reply: final_reply.into(),
            success,
            attempts_made,
            final_verdict,
            attempts: self.attempts,
            elapsed: self.clock.elapsed(),
            started_at: self.started_at,
            strategy: self.strategy,
            state: self.state,
        }
    }
}

/// Final result of a retry session.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    pub final_reply: String,
    pub success: bool,
    pub attempts_made: u32,
    pub final_verdict: Option<Verdict>,

    /// Original reply followed by every generated reply, in order.
    pub attempts: Vec<AttemptRecord>,

    pub elapsed: Duration,
    pub started_at: DateTime<Utc>,
    pub strategy: StrategyKind,
    pub state: RetryState,
}

impl RetryOutcome {
    pub fn metrics(&self) -> RetryMetrics {
        let seconds = self.elapsed.as_secs_f64();
        RetryMetrics {
            success_rate: if self.success { 1.0 } else { 0.0 },
            attempts_made: self.attempts_made,
            execution_time_seconds: seconds,
            time_per_attempt: seconds / f64::from(self.attempts_made.max(1)),
            total_responses_generated: self.attempts.len(),
            final_evaluation_score: self.final_verdict.as_ref().map_or(0.0, Verdict::score),
            has_feedback: self
                .final_verdict
                .as_ref()
                .is_some_and(|v| v.feedback().is_some()),
        }
    }
}

/// Summary numbers for logging and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryMetrics {
    pub success_rate: f64,
    pub attempts_made: u32,
    pub execution_time_seconds: f64,
    pub time_per_attempt: f64,
    /// Trace length, the original reply included.
    pub total_responses_generated: usize,
    pub final_evaluation_score: f64,
    pub has_feedback: bool,
}
