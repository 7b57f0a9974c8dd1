//! Evaluator verdicts.
//!
//! A verdict is produced once per evaluation call and never mutated.
//! On the wire the flag is called `is_acceptable`.

mod parser;
pub mod schema;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use parser::{parse_verdict, verdict_from_value};
pub use schema::{is_valid_verdict, validate_verdict_schema, VERDICT_SCHEMA_JSON};

/// Errors turning evaluator output into a verdict.
#[derive(Error, Debug)]
pub enum VerdictError {
    #[error("Evaluator returned no content")]
    Empty,

    #[error("Evaluator output is not JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Evaluator output does not match the verdict schema: {}", .0.join("; "))]
    Schema(Vec<String>),
}

/// Judgment of one candidate reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the reply can be sent as-is.
    #[serde(rename = "is_acceptable")]
    pub acceptable: bool,

    /// Reasoning, used to steer regeneration when rejected.
    #[serde(default)]
    pub feedback: String,
}

impl Verdict {
    pub fn accept(feedback: impl Into<String>) -> Self {
        Self {
            acceptable: true,
            feedback: feedback.into(),
        }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            acceptable: false,
            feedback: feedback.into(),
        }
    }

    /// Parse raw evaluator output (fences and surrounding prose tolerated).
    pub fn parse(text: &str) -> Result<Self, VerdictError> {
        parse_verdict(text)
    }

    /// Schema-check and deserialize an already-parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, VerdictError> {
        verdict_from_value(value)
    }

    /// Feedback, or `None` when it is blank.
    pub fn feedback(&self) -> Option<&str> {
        let trimmed = self.feedback.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// 1.0 for acceptable, 0.0 otherwise.
    pub fn score(&self) -> f64 {
        if self.acceptable {
            1.0
        } else {
            0.0
        }
    }
}
