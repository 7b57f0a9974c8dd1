//! Extraction of a verdict object from raw evaluator output.
//!
//! Models asked for JSON still wrap it in markdown fences or surround it
//! with a sentence now and then. Extraction order:
//! 1. the whole trimmed text
//! 2. the body of a ```json fence
//! 3. the outermost `{ ... }` span

use lazy_static::lazy_static;
use regex::Regex;

use super::{schema::validate_verdict_schema, Verdict, VerdictError};

lazy_static! {
    /// A fenced code block, optionally tagged `json`.
    static ref CODE_FENCE: Regex =
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").unwrap();
}

/// Candidate JSON payloads in the order they should be tried.
fn candidates(text: &str) -> Vec<&str> {
    let trimmed = text.trim();
    let mut out = vec![trimmed];

    if let Some(body) = CODE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        out.push(body.as_str());
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            out.push(&trimmed[start..=end]);
        }
    }

    out
}

/// Parse evaluator output into a [`Verdict`].
pub fn parse_verdict(text: &str) -> Result<Verdict, VerdictError> {
    if text.trim().is_empty() {
        return Err(VerdictError::Empty);
    }

    let mut first_error = None;
    let value = candidates(text)
        .into_iter()
        .find_map(|candidate| match serde_json::from_str::<serde_json::Value>(candidate) {
            Ok(value) => Some(value),
            Err(e) => {
                first_error.get_or_insert(e);
                None
            }
        });

    let value = match (value, first_error) {
        (Some(value), _) => value,
        (None, Some(e)) => return Err(VerdictError::Json(e)),
        (None, None) => return Err(VerdictError::Empty),
    };

    Verdict::from_value(value)
}

/// Validate a JSON value against the schema, then deserialize it.
pub fn verdict_from_value(value: serde_json::Value) -> Result<Verdict, VerdictError> {
    validate_verdict_schema(&value).map_err(VerdictError::Schema)?;
    Ok(serde_json::from_value(value)?)
}
