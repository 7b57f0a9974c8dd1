//! JSON Schema validation for verdicts.
//!
//! Evaluator output is checked against schema/verdict.schema.json before it
//! is deserialized, so a model that drops a field or returns
//! `"is_acceptable": "yes"` is reported with a precise path.

use std::sync::OnceLock;

/// Embedded verdict schema (loaded at compile time).
pub const VERDICT_SCHEMA_JSON: &str = include_str!("../../schema/verdict.schema.json");

static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

fn get_validator() -> Result<&'static jsonschema::Validator, String> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(VERDICT_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result.as_ref().map_err(Clone::clone)
}

/// Validate a verdict JSON value against the schema.
///
/// Returns every violation as `"<message> at <path>"`.
pub fn validate_verdict_schema(value: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e])?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn is_valid_verdict(value: &serde_json::Value) -> bool {
    get_validator()
        .map(|v| v.is_valid(value))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_verdict_passes_schema() {
        let value = json!({"is_acceptable": true, "feedback": "Clear and on-topic."});
        assert!(validate_verdict_schema(&value).is_ok());
        assert!(is_valid_verdict(&value));
    }

    #[test]
    fn test_missing_feedback_fails() {
        let errors = validate_verdict_schema(&json!({"is_acceptable": false})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("feedback"));
    }

    #[test]
    fn test_string_flag_fails() {
        let value = json!({"is_acceptable": "yes", "feedback": ""});
        let errors = validate_verdict_schema(&value).unwrap_err();
        assert!(errors[0].contains("/is_acceptable"));
    }

    #[test]
    fn test_extra_fields_allowed() {
        let value = json!({"is_acceptable": true, "feedback": "", "score": 9});
        assert!(is_valid_verdict(&value));
    }

    #[test]
    fn test_schema_is_valid_json() {
        let parsed: Result<serde_json::Value, _> = serde_json::from_str(VERDICT_SCHEMA_JSON);
        assert!(parsed.is_ok());
    }
}
