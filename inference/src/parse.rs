//! Turning raw model text into a normalized [`InferenceResult`].
//!
//! Parsing is two-stage: the text is first parsed as JSON directly; if that
//! fails, the span from the first `{` to the last `}` is parsed instead. This
//! recovers answers wrapped in prose or code fences and nothing more.
//!
//! Normalization then enforces the result invariants field by field. Only
//! `risk` is required; every other field has a safe default.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use prism_types::{
    DEFAULT_REASON, DEFAULT_SUMMARY, Impact, InferenceResult, NonEmptyStaticStr, NonEmptyString,
    Percent,
};

use crate::InferenceError;

fn json_span() -> &'static Regex {
    static JSON_SPAN: OnceLock<Regex> = OnceLock::new();
    JSON_SPAN.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid JSON span regex"))
}

/// Parse model text as JSON, falling back to the outermost `{...}` span.
pub(crate) fn parse_model_json(text: &str) -> Result<Value, InferenceError> {
    let direct_err = match serde_json::from_str::<Value>(text) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let Some(span) = json_span().find(text) else {
        return Err(InferenceError::Parse(format!(
            "no JSON object found ({direct_err})"
        )));
    };

    serde_json::from_str(span.as_str())
        .map_err(|e| InferenceError::Parse(format!("embedded JSON is invalid ({e})")))
}

/// Enforce the result invariants on a parsed model answer.
pub(crate) fn normalize(value: &Value) -> Result<InferenceResult, InferenceError> {
    let Some(object) = value.as_object() else {
        return Err(InferenceError::Validation(format!(
            "expected a JSON object, got {}",
            json_type_name(value)
        )));
    };

    let risk = object
        .get("risk")
        .and_then(Value::as_f64)
        .and_then(Percent::from_score)
        .ok_or_else(|| InferenceError::Validation("risk is missing or not a number".into()))?;

    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .and_then(Percent::from_score)
        .unwrap_or(Percent::MIDPOINT);

    let impact = object
        .get("impact")
        .and_then(Value::as_str)
        .and_then(Impact::parse)
        .unwrap_or_default();

    let summary = text_or(object, "summary", DEFAULT_SUMMARY);
    let reason = text_or(object, "reason", DEFAULT_REASON);

    let suggested_tests = object
        .get("suggestedTests")
        .or_else(|| object.get("suggested_tests"))
        .and_then(string_array)
        .unwrap_or_default();

    Ok(InferenceResult::new(
        risk,
        confidence,
        impact,
        summary,
        reason,
        suggested_tests,
    ))
}

fn text_or(object: &Map<String, Value>, key: &str, default: NonEmptyStaticStr) -> NonEmptyString {
    object
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| NonEmptyString::new(s).ok())
        .unwrap_or_else(|| default.into())
}

/// `Some` only if every element is a string.
fn string_array(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
