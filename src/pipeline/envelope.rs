//! Response envelopes: pull the model's text payload out of an HTTP body.
//!
//! Two envelope families are recognised:
//!
//! | Shape | Path to payload |
//! |-------|-----------------|
//! | Chat completion | `choices[0].message.content`, legacy `choices[0].text` |
//! | Candidates | `candidates[0].content.parts[*].text`, legacy `candidates[0].text` |
//!
//! A body that is not JSON, or JSON in neither shape, is handed on verbatim.
//! Whatever comes out is then unwrapped from a fenced code block if it has
//! one.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which envelope the payload was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeShape {
    ChatCompletion,
    Candidates,
    /// No envelope matched; the body itself is the payload.
    Raw,
}

/// Extract the payload text from a response body and strip any code fence.
pub fn extract_payload(body: &str) -> (String, EnvelopeShape) {
    let (text, shape) = match serde_json::from_str::<Value>(body) {
        Ok(json) => match unwrap_envelope(&json) {
            Some(found) => found,
            None => (body.to_string(), EnvelopeShape::Raw),
        },
        Err(_) => (body.to_string(), EnvelopeShape::Raw),
    };
    (strip_code_fence(&text), shape)
}

fn unwrap_envelope(json: &Value) -> Option<(String, EnvelopeShape)> {
    if let Some(choice) = json.get("choices").and_then(|c| c.get(0)) {
        let text = choice
            .pointer("/message/content")
            .and_then(Value::as_str)
            .or_else(|| choice.get("text").and_then(Value::as_str));
        if let Some(t) = text {
            return Some((t.to_string(), EnvelopeShape::ChatCompletion));
        }
    }

    if let Some(candidate) = json.get("candidates").and_then(|c| c.get(0)) {
        if let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) {
            let joined: String = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            if !joined.is_empty() {
                return Some((joined, EnvelopeShape::Candidates));
            }
        }
        if let Some(t) = candidate.get("text").and_then(Value::as_str) {
            return Some((t.to_string(), EnvelopeShape::Candidates));
        }
    }

    None
}

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json|JSON)?[ \t]*\n?([\s\S]*?)```").unwrap());

static RE_OPEN_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*```(?:json|JSON)?[ \t]*\n?").unwrap());

/// Unwrap the first fenced block, wherever it sits in the text.
///
/// A truncated response may open a fence and never close it; the opening
/// marker is dropped so the recovery chain sees bare JSON.
pub fn strip_code_fence(text: &str) -> String {
    if let Some(caps) = RE_FENCED.captures(text) {
        return caps[1].trim().to_string();
    }
    if RE_OPEN_FENCE.is_match(text) {
        return RE_OPEN_FENCE.replace(text, "").trim().to_string();
    }
    text.trim().to_string()
}
