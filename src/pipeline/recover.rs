//! Best-effort recovery of question objects from unreliable model output.
//!
//! The model is asked for a strict JSON array but routinely answers with
//! prose around it, a truncated array, or JSON-ish text with broken quoting.
//! Recovery is an ordered chain of independent strategies behind one trait;
//! the first strategy that yields at least one object with a content-like
//! field wins.
//!
//! 1. [`DirectParse`]: the whole payload is JSON
//! 2. [`BracketSlice`]: first balanced `[...]` substring
//! 3. [`ObjectScan`]: every balanced `{...}` substring, parsed one by one
//! 4. [`ProximityScan`]: **heuristic and lossy**: regex-scan `"type"`,
//!    `"content"`, `"options"` pairs and stitch them together by distance

use crate::question::CandidateQuestion;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

/// One way of turning text into JSON objects.
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Objects found in `text`, or `None` when the strategy does not apply.
    fn try_parse(&self, text: &str) -> Option<Vec<Value>>;
}

/// Result of a successful recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub candidates: Vec<CandidateQuestion>,
    /// Name of the strategy that produced `candidates`.
    pub strategy: &'static str,
}

/// Ordered list of strategies.
pub struct RecoveryChain {
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl Default for RecoveryChain {
    fn default() -> Self {
        Self::new(vec![
            Box::new(DirectParse),
            Box::new(BracketSlice),
            Box::new(ObjectScan),
            Box::new(ProximityScan),
        ])
    }
}

impl RecoveryChain {
    pub fn new(strategies: Vec<Box<dyn RecoveryStrategy>>) -> Self {
        Self { strategies }
    }

    /// Run the chain. `None` means every strategy failed.
    ///
    /// A payload that is exactly an empty JSON array is a valid answer
    /// ("no questions in this window") and recovers to zero candidates.
    pub fn recover(&self, text: &str) -> Option<Recovered> {
        if is_empty_array(text) {
            return Some(Recovered {
                candidates: Vec::new(),
                strategy: "empty",
            });
        }
        for strategy in &self.strategies {
            let Some(values) = strategy.try_parse(text) else {
                continue;
            };
            let candidates: Vec<CandidateQuestion> =
                values.iter().filter_map(CandidateQuestion::from_json).collect();
            if !candidates.is_empty() {
                debug!(
                    "Recovered {} candidates via '{}' ({} objects seen)",
                    candidates.len(),
                    strategy.name(),
                    values.len()
                );
                return Some(Recovered {
                    candidates,
                    strategy: strategy.name(),
                });
            }
        }
        None
    }
}

fn is_empty_array(text: &str) -> bool {
    matches!(serde_json::from_str::<Value>(text.trim()), Ok(Value::Array(a)) if a.is_empty())
}

fn flatten(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("questions") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                obj.insert("questions".to_string(), other);
                vec![Value::Object(obj)]
            }
            None => vec![Value::Object(obj)],
        },
        _ => Vec::new(),
    }
}

// ── Strategy 1: Direct parse ─────────────────────────────────────────────────

/// The payload is already valid JSON (array, object, or `{"questions": [...]}`).
pub struct DirectParse;

impl RecoveryStrategy for DirectParse {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn try_parse(&self, text: &str) -> Option<Vec<Value>> {
        serde_json::from_str::<Value>(text.trim()).ok().map(flatten)
    }
}

// ── Strategy 2: First balanced array ─────────────────────────────────────────

/// The first `[` whose balanced `]` encloses a parseable JSON array.
pub struct BracketSlice;

impl RecoveryStrategy for BracketSlice {
    fn name(&self) -> &'static str {
        "bracket"
    }

    fn try_parse(&self, text: &str) -> Option<Vec<Value>> {
        text.match_indices('[').find_map(|(start, _)| {
            let end = matching_close(text, start, b'[', b']')?;
            match serde_json::from_str::<Value>(&text[start..=end]) {
                Ok(Value::Array(items)) if !items.is_empty() => Some(items),
                _ => None,
            }
        })
    }
}

// ── Strategy 3: Independent objects ──────────────────────────────────────────

/// Every balanced `{...}` that parses on its own; broken ones are skipped.
pub struct ObjectScan;

impl RecoveryStrategy for ObjectScan {
    fn name(&self) -> &'static str {
        "objects"
    }

    fn try_parse(&self, text: &str) -> Option<Vec<Value>> {
        let mut found = Vec::new();
        let mut pos = 0;
        while let Some(rel) = text[pos..].find('{') {
            let start = pos + rel;
            match matching_close(text, start, b'{', b'}') {
                Some(end) => match serde_json::from_str::<Value>(&text[start..=end]) {
                    Ok(v @ Value::Object(_)) => {
                        found.push(v);
                        pos = end + 1;
                    }
                    _ => pos = start + 1,
                },
                None => pos = start + 1,
            }
        }
        (!found.is_empty()).then_some(found)
    }
}

/// Byte index of the delimiter closing the one at `start`, skipping string
/// literals. `None` when the text ends first.
fn matching_close(text: &str, start: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Strategy 4: Proximity reconstruction (heuristic) ─────────────────────────

static RE_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""type"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());
static RE_CONTENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""content"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());
static RE_OPTIONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)"options"\s*:\s*\[(.*?)\]"#).unwrap());
static RE_QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).unwrap());

/// Rebuild records from loose `"key": value` fragments.
///
/// Each `type` occurrence is paired with the `content` and `options`
/// occurrences nearest to it by character offset. With no `type` keys at all,
/// every `content` becomes its own record. Pairing can mismatch fields
/// across questions; it only runs when nothing structured survived.
pub struct ProximityScan;

impl RecoveryStrategy for ProximityScan {
    fn name(&self) -> &'static str {
        "proximity"
    }

    fn try_parse(&self, text: &str) -> Option<Vec<Value>> {
        let types: Vec<(usize, String)> = RE_TYPE
            .captures_iter(text)
            .filter_map(|c| Some((char_offset(text, c.get(0)?.start()), decode_text(&c[1]))))
            .collect();
        let contents: Vec<(usize, String)> = RE_CONTENT
            .captures_iter(text)
            .filter_map(|c| Some((char_offset(text, c.get(0)?.start()), decode_text(&c[1]))))
            .filter(|(_, s)| !s.trim().is_empty())
            .collect();
        let options: Vec<(usize, Vec<String>)> = RE_OPTIONS
            .captures_iter(text)
            .filter_map(|c| {
                Some((char_offset(text, c.get(0)?.start()), parse_option_list(&c[1])))
            })
            .collect();

        if contents.is_empty() {
            return None;
        }

        let records: Vec<Value> = if types.is_empty() {
            contents
                .iter()
                .map(|(_, content)| json!({ "content": content, "options": [] }))
                .collect()
        } else {
            types
                .iter()
                .filter_map(|(at, ty)| {
                    let content = nearest(&contents, *at)?;
                    let opts = nearest(&options, *at).cloned().unwrap_or_default();
                    Some(json!({ "type": ty, "content": content, "options": opts }))
                })
                .collect()
        };
        Some(records)
    }
}

/// Char index of a byte offset that lies on a char boundary.
fn char_offset(text: &str, byte: usize) -> usize {
    text[..byte].chars().count()
}

fn nearest<T>(items: &[(usize, T)], at: usize) -> Option<&T> {
    items
        .iter()
        .min_by_key(|(pos, _)| pos.abs_diff(at))
        .map(|(_, v)| v)
}

fn parse_option_list(inner: &str) -> Vec<String> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&format!("[{inner}]")) {
        return items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect();
    }
    RE_QUOTED
        .captures_iter(inner)
        .map(|c| decode_text(&c[1]))
        .collect()
}

static RE_UNICODE_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\u([0-9a-fA-F]{4})").unwrap());

/// Decode a raw string body captured outside a JSON parser:
/// `\uXXXX` escapes, backslash escapes and common HTML entities.
pub fn decode_text(raw: &str) -> String {
    let s = RE_UNICODE_ESCAPE.replace_all(raw, |caps: &regex::Captures<'_>| {
        u32::from_str_radix(&caps[1], 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });
    let s = decode_backslashes(&s);
    decode_html_entities(&s)
}

fn decode_backslashes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => {}
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn decode_html_entities(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
