//! Identity Resolver: derive the dedup key of a candidate question.
//!
//! Exam papers mix several numbering conventions ("2022-7", "练习3",
//! "第5题", "12.") and answer appendices that refer to questions only by
//! number. The default [`IdentityStrategy::Numbering`] rule bridges both:
//!
//! 1. numbering prefix of `content` (plus a directly following parenthetical)
//! 2. `ID{externalId}`
//! 3. `Content_{first 10 chars of trimmed content}`
//! 4. `Unknown_{random}`: never equal to anything else
//!
//! The tags in 2–4 keep fallback keys from colliding with real numbering.

use crate::config::IdentityStrategy;
use crate::question::CandidateQuestion;
use once_cell::sync::Lazy;
use regex::Regex;

/// Dedup key. Recomputed on demand, never persisted.
pub type IdentitySignature = String;

/// Only the start of the content is searched for numbering.
const PREFIX_CHARS: usize = 50;

/// Length of the content prefix used by the `Content_` fallback.
const CONTENT_KEY_CHARS: usize = 10;

// ── Numbering patterns ───────────────────────────────────────────────────────

/// Year with an annotation: "2007改编（不定项）", "2007（不定项）".
static RE_ANNOTATED_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\d{4}[\-\s]*改编[\s（(].*?[)）]|\d{4}[\-\s]*[\s（(].*?[)）])").unwrap()
});

/// "2022-7", "3-12", "练习 4", "题5", "第 6 题", "12."
static RE_SIMPLE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\d{4}[-—]\d+|\d+[-—]\d+|练习\s*\d+|题\s*\d+|第\s*\d+\s*题|\d+\.)").unwrap()
});

/// Parenthetical immediately after a simple number: "2022-7（不定项）".
static RE_TRAILING_PAREN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[(（].*?[)）]").unwrap());

/// Numbering prefix at the start of `content`, if any.
///
/// The same base number with a different parenthetical is a different
/// question, so the parenthetical is part of the result.
pub fn numbering_prefix(content: &str) -> Option<String> {
    let head: String = content.chars().take(PREFIX_CHARS).collect();

    if let Some(m) = RE_ANNOTATED_YEAR.find(&head) {
        return Some(m.as_str().trim().to_string());
    }

    let m = RE_SIMPLE_NUMBER.find(&head)?;
    let mut prefix = m.as_str().to_string();
    if let Some(paren) = RE_TRAILING_PAREN.find(&head[m.end()..]) {
        prefix.push_str(paren.as_str());
    }
    Some(prefix.trim().to_string())
}

/// Computes [`IdentitySignature`]s with a configured strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver {
    strategy: IdentityStrategy,
}

impl IdentityResolver {
    pub fn new(strategy: IdentityStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> IdentityStrategy {
        self.strategy
    }

    pub fn identify(&self, candidate: &CandidateQuestion) -> IdentitySignature {
        let content = candidate.content.trim();
        match self.strategy {
            IdentityStrategy::Numbering => numbering_signature(candidate),
            _ if content.is_empty() => random_signature(),
            IdentityStrategy::ContentType => {
                format!("CT_{}|{}", content, candidate.question_type)
            }
            IdentityStrategy::ContentTypeOption => format!(
                "CTO_{}|{}|{}",
                content,
                candidate.question_type,
                candidate.options.first().map(String::as_str).unwrap_or("")
            ),
        }
    }
}

/// Signature under the default numbering strategy.
pub fn identify(candidate: &CandidateQuestion) -> IdentitySignature {
    numbering_signature(candidate)
}

fn numbering_signature(candidate: &CandidateQuestion) -> IdentitySignature {
    if let Some(prefix) = numbering_prefix(&candidate.content) {
        return prefix;
    }
    if let Some(id) = candidate
        .external_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        return format!("ID{id}");
    }
    let content = candidate.content.trim();
    if !content.is_empty() {
        let head: String = content.chars().take(CONTENT_KEY_CHARS).collect();
        return format!("Content_{head}");
    }
    random_signature()
}

fn random_signature() -> IdentitySignature {
    format!("Unknown_{}", uuid::Uuid::new_v4().simple())
}
