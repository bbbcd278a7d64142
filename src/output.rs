//! Output types returned by the harvest entry points.

use crate::error::WindowError;
use crate::pipeline::envelope::EnvelopeShape;
use crate::pipeline::reconcile::FilterReason;
use crate::question::{CandidateQuestion, FinalQuestion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a window's extraction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionOutcome {
    /// A response was recovered into zero or more candidates.
    Parsed,
    /// Responses arrived but none was recoverable; parse-failure sentinel returned.
    ParseFailure,
    /// Every attempt failed at the transport level; example question returned.
    TransportFailure,
    /// No endpoint or credential; example question returned without a call.
    Unconfigured,
    /// The window held only whitespace; no call was made.
    Skipped,
}

impl ExtractionOutcome {
    /// Whether the window should be retried by the sweep.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ExtractionOutcome::ParseFailure | ExtractionOutcome::TransportFailure
        )
    }
}

/// Per-window extraction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResult {
    /// 0-based window index.
    pub index: usize,
    /// Char offset of the window start.
    pub start: usize,
    /// Char offset one past the window end.
    pub end: usize,
    pub candidates: Vec<CandidateQuestion>,
    pub outcome: ExtractionOutcome,
    /// Requests sent for this window (0 when unconfigured or skipped).
    pub attempts: u32,
    /// Recovery strategy that produced the candidates.
    pub strategy: Option<String>,
    /// Envelope the last payload was found in.
    pub envelope: Option<EnvelopeShape>,
    /// True when this result came from the retry sweep.
    pub swept: bool,
    pub duration_ms: u64,
    /// Set when the window degraded to a placeholder.
    pub error: Option<WindowError>,
}

/// Number of final questions in one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}

/// Per-category counts in order of first appearance.
pub fn category_counts(questions: &[FinalQuestion]) -> Vec<CategoryCount> {
    let mut counts: Vec<CategoryCount> = Vec::new();
    for q in questions {
        let category = q.category_or_default();
        match counts.iter_mut().find(|c| c.category == category) {
            Some(c) => c.count += 1,
            None => counts.push(CategoryCount {
                category: category.to_string(),
                count: 1,
            }),
        }
    }
    counts
}

/// "YYYY-N" numbering seen across all candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingReport {
    /// Distinct "year-number" labels in first-seen order.
    pub found: Vec<String>,
    /// Highest plausible number among years 2000–2030 (0 if none).
    pub max_number: u32,
    /// Numbers in `1..=max_number` never seen.
    pub missing: Vec<u32>,
}

/// One record the sink refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveFailure {
    pub signature: String,
    pub error: String,
}

/// Outcome of handing the final set to the persistence adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReport {
    /// Ids returned by the sink, in question order.
    pub saved_ids: Vec<String>,
    pub failures: Vec<SaveFailure>,
}

impl SaveReport {
    pub fn saved(&self) -> usize {
        self.saved_ids.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Basic facts about an input document. Needs no extraction service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub source: String,
    /// None for plain-text inputs.
    pub page_count: Option<usize>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub char_count: usize,
}

/// Aggregate counters for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub document_chars: usize,
    pub total_windows: usize,
    /// Windows whose final outcome is a parse or transport failure.
    pub failed_windows: usize,
    /// Whitespace-only windows that were not sent.
    pub skipped_windows: usize,
    /// Windows re-run by the sweep.
    pub swept_windows: usize,
    /// Swept windows whose sweep result replaced the primary one.
    pub recovered_by_sweep: usize,
    pub total_candidates: usize,
    pub placeholder_candidates: usize,
    pub filtered: usize,
    pub duplicates: usize,
    pub merged_fields: usize,
    pub question_count: usize,
    pub saved: usize,
    pub failed_saves: usize,
    pub extraction_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Complete result of a harvest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub exam_id: String,
    pub questions: Vec<FinalQuestion>,
    pub windows: Vec<WindowResult>,
    pub categories: Vec<CategoryCount>,
    pub filtered: BTreeMap<FilterReason, usize>,
    pub numbering: NumberingReport,
    pub persistence: SaveReport,
    pub stats: ExtractionStats,
}
