//! Reconciler: filter noise and collapse duplicates across windows.
//!
//! Overlapping windows make the model see boundary questions twice, and
//! answer-key pages leak rows like "答案：B" or "67. :C" as fake questions.
//! Reconciliation runs in two stages over candidates in window order:
//!
//! 1. **Filter**: drop candidates failing any [`FilterReason`] predicate.
//! 2. **Deduplicate**: first occurrence of each signature wins. With
//!    [`MergePolicy::FillMissing`] later copies may still fill empty fields
//!    of the kept record.
//!
//! Output keeps first-occurrence order, which is document order.

use crate::config::{ExtractionConfig, MergePolicy};
use crate::output::NumberingReport;
use crate::pipeline::identity::{IdentityResolver, IdentitySignature};
use crate::question::{CandidateQuestion, FinalQuestion, DEFAULT_TYPE};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// Trimmed content at or below this many chars is noise.
const MIN_CONTENT_CHARS: usize = 5;

/// Why a candidate was discarded before deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    EmptyContent,
    TooShort,
    /// "答案：B", "解答是：…"
    AnswerKeyLine,
    /// "67. :C"
    OptionOnlyRow,
}

// ── Filter predicates ────────────────────────────────────────────────────────

static RE_ANSWER_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:答案是|答案为|答案|解答是|解法是)[\s:：为]").unwrap());

static RE_OPTION_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+\.?\s*[:：]\s*[A-Da-d]+\s*$").unwrap());

pub fn is_answer_key_line(content: &str) -> bool {
    RE_ANSWER_KEY.is_match(content)
}

pub fn is_option_only_row(content: &str) -> bool {
    RE_OPTION_ONLY.is_match(content)
}

/// First predicate `content` fails, or `None` if it is a plausible question.
pub fn filter_reason(content: &str) -> Option<FilterReason> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        Some(FilterReason::EmptyContent)
    } else if trimmed.chars().count() <= MIN_CONTENT_CHARS {
        Some(FilterReason::TooShort)
    } else if is_answer_key_line(trimmed) {
        Some(FilterReason::AnswerKeyLine)
    } else if is_option_only_row(trimmed) {
        Some(FilterReason::OptionOnlyRow)
    } else {
        None
    }
}

/// A content-less record that still carries an answer for a numbered question.
fn is_answer_only(c: &CandidateQuestion) -> bool {
    c.content.trim().is_empty()
        && !c.answer.trim().is_empty()
        && c.external_id.as_deref().is_some_and(|id| !id.trim().is_empty())
}

// ── Reconciler ───────────────────────────────────────────────────────────────

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub questions: Vec<FinalQuestion>,
    /// Candidates dropped by each filter predicate.
    pub filtered: BTreeMap<FilterReason, usize>,
    /// Later copies of an already-seen signature.
    pub duplicates: usize,
    /// Fields filled from duplicates under [`MergePolicy::FillMissing`].
    pub merged_fields: usize,
}

impl Reconciliation {
    pub fn filtered_total(&self) -> usize {
        self.filtered.values().sum()
    }
}

/// Filter-then-deduplicate over an ordered candidate sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    resolver: IdentityResolver,
    merge_policy: MergePolicy,
    keep_answer_only: bool,
}

impl Reconciler {
    pub fn new(resolver: IdentityResolver, merge_policy: MergePolicy, keep_answer_only: bool) -> Self {
        Self {
            resolver,
            merge_policy,
            keep_answer_only,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(
            IdentityResolver::new(config.identity_strategy),
            config.merge_policy,
            config.keep_answer_only,
        )
    }

    pub fn reconcile(&self, exam_id: &str, candidates: &[CandidateQuestion]) -> Reconciliation {
        let mut out = Reconciliation::default();
        let mut seen: HashMap<IdentitySignature, usize> = HashMap::new();

        for candidate in candidates {
            // ── Stage 1: filter ──
            let answer_only = self.keep_answer_only && is_answer_only(candidate);
            if !answer_only {
                if let Some(reason) = filter_reason(&candidate.content) {
                    debug!("Filtered ({:?}): {:.40}", reason, candidate.content);
                    *out.filtered.entry(reason).or_default() += 1;
                    continue;
                }
            }

            // ── Stage 2: deduplicate ──
            let signature = self.resolver.identify(candidate);
            if let Some(&kept) = seen.get(&signature) {
                debug!("Duplicate signature '{}'", signature);
                out.duplicates += 1;
                if self.merge_policy == MergePolicy::FillMissing {
                    out.merged_fields += fill_missing(&mut out.questions[kept].question, candidate);
                }
                continue;
            }

            seen.insert(signature.clone(), out.questions.len());
            out.questions.push(FinalQuestion {
                exam_id: exam_id.to_string(),
                signature,
                question: candidate.clone(),
                answer_only,
            });
        }

        info!(
            "Reconciled {} candidates → {} questions ({} filtered, {} duplicates)",
            candidates.len(),
            out.questions.len(),
            out.filtered_total(),
            out.duplicates
        );
        out
    }
}

/// Reconcile with the default numbering identity and first-wins policy.
pub fn reconcile(exam_id: &str, candidates: &[CandidateQuestion]) -> Vec<FinalQuestion> {
    Reconciler::default().reconcile(exam_id, candidates).questions
}

/// Copy non-empty fields of `later` into empty fields of `kept`.
/// Returns how many fields changed.
fn fill_missing(kept: &mut CandidateQuestion, later: &CandidateQuestion) -> usize {
    let mut filled = 0;

    fn fill_string(slot: &mut String, from: &str, filled: &mut usize) {
        if slot.trim().is_empty() && !from.trim().is_empty() {
            *slot = from.to_string();
            *filled += 1;
        }
    }

    fill_string(&mut kept.answer, &later.answer, &mut filled);
    fill_string(&mut kept.explanation, &later.explanation, &mut filled);
    if kept.question_type == DEFAULT_TYPE && later.question_type != DEFAULT_TYPE {
        kept.question_type = later.question_type.clone();
        filled += 1;
    }
    if kept.options.is_empty() && !later.options.is_empty() {
        kept.options = later.options.clone();
        filled += 1;
    }
    if kept.category.is_none() && later.category.is_some() {
        kept.category = later.category.clone();
        filled += 1;
    }
    if kept.external_id.is_none() && later.external_id.is_some() {
        kept.external_id = later.external_id.clone();
        filled += 1;
    }
    if !kept.has_chart && later.has_chart {
        kept.has_chart = true;
        filled += 1;
    }
    filled
}

// ── Numbering report ─────────────────────────────────────────────────────────

static RE_YEAR_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d{4})[-—](\d+)").unwrap());

/// Question numbers above this are treated as misread and never widen the
/// gap scan.
pub const MAX_QUESTION_NUMBER: u32 = 999;

/// Scan "YYYY-N" numbering to spot questions the model never returned.
///
/// Only years 2000–2030 count towards the highest number, and only numbers
/// up to [`MAX_QUESTION_NUMBER`]; every number from 1 to that maximum with
/// no matching candidate is reported missing.
pub fn numbering_report(candidates: &[CandidateQuestion]) -> NumberingReport {
    let mut found: Vec<String> = Vec::new();
    let mut numbers: HashSet<u32> = HashSet::new();
    let mut max_number = 0u32;

    for c in candidates {
        let Some(caps) = RE_YEAR_NUMBER.captures(&c.content) else {
            continue;
        };
        let (Ok(year), Ok(num)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
            continue;
        };
        let label = format!("{year}-{num}");
        if !found.contains(&label) {
            found.push(label);
        }
        numbers.insert(num);
        if num > MAX_QUESTION_NUMBER {
            debug!("Ignoring implausible question number {year}-{num} in gap scan");
            continue;
        }
        if (2000..=2030).contains(&year) && num > max_number {
            max_number = num;
        }
    }

    let missing: Vec<u32> = (1..=max_number).filter(|n| !numbers.contains(n)).collect();
    if !missing.is_empty() {
        info!("Possibly missing question numbers: {:?}", missing);
    }

    NumberingReport {
        found,
        max_number,
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityStrategy;
    use crate::pipeline::identity::identify;

    fn q(content: &str) -> CandidateQuestion {
        CandidateQuestion::with_content(content)
    }

    #[test]
    fn filter_examples() {
        assert_eq!(filter_reason("答案：B"), Some(FilterReason::TooShort));
        assert!(reconcile("e", &[q("答案：B")]).is_empty());
        assert!(reconcile("e", &[q("12")]).is_empty());
        assert_eq!(filter_reason(""), Some(FilterReason::EmptyContent));
        assert_eq!(filter_reason("  \n "), Some(FilterReason::EmptyContent));

        let kept = reconcile("e", &[q("2022-7 下列说法中错误的是（ ）")]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].signature, "2022-7");
        assert_eq!(kept[0].exam_id, "e");
    }

    #[test]
    fn answer_key_lines() {
        assert_eq!(filter_reason("答案：ABCD 均正确"), Some(FilterReason::AnswerKeyLine));
        assert_eq!(filter_reason("答案是：选项C和D"), Some(FilterReason::AnswerKeyLine));
        assert_eq!(filter_reason("解答是 因为排放超标"), Some(FilterReason::AnswerKeyLine));
        assert_eq!(filter_reason("答案为B，因为排放超标"), Some(FilterReason::AnswerKeyLine));
        assert_eq!(filter_reason("下列答案：哪个正确"), None);
    }

    #[test]
    fn option_only_rows() {
        assert!(is_option_only_row("67. :C"));
        assert!(is_option_only_row("123：ABD"));
        assert_eq!(filter_reason("  67. :C  "), Some(FilterReason::OptionOnlyRow));
        assert_eq!(filter_reason("7. :C"), Some(FilterReason::TooShort));
        assert_eq!(filter_reason("1234. : abcd"), Some(FilterReason::OptionOnlyRow));
        assert!(!is_option_only_row("67. 下列哪项：C"));
    }

    #[test]
    fn first_window_wins() {
        let mut first = q("2022-7 下列说法中错误的是（ ）");
        first.answer = "A".into();
        let mut second = first.clone();
        second.answer = "C".into();
        second.explanation = "更完整的解析".into();

        let out = reconcile("e", &[first.clone(), second]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].signature, "2022-7");
        assert_eq!(out[0].question, first);
    }

    #[test]
    fn fill_missing_merges_empty_fields_only() {
        let mut first = q("2022-7 下列说法中错误的是（ ）");
        first.answer = "A".into();
        let mut second = q("2022-7 下列说法中错误的是（ ）截断后的版本");
        second.answer = "C".into();
        second.explanation = "解析".into();
        second.options = vec!["A. 甲".into()];
        second.has_chart = true;

        let reconciler = Reconciler::new(IdentityResolver::default(), MergePolicy::FillMissing, false);
        let r = reconciler.reconcile("e", &[first, second]);
        assert_eq!(r.questions.len(), 1);
        let kept = &r.questions[0].question;
        assert_eq!(kept.answer, "A");
        assert_eq!(kept.explanation, "解析");
        assert_eq!(kept.options, vec!["A. 甲"]);
        assert!(kept.has_chart);
        assert_eq!(kept.content, "2022-7 下列说法中错误的是（ ）");
        assert_eq!(r.merged_fields, 3);
        assert_eq!(r.duplicates, 1);
    }

    #[test]
    fn order_is_first_occurrence() {
        let input = vec![
            q("2021-3 第三题的内容"),
            q("2021-1 第一题的内容"),
            q("2021-3 第三题的内容（重复）"),
            q("2021-2 第二题的内容"),
        ];
        let sigs: Vec<String> = reconcile("e", &input).into_iter().map(|f| f.signature).collect();
        assert_eq!(sigs, vec!["2021-3", "2021-1", "2021-2"]);
    }

    #[test]
    fn no_duplicate_signatures_and_idempotent() {
        let input: Vec<CandidateQuestion> = [
            "2022-7 下列说法中错误的是（ ）",
            "2022-7（不定项）下列说法中错误的是",
            "练习1 以下关于大气环境的说法",
            "练习1 以下关于大气环境的说法（另一窗口）",
            "答案：B",
            "67. :C",
            "12",
            "没有编号的一道题目内容",
            "没有编号的一道题目内容，被窗口截断",
            "",
        ]
        .iter()
        .map(|s| q(s))
        .collect();

        let first = reconcile("e", &input);
        let sigs: HashSet<&String> = first.iter().map(|f| &f.signature).collect();
        assert_eq!(sigs.len(), first.len());
        for f in &first {
            assert_eq!(f.signature, identify(&f.question));
        }

        let second = reconcile("e", &input);
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn answer_only_records_survive_when_enabled() {
        let mut answer_row = q("");
        answer_row.answer = "ABC".into();
        answer_row.external_id = Some("练习29".into());

        let strict = Reconciler::default().reconcile("e", &[answer_row.clone()]);
        assert!(strict.questions.is_empty());
        assert_eq!(strict.filtered.get(&FilterReason::EmptyContent), Some(&1));

        let lenient = Reconciler::new(IdentityResolver::default(), MergePolicy::FirstWins, true)
            .reconcile("e", &[answer_row]);
        assert_eq!(lenient.questions.len(), 1);
        assert!(lenient.questions[0].answer_only);
        assert_eq!(lenient.questions[0].signature, "ID练习29");
    }

    #[test]
    fn content_type_strategy_keeps_type_variants() {
        let mut a = q("下列说法中错误的是哪一项");
        a.question_type = "单选题".into();
        let mut b = a.clone();
        b.question_type = "多选题".into();

        let numbering = Reconciler::default().reconcile("e", &[a.clone(), b.clone()]);
        assert_eq!(numbering.questions.len(), 1);

        let by_type = Reconciler::new(
            IdentityResolver::new(IdentityStrategy::ContentType),
            MergePolicy::FirstWins,
            false,
        )
        .reconcile("e", &[a, b]);
        assert_eq!(by_type.questions.len(), 2);
    }

    #[test]
    fn numbering_report_finds_gaps() {
        let input = vec![
            q("2022-1 第一题"),
            q("2022-2 第二题"),
            q("2022-5 第五题"),
            q("2022-5 第五题重复"),
            q("1999-40 旧题不计最大值"),
        ];
        let report = numbering_report(&input);
        assert_eq!(report.max_number, 5);
        assert_eq!(report.missing, vec![3, 4]);
        assert_eq!(report.found, vec!["2022-1", "2022-2", "2022-5", "1999-40"]);
    }

    #[test]
    fn numbering_report_ignores_implausible_numbers() {
        let input = vec![
            q("2022-4000000000 幻觉编号的题目"),
            q("2022-20000000 另一个幻觉编号"),
            q("2022-1 第一题"),
            q("2022-3 第三题"),
        ];
        let report = numbering_report(&input);
        assert_eq!(report.max_number, 3);
        assert_eq!(report.missing, vec![2]);
        assert_eq!(report.found.len(), 4);
    }
}
