//! Question records at each stage of the pipeline.
//!
//! ```text
//! model JSON ──▶ CandidateQuestion ──▶ FinalQuestion ──▶ QuestionRecord
//!               (one per window hit)  (deduplicated)    (persistence row)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Type label used when the model gave none.
pub const DEFAULT_TYPE: &str = "未知";

/// Type label stored when a final question still has no type.
pub const DEFAULT_RECORD_TYPE: &str = "单选题";

/// Category of the sentinel returned when no response could be parsed.
pub const PARSE_FAILURE_CATEGORY: &str = "parse-failure";

/// Category bucket for questions without one.
pub const UNCATEGORISED: &str = "其他";

/// Keys accepted as the question text, in priority order.
const CONTENT_KEYS: &[&str] = &["content", "question", "stem"];

/// Why a candidate is a stand-in rather than real model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placeholder {
    /// Canned example question (transport failure or no service configured).
    Example,
    /// Sentinel for "responses arrived but nothing was recoverable".
    ParseFailure,
}

/// One question as extracted from one window. Possibly a duplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CandidateQuestion {
    /// Free-form type tag ("单选题", "多选题", "不定项", …).
    #[serde(rename = "type")]
    pub question_type: String,
    /// Question text, usually with its numbering prefix.
    pub content: String,
    pub options: Vec<String>,
    pub answer: String,
    pub explanation: String,
    pub category: Option<String>,
    pub has_chart: bool,
    /// Source numbering supplied by the model as `id`.
    pub external_id: Option<String>,
    /// Set on stand-ins produced by the extraction client itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<Placeholder>,
}

impl Default for CandidateQuestion {
    fn default() -> Self {
        Self {
            question_type: DEFAULT_TYPE.to_string(),
            content: String::new(),
            options: Vec::new(),
            answer: String::new(),
            explanation: String::new(),
            category: None,
            has_chart: false,
            external_id: None,
            placeholder: None,
        }
    }
}

impl CandidateQuestion {
    /// Candidate with the given content and defaults elsewhere.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// The fixed example question used when extraction is impossible.
    pub fn example() -> Self {
        Self {
            question_type: "选择题".to_string(),
            content: "不属于关联性质和强度的描述是（　　）.".to_string(),
            options: vec![
                "A. 关联性质和强度是描述关联强度的两个基本概念".to_string(),
                "B. 关联性质和强度是描述关联强度的两个基本方面".to_string(),
                "C. 关联性质是描述关联强度的基本概念".to_string(),
                "D. 关联强度是描述关联强度的基本方面".to_string(),
            ],
            answer: "B".to_string(),
            explanation: "解析：B 选项错误。关联性质和强度是描述关联强度的两个基本方面，不是基本概念。"
                .to_string(),
            placeholder: Some(Placeholder::Example),
            ..Self::default()
        }
    }

    /// Sentinel for a window whose responses could not be parsed.
    pub fn parse_failure() -> Self {
        Self {
            question_type: "单选题".to_string(),
            content: "无法正确解析内容".to_string(),
            options: vec!["A. 选项A".to_string(), "B. 选项B".to_string()],
            answer: "A".to_string(),
            category: Some(PARSE_FAILURE_CATEGORY.to_string()),
            placeholder: Some(Placeholder::ParseFailure),
            ..Self::default()
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder.is_some()
    }

    /// Build a candidate from a loosely-typed JSON object.
    ///
    /// Returns `None` when the value is not an object or carries no
    /// content-like key. Every other field is defaulted when missing or
    /// of the wrong type.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let content_value = CONTENT_KEYS.iter().find_map(|k| obj.get(*k))?;

        let question_type = string_field(obj, "type")
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TYPE.to_string());

        Some(Self {
            question_type,
            content: scalar_to_string(content_value).unwrap_or_default(),
            options: obj.get("options").map(options_from_json).unwrap_or_default(),
            answer: obj.get("answer").map(answer_from_json).unwrap_or_default(),
            explanation: string_field(obj, "explanation").unwrap_or_default(),
            category: string_field(obj, "category").filter(|c| !c.trim().is_empty()),
            has_chart: obj.get("hasChart").map(bool_from_json).unwrap_or(false),
            external_id: obj
                .get("id")
                .and_then(scalar_to_string)
                .filter(|id| !id.trim().is_empty()),
            placeholder: None,
        })
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(scalar_to_string)
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn options_from_json(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn answer_from_json(v: &Value) -> String {
    match v {
        Value::Array(items) => items.iter().filter_map(scalar_to_string).collect(),
        other => scalar_to_string(other).unwrap_or_default(),
    }
}

fn bool_from_json(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// A reconciled, deduplicated question tied to its exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalQuestion {
    pub exam_id: String,
    /// Dedup key this question won.
    pub signature: String,
    #[serde(flatten)]
    pub question: CandidateQuestion,
    /// Kept without content because it carries an answer for a numbered question.
    pub answer_only: bool,
}

impl FinalQuestion {
    /// Category bucket for summaries.
    pub fn category_or_default(&self) -> &str {
        self.question
            .category
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(UNCATEGORISED)
    }

    /// Row handed to the persistence adapter.
    pub fn to_record(&self) -> QuestionRecord {
        let q = &self.question;
        let question_type = if q.question_type.trim().is_empty() || q.question_type == DEFAULT_TYPE
        {
            DEFAULT_RECORD_TYPE.to_string()
        } else {
            q.question_type.clone()
        };
        QuestionRecord {
            exam_id: self.exam_id.clone(),
            content: q.content.clone(),
            question_type,
            options: serde_json::to_string(&q.options).unwrap_or_else(|_| "[]".to_string()),
            answer: q.answer.clone(),
            explanation: q.explanation.clone(),
            tags: q.category.clone().unwrap_or_default(),
            has_chart: q.has_chart,
            external_id: q.external_id.clone(),
        }
    }
}

/// The persisted shape of one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    pub exam_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub question_type: String,
    /// JSON-encoded option list.
    pub options: String,
    pub answer: String,
    pub explanation: String,
    pub tags: String,
    pub has_chart: bool,
    pub external_id: Option<String>,
}
