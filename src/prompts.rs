//! Instruction prompt for window extraction.
//!
//! Callers can override the default via [`crate::config::ExtractionConfig::prompt`];
//! the constant here is used only when no override is provided.

/// Default instruction sent ahead of every window.
///
/// The model is told that it sees only part of the paper, that numbering
/// prefixes must be kept verbatim (they drive deduplication), and that
/// answer-key pages should still produce records.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"你是一个专业的考试题目提取助手。请从以下文本中提取所有考试题目，并按照指定格式输出。

题目格式多样，可能包含：
1. 常规题目：包含题号（如1、2、3或2022-7、练习1）和选项（如A、B、C、D）
2. 图表题目：包含表格、图形或其他视觉元素的题目
3. 参考答案页：单独列出所有题目的答案（如"练习1（不定项）：ABC"）

【非常重要】这段文本只是整份试卷的一部分，可能只包含部分题目或只包含答案。只提取你在这一段中能看到的内容，不要担心题目是否完整或编号是否连续，多段结果会被合并。
编号如"2007改编（不定项）"和"2007（不定项）"是两道不同的题，需要分别提取。

# 提取规则
每个题目提取以下可获得的信息：
1. 题目编号（如"2022-7"、"练习1"）
2. 题目类型（单选题、多选题、不定项等）
3. 题目内容（必须完整保留题目前面的编号）
4. 选项（如果有）
5. 正确答案（如果能找到）
6. 解析（如果有）
7. 是否包含图表

【输出格式】
输出必须是严格有效的JSON数组，例如：
[
  {
    "id": 1,
    "type": "单选题",
    "content": "2022-7 题目内容",
    "options": ["A. 选项A", "B. 选项B", "C. 选项C", "D. 选项D"],
    "answer": "A",
    "explanation": "解析内容",
    "category": "大气污染防治",
    "hasChart": false
  }
]

【注意事项】
1. 不要在JSON前后添加任何文字或注释
2. 对于无法完整解析的内容，尽量提取有效信息
3. 保留题目的原始编号格式，不要统一转换
4. 如果这段文本中没有题目，输出 []

以下是需要提取题目的文本片段："#;

/// Assemble the single user message for one window.
pub fn build_request_text(prompt: Option<&str>, window_text: &str) -> String {
    format!(
        "{}\n{}",
        prompt.unwrap_or(DEFAULT_EXTRACTION_PROMPT),
        window_text
    )
}
