//! Integration tests for the whole harvest pipeline.
//!
//! Everything except `live_extraction` runs offline against a scripted
//! [`CompletionTransport`]. The live test makes real requests and is gated
//! behind `E2E_ENABLED`:
//!
//!   E2E_ENABLED=1 EXAM_HARVEST_API_URL=... EXAM_HARVEST_API_KEY=... \
//!     cargo test --test pipeline live_ -- --nocapture

use async_trait::async_trait;
use exam_harvest::{
    harvest, harvest_sync, harvest_text, harvest_to_file, inspect, CancelFlag, CompletionRequest,
    CompletionTransport, ExtractionConfig, ExtractionConfigBuilder, ExtractionOutcome,
    HarvestError, HarvestProgressCallback, MemorySink, MergePolicy, NullSink, PersistError,
    Placeholder, QuestionRecord, QuestionSink, TransportError,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

type Reply = dyn Fn(usize, &CompletionRequest) -> Result<String, TransportError> + Send + Sync;

/// Answers each request with `reply(call_number, request)`.
struct Scripted {
    calls: AtomicUsize,
    temperatures: Mutex<Vec<f32>>,
    reply: Box<Reply>,
}

impl Scripted {
    fn new(
        reply: impl Fn(usize, &CompletionRequest) -> Result<String, TransportError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            temperatures: Mutex::new(Vec::new()),
            reply: Box::new(reply),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionTransport for Scripted {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.temperatures.lock().unwrap().push(request.temperature);
        (self.reply)(n, request)
    }
}

fn chat(payload: serde_json::Value) -> Result<String, TransportError> {
    Ok(json!({"choices": [{"message": {"content": payload.to_string()}}]}).to_string())
}

fn base_config(transport: Arc<Scripted>) -> ExtractionConfigBuilder {
    ExtractionConfig::builder()
        .window_size(100)
        .overlap(20)
        .max_retries(1)
        .retry_backoff_ms(0)
        .transport(transport as Arc<dyn CompletionTransport>)
}

/// 150 chars: two windows of 100 with a 20-char overlap.
fn two_window_document() -> String {
    format!("{}\n{}", "甲".repeat(90), "乙".repeat(59))
}

struct FailingSink;

#[async_trait]
impl QuestionSink for FailingSink {
    async fn save(&self, record: &QuestionRecord) -> Result<String, PersistError> {
        if record.content.starts_with("2022-2") {
            Err(PersistError::Rejected("duplicate key".into()))
        } else {
            Ok("ok".into())
        }
    }
}

// ── Reconciliation across windows ────────────────────────────────────────────

#[tokio::test]
async fn duplicate_across_windows_keeps_first() {
    let transport = Scripted::new(|n, _| match n {
        0 => chat(json!([
            {"type": "单选题", "content": "2022-7 下列说法中错误的是（ ）", "answer": "A"},
            {"type": "单选题", "content": "2022-6 以下哪项属于大气污染物", "answer": "C"}
        ])),
        _ => chat(json!([
            {"type": "单选题", "content": "2022-7 下列说法中错误的是（ ）完整版", "answer": "B", "explanation": "略"}
        ])),
    });
    let config = base_config(transport.clone()).build().unwrap();
    let sink = MemorySink::new();

    let out = harvest_text(&two_window_document(), "exam-1", &config, &sink)
        .await
        .unwrap();

    assert_eq!(out.stats.total_windows, 2);
    assert_eq!(transport.calls(), 2);
    assert_eq!(out.questions.len(), 2);
    assert_eq!(out.stats.duplicates, 1);
    let q7 = out.questions.iter().find(|q| q.signature == "2022-7").unwrap();
    assert_eq!(q7.question.answer, "A");
    assert_eq!(q7.question.explanation, "");
    assert!(out.questions.iter().all(|q| q.exam_id == "exam-1"));
    assert_eq!(sink.len(), 2);
    assert_eq!(out.numbering.max_number, 7);
    assert_eq!(out.numbering.missing, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn fill_missing_policy_merges_later_fields() {
    let transport = Scripted::new(|n, _| match n {
        0 => chat(json!([{"content": "2022-7 下列说法中错误的是（ ）", "answer": "A"}])),
        _ => chat(json!([{"content": "2022-7 下列说法中错误的是（ ）", "answer": "B", "explanation": "见教材"}])),
    });
    let config = base_config(transport)
        .merge_policy(MergePolicy::FillMissing)
        .build()
        .unwrap();

    let out = harvest_text(&two_window_document(), "exam-1", &config, &NullSink)
        .await
        .unwrap();

    assert_eq!(out.questions.len(), 1);
    assert_eq!(out.questions[0].question.answer, "A");
    assert_eq!(out.questions[0].question.explanation, "见教材");
    assert!(out.stats.merged_fields >= 1);
}

#[tokio::test]
async fn noise_is_filtered_with_reasons() {
    let transport = Scripted::new(|_, _| {
        chat(json!([
            {"content": "2022-1 下列关于环境影响评价的说法正确的是"},
            {"content": "答案：B"},
            {"content": "67. :C"},
            {"content": "  "}
        ]))
    });
    let config = base_config(transport)
        .window_size(1000)
        .overlap(100)
        .build()
        .unwrap();

    let out = harvest_text("2022-1 下列关于环境影响评价的说法正确的是", "exam-1", &config, &NullSink)
        .await
        .unwrap();

    assert_eq!(out.questions.len(), 1);
    assert_eq!(out.stats.filtered, 3);
    assert_eq!(out.filtered.values().sum::<usize>(), 3);
}

// ── Degraded windows ─────────────────────────────────────────────────────────

#[tokio::test]
async fn always_failing_transport_yields_one_placeholder() {
    let transport = Scripted::new(|_, _| Err(TransportError::Network("connection refused".into())));
    let config = base_config(transport.clone())
        .window_size(1000)
        .overlap(100)
        .build()
        .unwrap();

    let out = harvest_text("2022-1 某道题目", "exam-1", &config, &NullSink)
        .await
        .unwrap();

    // 2 attempts in the primary pass, 2 more in the sweep.
    assert_eq!(transport.calls(), 4);
    assert_eq!(out.questions.len(), 1);
    assert_eq!(out.questions[0].question.placeholder, Some(Placeholder::Example));
    assert_eq!(out.stats.failed_windows, 1);
    assert_eq!(out.stats.swept_windows, 1);
    assert_eq!(out.stats.recovered_by_sweep, 0);
    assert_eq!(out.windows[0].outcome, ExtractionOutcome::TransportFailure);
    assert!(out.windows[0].error.is_some());
}

#[tokio::test]
async fn malformed_prose_still_produces_well_formed_output() {
    let transport = Scripted::new(|_, _| {
        Ok(json!({"choices": [{"message": {"content": "抱歉，这段文字里我没有找到题目。"}}]}).to_string())
    });
    let config = base_config(transport).build().unwrap();

    let out = harvest_text(&two_window_document(), "exam-1", &config, &MemorySink::new())
        .await
        .unwrap();

    assert_eq!(out.stats.failed_windows, 2);
    assert_eq!(out.questions.len(), 1);
    assert_eq!(out.questions[0].category_or_default(), "parse-failure");
    assert_eq!(out.categories[0].category, "parse-failure");
    // Output serialises cleanly.
    let v = serde_json::to_value(&out).unwrap();
    assert_eq!(v["questions"][0]["content"], "无法正确解析内容");
}

#[tokio::test]
async fn sweep_replaces_failed_window_at_retry_temperature() {
    let transport = Scripted::new(|n, _| match n {
        0 => Err(TransportError::Status { status: 503, body: "overloaded".into() }),
        _ => chat(json!([{"content": "2022-3 关于噪声污染的说法正确的是"}])),
    });
    let config = base_config(transport.clone())
        .window_size(1000)
        .overlap(100)
        .max_retries(0)
        .build()
        .unwrap();

    let out = harvest_text("2022-3 关于噪声污染的说法正确的是", "exam-1", &config, &NullSink)
        .await
        .unwrap();

    assert_eq!(*transport.temperatures.lock().unwrap(), vec![0.3, 0.2]);
    assert_eq!(out.stats.recovered_by_sweep, 1);
    assert_eq!(out.stats.failed_windows, 0);
    assert!(out.windows[0].swept);
    assert_eq!(out.questions[0].signature, "2022-3");
}

#[tokio::test]
async fn sweep_can_be_disabled() {
    let transport = Scripted::new(|_, _| Err(TransportError::Timeout { secs: 1 }));
    let config = base_config(transport.clone())
        .window_size(1000)
        .overlap(100)
        .max_retries(0)
        .retry_sweep(false)
        .build()
        .unwrap();

    let out = harvest_text("2022-3 题目", "exam-1", &config, &NullSink).await.unwrap();
    assert_eq!(transport.calls(), 1);
    assert_eq!(out.stats.swept_windows, 0);
}

#[tokio::test]
async fn empty_array_means_no_questions() {
    let transport = Scripted::new(|_, _| chat(json!([])));
    let config = base_config(transport)
        .window_size(1000)
        .overlap(100)
        .build()
        .unwrap();

    let out = harvest_text("封面：2022年环境影响评价考试", "exam-1", &config, &NullSink)
        .await
        .unwrap();
    assert!(out.questions.is_empty());
    assert_eq!(out.windows[0].outcome, ExtractionOutcome::Parsed);
    assert_eq!(out.stats.failed_windows, 0);
}

// ── Cancellation and persistence ─────────────────────────────────────────────

#[tokio::test]
async fn cancel_before_start_persists_nothing() {
    let transport = Scripted::new(|_, _| chat(json!([{"content": "2022-1 题目内容"}])));
    let cancel = CancelFlag::new();
    cancel.cancel();
    let config = base_config(transport.clone()).cancel_flag(cancel).build().unwrap();
    let sink = MemorySink::new();

    let err = harvest_text(&two_window_document(), "exam-1", &config, &sink)
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::Cancelled { completed: 0, total: 2 }));
    assert_eq!(transport.calls(), 0);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn cancel_mid_run_stops_before_next_window() {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    let transport = Scripted::new(move |_, _| {
        flag.cancel();
        chat(json!([{"content": "2022-1 题目内容"}]))
    });
    let config = base_config(transport.clone()).cancel_flag(cancel).build().unwrap();
    let sink = MemorySink::new();

    let err = harvest_text(&two_window_document(), "exam-1", &config, &sink)
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::Cancelled { completed: 1, total: 2 }));
    assert_eq!(transport.calls(), 1);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn failing_sink_does_not_abort_run() {
    let transport = Scripted::new(|_, _| {
        chat(json!([
            {"content": "2022-1 第一道题目的题干"},
            {"content": "2022-2 第二道题目的题干"},
            {"content": "2022-3 第三道题目的题干"}
        ]))
    });
    let config = base_config(transport)
        .window_size(1000)
        .overlap(100)
        .build()
        .unwrap();

    let out = harvest_text("2022-1 ... 2022-3", "exam-1", &config, &FailingSink)
        .await
        .unwrap();

    assert_eq!(out.questions.len(), 3);
    assert_eq!(out.stats.saved, 2);
    assert_eq!(out.stats.failed_saves, 1);
    assert_eq!(out.persistence.failures[0].signature, "2022-2");
}

// ── Entry points on files ────────────────────────────────────────────────────

fn write_paper(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("paper.txt");
    std::fs::write(
        &path,
        "环境影响评价技术方法\r\n1 / 12\r\n2022-1 下列说法正确的是（ ）\r\nA. 甲\r\nB. 乙\r\n",
    )
    .unwrap();
    path
}

#[tokio::test]
async fn harvest_to_file_writes_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_paper(&dir);
    let output = dir.path().join("out").join("questions.jsonl");

    let transport = Scripted::new(|_, request| {
        // Page counter was normalised away before windowing.
        assert!(!request.messages[0].content.contains("1 / 12"));
        chat(json!([{
            "type": "单选题",
            "content": "2022-1 下列说法正确的是（ ）",
            "options": ["A. 甲", "B. 乙"],
            "answer": "A",
            "category": "技术方法"
        }]))
    });
    let config = base_config(transport)
        .window_size(1000)
        .overlap(100)
        .build()
        .unwrap();

    let out = harvest_to_file(input.to_str().unwrap(), "exam-9", &output, &config)
        .await
        .unwrap();
    assert_eq!(out.persistence.saved(), 1);

    let text = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["examId"], "exam-9");
    assert_eq!(lines[0]["tags"], "技术方法");
    assert_eq!(lines[0]["options"], r#"["A. 甲","B. 乙"]"#);
    assert!(!output.with_extension("jsonl.tmp").exists());
}

#[tokio::test]
async fn progress_events_follow_windows() {
    #[derive(Default)]
    struct Counts {
        started: AtomicUsize,
        completed: AtomicUsize,
        errors: AtomicUsize,
        total: AtomicUsize,
    }
    impl HarvestProgressCallback for Counts {
        fn on_run_start(&self, total_windows: usize) {
            self.total.store(total_windows, Ordering::SeqCst);
        }
        fn on_window_start(&self, _index: usize, _total: usize) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_window_complete(&self, _index: usize, _total: usize, _candidates: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_window_error(&self, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    let transport = Scripted::new(|n, _| match n {
        0 => chat(json!([{"content": "2022-1 第一道题目的题干"}])),
        _ => Err(TransportError::Network("reset".into())),
    });
    let counts = Arc::new(Counts::default());
    let config = base_config(transport)
        .progress_callback(counts.clone())
        .retry_sweep(false)
        .build()
        .unwrap();

    harvest_text(&two_window_document(), "exam-1", &config, &NullSink)
        .await
        .unwrap();

    assert_eq!(counts.total.load(Ordering::SeqCst), 2);
    assert_eq!(counts.started.load(Ordering::SeqCst), 2);
    assert_eq!(counts.completed.load(Ordering::SeqCst), 1);
    assert_eq!(counts.errors.load(Ordering::SeqCst), 1);
}

#[test]
fn harvest_sync_on_text_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_paper(&dir);
    let transport = Scripted::new(|_, _| chat(json!([{"content": "2022-1 下列说法正确的是（ ）"}])));
    let config = base_config(transport)
        .window_size(1000)
        .overlap(100)
        .build()
        .unwrap();

    let out = harvest_sync(input.to_str().unwrap(), "exam-1", &config, &NullSink).unwrap();
    assert_eq!(out.questions.len(), 1);
}

#[test]
fn inspect_text_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_paper(&dir);
    let info = tokio_test::block_on(inspect(input.to_str().unwrap())).unwrap();
    assert_eq!(info.page_count, None);
    assert!(info.char_count > 0);
}

#[tokio::test]
async fn missing_input_is_fatal() {
    let err = harvest("/no/such/paper.pdf", "exam-1", &ExtractionConfig::default(), &NullSink)
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::FileNotFound { .. }));
}

// ── Live ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn live_extraction() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run live tests");
        return;
    }
    let paper = "2022-7（单选）下列关于环境影响评价的说法中，错误的是（　　）。\n\
                 A. 环境影响评价应当客观、公开、公正\n\
                 B. 规划环评应当在规划编制过程中进行\n\
                 C. 建设项目环评文件未经审批不得开工建设\n\
                 D. 环境影响评价只针对建设项目\n";
    let out = harvest_text(paper, "live", &ExtractionConfig::default(), &MemorySink::new())
        .await
        .unwrap();
    println!("{}", serde_json::to_string_pretty(&out.questions).unwrap());
    assert!(!out.questions.is_empty());
}
