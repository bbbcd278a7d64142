//! # exam-harvest
//!
//! Extract structured exam questions from PDF papers with a language model.
//!
//! A paper is too long for one request, so its text is cut into overlapping
//! windows. Each window is sent on its own, with retries, and whatever the
//! model returns (clean JSON, fenced JSON, truncated arrays, prose with JSON
//! fragments) is recovered into candidate questions. Candidates from all
//! windows are then filtered and deduplicated by their numbering ("2022-7",
//! "练习3", ...) so a question cut by a window boundary and seen twice is kept
//! once.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / text
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Text       pdfium text layer (spawn_blocking)
//!  ├─ 3. Normalise  page counters, CRLF, invisible chars
//!  ├─ 4. Window     3000-char windows, 500-char overlap
//!  ├─ 5. Extract    per-window request, retry with backoff, JSON recovery
//!  ├─ 6. Sweep      second pass over failed or empty windows
//!  ├─ 7. Reconcile  filter, dedupe by identity signature
//!  └─ 8. Persist    one record per question; failures logged, never fatal
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use exam_harvest::{harvest, ExtractionConfig, MemorySink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Endpoint from EXAM_HARVEST_API_URL / EXAM_HARVEST_API_KEY
//!     let config = ExtractionConfig::default();
//!     let sink = MemorySink::new();
//!     let output = harvest("paper.pdf", "exam-2022", &config, &sink).await?;
//!     for c in &output.categories {
//!         eprintln!("{}: {}", c.category, c.count);
//!     }
//!     eprintln!("{} questions, {} failed windows",
//!         output.stats.question_count,
//!         output.stats.failed_windows);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `exam-harvest` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! exam-harvest = { version = "0.1", default-features = false }
//! ```
//!
//! ## Degraded output
//!
//! The run never fails because the model misbehaved. A window whose
//! responses cannot be parsed contributes one parse-failure question
//! (category `parse-failure`); a window that never got a response, or a run
//! with no endpoint configured, contributes the canned example question.
//! Both are marked in [`CandidateQuestion::placeholder`] and counted in
//! [`ExtractionStats::placeholder_candidates`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod error;
pub mod harvest;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod question;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancelFlag;
pub use config::{ExtractionConfig, ExtractionConfigBuilder, IdentityStrategy, MergePolicy};
pub use error::{HarvestError, PersistError, TransportError, WindowError};
pub use harvest::{harvest, harvest_sync, harvest_text, harvest_to_file, inspect};
pub use output::{
    CategoryCount, DocumentInfo, ExtractionOutcome, ExtractionOutput, ExtractionStats,
    NumberingReport, SaveFailure, SaveReport, WindowResult,
};
pub use pipeline::identity::{identify, IdentityResolver, IdentitySignature};
pub use pipeline::llm::{
    ChatMessage, CompletionRequest, CompletionTransport, ExtractionClient, HttpTransport,
    WindowExtraction,
};
pub use pipeline::persist::{persist_all, JsonlSink, MemorySink, NullSink, QuestionSink};
pub use pipeline::reconcile::{reconcile, FilterReason, Reconciler, Reconciliation};
pub use pipeline::window::{window, Window, Windower};
pub use progress::{HarvestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use question::{CandidateQuestion, FinalQuestion, Placeholder, QuestionRecord};
