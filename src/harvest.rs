//! Eager (whole-document) harvest entry points.
//!
//! Windows are processed sequentially in document order. Reconciliation
//! is first-wins over the flattened candidate sequence, so the order in
//! which windows finish must match the order they appear in.

use crate::cancel::CancelFlag;
use crate::config::ExtractionConfig;
use crate::error::HarvestError;
use crate::output::{
    category_counts, DocumentInfo, ExtractionOutcome, ExtractionOutput, ExtractionStats,
    WindowResult,
};
use crate::pipeline::llm::{ExtractionClient, WindowExtraction};
use crate::pipeline::persist::{persist_all, JsonlSink, QuestionSink};
use crate::pipeline::reconcile::{numbering_report, Reconciler};
use crate::pipeline::window::{window, Window};
use crate::pipeline::{input, normalize, text};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::question::CandidateQuestion;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Extract, reconcile and persist the questions of a PDF (or text file) or URL.
///
/// # Returns
/// `Ok(ExtractionOutput)` whenever the run completes, even if windows
/// degraded or records failed to save (see `output.stats`).
///
/// # Errors
/// Only fatal conditions: empty exam id, unreadable or non-PDF input, empty
/// document text, invalid configuration, or cancellation. A cancelled run
/// persists nothing.
pub async fn harvest(
    input_str: impl AsRef<str>,
    exam_id: &str,
    config: &ExtractionConfig,
    sink: &dyn QuestionSink,
) -> Result<ExtractionOutput, HarvestError> {
    let input_str = input_str.as_ref();
    require_exam_id(exam_id)?;
    info!("Starting harvest: {} (exam {})", input_str, exam_id);

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;

    // ── Step 2: Extract document text ────────────────────────────────────
    let (document, info) = text::load_document(&resolved, config.password.as_deref()).await?;
    info!(
        "Document text: {} chars{}",
        info.char_count,
        info.page_count
            .map(|n| format!(" from {} pages", n))
            .unwrap_or_default()
    );

    run(&document, input_str, exam_id, config, sink).await
}

/// Same as [`harvest`] for text that has already been extracted.
pub async fn harvest_text(
    document: &str,
    exam_id: &str,
    config: &ExtractionConfig,
    sink: &dyn QuestionSink,
) -> Result<ExtractionOutput, HarvestError> {
    require_exam_id(exam_id)?;
    run(document, "<text>", exam_id, config, sink).await
}

/// Synchronous wrapper around [`harvest`].
///
/// Creates a temporary tokio runtime internally.
pub fn harvest_sync(
    input_str: impl AsRef<str>,
    exam_id: &str,
    config: &ExtractionConfig,
    sink: &dyn QuestionSink,
) -> Result<ExtractionOutput, HarvestError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| HarvestError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(harvest(input_str, exam_id, config, sink))
}

/// Harvest into a JSONL file, one record per line.
///
/// Records go to a temp file that is renamed over `output_path` only when
/// the run completes, so a failed or cancelled run leaves no partial file.
pub async fn harvest_to_file(
    input_str: impl AsRef<str>,
    exam_id: &str,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, HarvestError> {
    let path = output_path.as_ref();
    let write_err = |e: std::io::Error| HarvestError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("jsonl.tmp");
    if tokio::fs::try_exists(&tmp_path).await.unwrap_or(false) {
        tokio::fs::remove_file(&tmp_path).await.map_err(write_err)?;
    }

    let sink = JsonlSink::new(&tmp_path);
    let result = harvest(input_str, exam_id, config, &sink).await;
    let output = match result {
        Ok(output) => output,
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }
    };

    if output.persistence.saved() == 0 {
        // Nothing was appended; still produce an (empty) output file.
        tokio::fs::write(&tmp_path, b"").await.map_err(write_err)?;
    }
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    info!("Wrote {} records to {}", output.persistence.saved(), path.display());

    Ok(output)
}

/// Document facts without calling the extraction service.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<DocumentInfo, HarvestError> {
    let resolved = input::resolve_input(input_str.as_ref(), 120).await?;
    text::document_info(&resolved, None).await
}

fn require_exam_id(exam_id: &str) -> Result<(), HarvestError> {
    if exam_id.trim().is_empty() {
        return Err(HarvestError::MissingExamId);
    }
    Ok(())
}

// ── Core run ─────────────────────────────────────────────────────────────────

async fn run(
    document: &str,
    source_name: &str,
    exam_id: &str,
    config: &ExtractionConfig,
    sink: &dyn QuestionSink,
) -> Result<ExtractionOutput, HarvestError> {
    let total_start = Instant::now();
    config.validate()?;

    // ── Step 1: Normalise and window ─────────────────────────────────────
    let document = if config.normalize_text {
        normalize::normalize_document(document)
    } else {
        document.to_string()
    };
    if document.trim().is_empty() {
        return Err(HarvestError::EmptyDocument {
            source_name: source_name.to_string(),
        });
    }

    let windows = window(&document, config.window_size, config.overlap)?;
    let total = windows.len();
    info!(
        "{} chars → {} windows (size {}, overlap {})",
        document.chars().count(),
        total,
        config.window_size,
        config.overlap
    );

    let client = ExtractionClient::from_config(config)?;
    let callback: ProgressCallback = config
        .progress_callback
        .clone()
        .unwrap_or_else(|| Arc::new(NoopProgressCallback));
    callback.on_run_start(total);

    // ── Step 2: Primary pass ─────────────────────────────────────────────
    let extraction_start = Instant::now();
    let mut results = Vec::with_capacity(total);
    for w in &windows {
        check_cancelled(&config.cancel_flag, w.index, total)?;
        callback.on_window_start(w.index, total);
        let result = extract_window(&client, w, None, false).await;
        report_window(&callback, &result, total);
        results.push(result);
    }

    // ── Step 3: Retry sweep ──────────────────────────────────────────────
    let mut swept_windows = 0;
    let mut recovered_by_sweep = 0;
    if config.retry_sweep {
        let to_sweep: Vec<usize> = results
            .iter()
            .filter(|r| needs_sweep(r))
            .map(|r| r.index)
            .collect();

        if !to_sweep.is_empty() {
            info!(
                "Retry sweep over {} windows at temperature {}",
                to_sweep.len(),
                config.retry_temperature
            );
            callback.on_sweep_start(to_sweep.len());
        }

        for idx in to_sweep {
            check_cancelled(&config.cancel_flag, total, total)?;
            swept_windows += 1;
            callback.on_window_start(idx, total);
            let retry = extract_window(
                &client,
                &windows[idx],
                Some(config.retry_temperature),
                true,
            )
            .await;
            if retry.outcome == ExtractionOutcome::Parsed && !retry.candidates.is_empty() {
                debug!("Window {}: sweep recovered {} candidates", idx, retry.candidates.len());
                recovered_by_sweep += 1;
                report_window(&callback, &retry, total);
                results[idx] = retry;
            }
        }
    }
    let extraction_duration_ms = extraction_start.elapsed().as_millis() as u64;

    // ── Step 4: Reconcile ────────────────────────────────────────────────
    let candidates: Vec<CandidateQuestion> = results
        .iter()
        .flat_map(|r| r.candidates.iter().cloned())
        .collect();
    let numbering = numbering_report(&candidates);
    if !numbering.missing.is_empty() {
        warn!(
            "Numbering gaps up to {}: missing {:?}",
            numbering.max_number, numbering.missing
        );
    }

    let reconciliation = Reconciler::from_config(config).reconcile(exam_id, &candidates);
    callback.on_run_complete(total, reconciliation.questions.len());

    // ── Step 5: Persist ──────────────────────────────────────────────────
    let persistence = persist_all(&reconciliation.questions, sink).await;

    // ── Step 6: Stats ────────────────────────────────────────────────────
    let stats = ExtractionStats {
        document_chars: document.chars().count(),
        total_windows: total,
        failed_windows: results.iter().filter(|r| r.outcome.is_failure()).count(),
        skipped_windows: results
            .iter()
            .filter(|r| r.outcome == ExtractionOutcome::Skipped)
            .count(),
        swept_windows,
        recovered_by_sweep,
        total_candidates: candidates.len(),
        placeholder_candidates: candidates.iter().filter(|c| c.is_placeholder()).count(),
        filtered: reconciliation.filtered_total(),
        duplicates: reconciliation.duplicates,
        merged_fields: reconciliation.merged_fields,
        question_count: reconciliation.questions.len(),
        saved: persistence.saved(),
        failed_saves: persistence.failed(),
        extraction_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Harvest complete: {} questions from {} windows ({} failed), {} saved, {}ms total",
        stats.question_count,
        stats.total_windows,
        stats.failed_windows,
        stats.saved,
        stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        exam_id: exam_id.to_string(),
        categories: category_counts(&reconciliation.questions),
        questions: reconciliation.questions,
        windows: results,
        filtered: reconciliation.filtered,
        numbering,
        persistence,
        stats,
    })
}

fn check_cancelled(flag: &CancelFlag, completed: usize, total: usize) -> Result<(), HarvestError> {
    if flag.is_cancelled() {
        warn!("Cancelled after {}/{} windows", completed, total);
        return Err(HarvestError::Cancelled { completed, total });
    }
    Ok(())
}

/// Windows whose primary result is worth a second pass.
fn needs_sweep(result: &WindowResult) -> bool {
    match result.outcome {
        ExtractionOutcome::ParseFailure | ExtractionOutcome::TransportFailure => true,
        ExtractionOutcome::Parsed => result.candidates.is_empty(),
        ExtractionOutcome::Unconfigured | ExtractionOutcome::Skipped => false,
    }
}

async fn extract_window(
    client: &ExtractionClient,
    w: &Window,
    temperature: Option<f32>,
    swept: bool,
) -> WindowResult {
    let started = Instant::now();
    let span = info_span!("window", index = w.index, swept);
    let extraction = client
        .extract_detailed(&w.text, temperature, 0)
        .instrument(span)
        .await;
    to_window_result(w, extraction, swept, started.elapsed().as_millis() as u64)
}

fn to_window_result(
    w: &Window,
    extraction: WindowExtraction,
    swept: bool,
    duration_ms: u64,
) -> WindowResult {
    let error = extraction.window_error(w.index);
    WindowResult {
        index: w.index,
        start: w.start,
        end: w.end,
        outcome: extraction.outcome,
        attempts: extraction.attempts,
        strategy: extraction.strategy.map(str::to_string),
        envelope: extraction.envelope,
        swept,
        duration_ms,
        error,
        candidates: extraction.candidates,
    }
}

fn report_window(callback: &ProgressCallback, result: &WindowResult, total: usize) {
    match &result.error {
        Some(e) if result.outcome.is_failure() => {
            warn!("{}", e);
            callback.on_window_error(result.index, total, &e.to_string());
        }
        _ => {
            debug!(
                "Window {}/{}: {} candidates ({:?}, {} attempts, {}ms)",
                result.index + 1,
                total,
                result.candidates.len(),
                result.outcome,
                result.attempts,
                result.duration_ms
            );
            callback.on_window_complete(result.index, total, result.candidates.len());
        }
    }
}
