//! Progress-callback trait for per-window extraction events.
//!
//! Inject an [`Arc<dyn HarvestProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through each window.
//!
//! # Example
//!
//! ```rust
//! use exam_harvest::{HarvestProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl HarvestProgressCallback for CountingCallback {
//!     fn on_window_complete(&self, index: usize, total: usize, candidates: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Window {}/{}: {} candidates", index + 1, total, candidates);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn HarvestProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the harvest pipeline as it processes each window.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Window indices are 0-based.
pub trait HarvestProgressCallback: Send + Sync {
    /// Called once before the first window is sent.
    fn on_run_start(&self, total_windows: usize) {
        let _ = total_windows;
    }

    /// Called just before a window's first request.
    fn on_window_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when a window produced real candidates (possibly zero).
    fn on_window_complete(&self, index: usize, total: usize, candidates: usize) {
        let _ = (index, total, candidates);
    }

    /// Called when a window degraded to a placeholder.
    ///
    /// # Arguments
    /// * `error`: human-readable description of the last failure
    fn on_window_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called before the retry sweep with the number of windows it will re-run.
    fn on_sweep_start(&self, windows: usize) {
        let _ = windows;
    }

    /// Called once after reconciliation.
    ///
    /// # Arguments
    /// * `total_windows`: windows in the document
    /// * `questions`: final question count
    fn on_run_complete(&self, total_windows: usize, questions: usize) {
        let _ = (total_windows, questions);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl HarvestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn HarvestProgressCallback>;
