//! Error types for the exam-harvest library.
//!
//! Four error types reflect four distinct failure scopes:
//!
//! * [`HarvestError`]: **Fatal**: the run cannot proceed at all (document
//!   missing or unreadable, bad configuration, no exam id, cancelled).
//!   Returned as `Err(HarvestError)` from the top-level `harvest*` functions.
//!
//! * [`WindowError`]: **Non-fatal**: one window's extraction degraded to a
//!   placeholder after every attempt failed. Stored inside
//!   [`crate::output::WindowResult`]; the run continues.
//!
//! * [`TransportError`]: a single attempt against the extraction service
//!   failed. Always retried by the extraction client.
//!
//! * [`PersistError`]: a single record could not be saved. Recorded in the
//!   [`crate::output::SaveReport`] and skipped.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the exam-harvest library.
///
/// Window-level failures use [`WindowError`] and are stored in
/// [`crate::output::WindowResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum HarvestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// A plain-text input could not be decoded as UTF-8.
    #[error("Text document '{path}' is not valid UTF-8")]
    NotUtf8 { path: PathBuf },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Text extraction needs a pdfium shared library. You can:\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium (file or containing directory).\n\
  • Place libpdfium next to the binary's working directory.\n\
  • Feed a pre-extracted .txt document instead of a PDF.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Request errors ────────────────────────────────────────────────────
    /// The document produced no text at all; there is nothing to window.
    #[error("Document '{source_name}' contains no extractable text")]
    EmptyDocument { source_name: String },

    /// No target exam was given; questions would have no owner.
    #[error("Missing exam id: every extracted question must belong to an exam")]
    MissingExamId,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or file validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Run control ───────────────────────────────────────────────────────
    /// The cancel flag was raised between windows.
    #[error("Extraction cancelled after {completed}/{total} windows")]
    Cancelled { completed: usize, total: usize },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single window.
///
/// Stored alongside [`crate::output::WindowResult`] when a window's
/// extraction degraded to a placeholder. The run always continues.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum WindowError {
    /// Every attempt failed at the transport level.
    #[error("Window {window}: extraction service failed after {attempts} attempts: {detail}")]
    TransportFailed {
        window: usize,
        attempts: u32,
        detail: String,
    },

    /// Responses arrived but none could be recovered into questions.
    #[error("Window {window}: no parseable questions after {attempts} attempts")]
    ParseFailed { window: usize, attempts: u32 },

    /// No endpoint or credential is configured; a canned example was used.
    #[error("Window {window}: extraction service not configured")]
    NotConfigured { window: usize },
}

/// A single failed attempt against the extraction service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection refused, DNS failure, body read failure, …
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The service answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl TransportError {
    /// Whether the extraction client should try again. Currently always true,
    /// 4xx statuses included.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout { .. } => true,
            TransportError::Status { .. } => true,
        }
    }
}

/// A single record could not be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
    /// The underlying store could not be written.
    #[error("write failed: {0}")]
    Write(String),

    /// The record could not be serialised.
    #[error("serialisation failed: {0}")]
    Serialize(String),

    /// The store refused the record (constraint violation, validation, …).
    #[error("rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_display() {
        let e = HarvestError::Cancelled {
            completed: 3,
            total: 10,
        };
        assert!(e.to_string().contains("3/10"), "got: {e}");
    }

    #[test]
    fn empty_document_display() {
        let e = HarvestError::EmptyDocument {
            source_name: "paper.pdf".into(),
        };
        assert!(e.to_string().contains("paper.pdf"));
    }

    #[test]
    fn window_error_display() {
        let e = WindowError::TransportFailed {
            window: 2,
            attempts: 4,
            detail: "HTTP 503: overloaded".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Window 2"));
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn window_error_serialises() {
        let e = WindowError::ParseFailed {
            window: 1,
            attempts: 4,
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: WindowError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn transport_errors_are_retryable() {
        assert!(TransportError::Network("refused".into()).is_retryable());
        assert!(TransportError::Timeout { secs: 100 }.is_retryable());
        assert!(TransportError::Status {
            status: 500,
            body: String::new()
        }
        .is_retryable());
    }

    #[test]
    fn status_display() {
        let e = TransportError::Status {
            status: 429,
            body: "quota".into(),
        };
        assert_eq!(e.to_string(), "HTTP 429: quota");
    }
}
