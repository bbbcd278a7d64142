//! Pipeline stages for exam-question harvesting.
//!
//! Each submodule implements exactly one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ text ──▶ normalize ──▶ window ──▶ llm ──────────────▶ reconcile ──▶ persist
//! (URL/path) (pdfium) (cleanup)   (chunks)   (envelope, recover)  (identity)   (sink)
//! ```
//!
//! 1. [`input`]     resolve the user-supplied path or URL to a local file
//! 2. [`text`]      PDF text layer via pdfium in `spawn_blocking`, or a text file verbatim
//! 3. [`normalize`] deterministic cleanup (page counters, CRLF, invisible chars)
//! 4. [`window`]    overlapping fixed-size character windows
//! 5. [`llm`]       per-window request with retry; [`envelope`] unwraps the
//!    response and [`recover`] turns whatever came back into candidates
//! 6. [`reconcile`] filter then deduplicate by [`identity`] signature
//! 7. [`persist`]   hand each final question to a sink

pub mod envelope;
pub mod identity;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod persist;
pub mod reconcile;
pub mod recover;
pub mod text;
pub mod window;
