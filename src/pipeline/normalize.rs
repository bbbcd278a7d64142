//! Normalisation: deterministic cleanup of PDF-extracted text before windowing.
//!
//! PDF text extraction leaves artefacts that waste window space and confuse
//! the model: page counters ("3 / 12"), "Page 3 of 12" footers, Windows line
//! endings, zero-width characters. Every rule here removes or rewrites
//! characters in place; no rule joins lines or reorders text, so question
//! numbering prefixes survive exactly as printed.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so the line-anchored page-counter rule
//! sees `\n` only. Blank-line collapsing runs last because the earlier rules
//! leave empty lines behind.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all normalisation rules to raw document text.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 3. Remove "N / M" page counters on their own line
/// 4. Remove "Page N of M" markers
/// 5. Trim trailing whitespace per line
/// 6. Collapse 3+ consecutive blank lines down to 2
/// 7. Trim leading and trailing blank lines of the whole document
pub fn normalize_document(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = remove_page_counters(&s);
    let s = remove_page_of_markers(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim_matches('\n').to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Page counters ────────────────────────────────────────────────────

static RE_PAGE_COUNTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*\d+[ \t]*/[ \t]*\d+[ \t]*$").unwrap());

fn remove_page_counters(input: &str) -> String {
    RE_PAGE_COUNTER.replace_all(input, "").to_string()
}

// ── Rule 4: "Page N of M" ────────────────────────────────────────────────────

static RE_PAGE_OF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bPage\s*\d+\s*of\s*\d+\b").unwrap());

fn remove_page_of_markers(input: &str) -> String {
    RE_PAGE_OF.replace_all(input, "").to_string()
}

// ── Rule 5: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────
