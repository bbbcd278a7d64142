//! Document text: the single text blob the windower consumes.
//!
//! PDFs go through pdfium's text layer (no OCR, no layout analysis); every
//! page's text is concatenated with `\n` between pages. Plain-text inputs
//! are read verbatim.
//!
//! pdfium is not async-safe, so all of it runs inside `spawn_blocking`.

use crate::error::HarvestError;
use crate::output::DocumentInfo;
use crate::pipeline::input::{DocumentKind, ResolvedInput};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Env var naming the pdfium library file, or the directory holding it.
pub const ENV_PDFIUM_LIB_PATH: &str = "PDFIUM_LIB_PATH";

/// Text of the resolved document plus basic facts about it.
pub async fn load_document(
    input: &ResolvedInput,
    password: Option<&str>,
) -> Result<(String, DocumentInfo), HarvestError> {
    match input.kind() {
        DocumentKind::Text => {
            let text = read_text_file(input.path()).await?;
            let info = DocumentInfo {
                source: input.path().display().to_string(),
                page_count: None,
                title: None,
                author: None,
                char_count: text.chars().count(),
            };
            Ok((text, info))
        }
        DocumentKind::Pdf => {
            let path = input.path().to_path_buf();
            let pwd = password.map(str::to_string);
            tokio::task::spawn_blocking(move || load_pdf_blocking(&path, pwd.as_deref(), true))
                .await
                .map_err(|e| HarvestError::Internal(format!("Text task panicked: {}", e)))?
        }
    }
}

/// Document facts. PDF page text is not extracted, so `char_count` is 0
/// for PDFs.
pub async fn document_info(
    input: &ResolvedInput,
    password: Option<&str>,
) -> Result<DocumentInfo, HarvestError> {
    match input.kind() {
        DocumentKind::Text => Ok(load_document(input, password).await?.1),
        DocumentKind::Pdf => {
            let path = input.path().to_path_buf();
            let pwd = password.map(str::to_string);
            let (_, info) = tokio::task::spawn_blocking(move || {
                load_pdf_blocking(&path, pwd.as_deref(), false)
            })
            .await
            .map_err(|e| HarvestError::Internal(format!("Metadata task panicked: {}", e)))??;
            Ok(info)
        }
    }
}

async fn read_text_file(path: &Path) -> Result<String, HarvestError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => HarvestError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => HarvestError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;
    String::from_utf8(bytes).map_err(|_| HarvestError::NotUtf8 {
        path: path.to_path_buf(),
    })
}

// ── pdfium ───────────────────────────────────────────────────────────────────

/// Bind in order: `PDFIUM_LIB_PATH` (file or directory), the working
/// directory, then the system library.
fn bind_pdfium() -> Result<Pdfium, HarvestError> {
    let mut tried = Vec::new();

    if let Ok(p) = std::env::var(ENV_PDFIUM_LIB_PATH) {
        let p = PathBuf::from(p);
        let lib = if p.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&p)
        } else {
            p
        };
        match Pdfium::bind_to_library(&lib) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(e) => tried.push(format!("{}: {}", lib.display(), e)),
        }
    }

    let local = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&local) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(e) => tried.push(format!("{}: {}", local.display(), e)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(e) => {
            tried.push(format!("system library: {}", e));
            Err(HarvestError::PdfiumBindingFailed(tried.join("; ")))
        }
    }
}

fn map_load_error(e: PdfiumError, path: &Path, password: Option<&str>) -> HarvestError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            HarvestError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            HarvestError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        HarvestError::CorruptPdf {
            path: path.to_path_buf(),
            detail: err_str,
        }
    }
}

fn load_pdf_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    with_text: bool,
) -> Result<(String, DocumentInfo), HarvestError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| map_load_error(e, pdf_path, password))?;

    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    let pages = document.pages();
    let page_count = pages.len() as usize;
    info!("PDF loaded: {} pages", page_count);

    let mut texts = Vec::with_capacity(page_count);
    if with_text {
        for (idx, page) in pages.iter().enumerate() {
            let text = page
                .text()
                .map_err(|e| HarvestError::CorruptPdf {
                    path: pdf_path.to_path_buf(),
                    detail: format!("page {}: {:?}", idx + 1, e),
                })?
                .all();
            debug!("Page {}: {} chars", idx + 1, text.chars().count());
            texts.push(text);
        }
    }
    let text = texts.join("\n");

    let info = DocumentInfo {
        source: pdf_path.display().to_string(),
        page_count: Some(page_count),
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        char_count: text.chars().count(),
    };
    Ok((text, info))
}
