//! Slide text extraction: PDF bytes → ordered per-page text.
//!
//! [`PageTextExtractor`] is the seam; [`PdfiumTextExtractor`] is the
//! production implementation. pdfium wraps a C++ library with thread-local
//! state, so all work happens inside `spawn_blocking`.

use crate::error::Lecture2AnkiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Text of one PDF page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number.
    pub index: usize,
    pub text: String,
}

/// A non-empty slide as returned by `/extract-text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    pub slide_number: usize,
    pub text: String,
}

/// Given PDF bytes, return the text of every page in order.
#[async_trait]
pub trait PageTextExtractor: Send + Sync {
    async fn extract(&self, pdf: Vec<u8>) -> Result<Vec<PageText>, Lecture2AnkiError>;
}

/// pdfium-backed extractor. Binds (and on first use downloads) the pdfium
/// library through `pdfium-auto`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumTextExtractor;

#[async_trait]
impl PageTextExtractor for PdfiumTextExtractor {
    async fn extract(&self, pdf: Vec<u8>) -> Result<Vec<PageText>, Lecture2AnkiError> {
        ensure_pdf_magic(&pdf)?;
        tokio::task::spawn_blocking(move || extract_blocking(&pdf))
            .await
            .map_err(|e| Lecture2AnkiError::Internal(format!("Extraction task panicked: {e}")))?
    }
}

/// Reject anything that does not start with `%PDF`.
pub fn ensure_pdf_magic(bytes: &[u8]) -> Result<(), Lecture2AnkiError> {
    if bytes.starts_with(b"%PDF") {
        Ok(())
    } else {
        Err(Lecture2AnkiError::NotAPdf {
            magic: bytes.iter().take(8).copied().collect(),
        })
    }
}

fn extract_blocking(pdf: &[u8]) -> Result<Vec<PageText>, Lecture2AnkiError> {
    let pdfium = pdfium_auto::bind_pdfium_silent()
        .map_err(|e| Lecture2AnkiError::PdfiumBindingFailed(e.to_string()))?;

    let document = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| Lecture2AnkiError::CorruptPdf {
            detail: format!("{e:?}"),
        })?;

    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let mut out = Vec::with_capacity(pages.len() as usize);
    for (i, page) in pages.iter().enumerate() {
        let text = page
            .text()
            .map(|t| t.all())
            .map_err(|e| Lecture2AnkiError::CorruptPdf {
                detail: format!("page {}: {e:?}", i + 1),
            })?;
        debug!("Page {}: {} chars", i + 1, text.len());
        out.push(PageText { index: i + 1, text });
    }
    Ok(out)
}

/// Trim every page and drop the ones left empty.
pub fn pages_to_slides(pages: Vec<PageText>) -> Vec<Slide> {
    pages
        .into_iter()
        .filter_map(|p| {
            let text = p.text.trim();
            (!text.is_empty()).then(|| Slide {
                slide_number: p.index,
                text: text.to_string(),
            })
        })
        .collect()
}
