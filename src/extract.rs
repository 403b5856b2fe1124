//! Page-level text extraction for uploaded documents.
//!
//! PDFs are split into one string per page with `pdf-extract`. Plain-text
//! files are decoded as UTF-8 and split on form feeds, so a text file with no
//! form feed is a single page.

use std::path::Path;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";

/// Page separator for plain-text documents.
const FORM_FEED: char = '\u{000C}';

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("text is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Guess the content type from a file extension.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "txt" | "md" | "text" => Some(MIME_TEXT),
        _ => None,
    }
}

/// Extract per-page text from `bytes` of the given content type.
pub fn extract_pages(bytes: &[u8], content_type: &str) -> Result<Vec<String>, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf_pages(bytes),
        MIME_TEXT => extract_text_pages(bytes),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    if !bytes.starts_with(b"%PDF") {
        return Err(ExtractError::Pdf("missing %PDF header".to_string()));
    }
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

pub fn extract_text_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let text = std::str::from_utf8(bytes)?;
    Ok(text.split(FORM_FEED).map(str::to_string).collect())
}
