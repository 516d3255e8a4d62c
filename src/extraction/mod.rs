//! Full-text extraction from downloaded papers.
//!
//! The index builder only needs "give me the text behind this document"; the
//! [`TextExtractor`] trait is that seam. [`PdfTextExtractor`] is the default
//! implementation, and [`clean_text`] repairs the usual PDF layout damage
//! (hard line breaks, hyphenation, typographic dashes) before chunking.

pub mod fetch;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while extracting text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The document does not exist at the given location
    #[error("Document not found: {0}")]
    NotFound(PathBuf),

    /// The extractor could not read the document
    #[error("Failed to extract text from {path}: {reason}")]
    Failed { path: PathBuf, reason: String },

    /// Extraction succeeded but produced too little text to be useful
    #[error("Extracted text too short: {chars} chars, need at least {min}")]
    TooShort { chars: usize, min: usize },
}

/// Result type for extraction operations.
pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// Turns a stored document into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract cleaned text from the document at `location`.
    async fn extract(&self, location: &Path) -> ExtractionResult<String>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Extracts text from PDF files with `pdf-extract`.
#[derive(Debug, Clone, Default)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, location: &Path) -> ExtractionResult<String> {
        if !location.is_file() {
            return Err(ExtractionError::NotFound(location.to_path_buf()));
        }

        let path = location.to_path_buf();
        // pdf-extract is CPU-bound and may panic on malformed files
        let raw = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
            .await
            .map_err(|e| ExtractionError::Failed {
                path: location.to_path_buf(),
                reason: format!("extractor task failed: {}", e),
            })?
            .map_err(|e| ExtractionError::Failed {
                path: location.to_path_buf(),
                reason: e.to_string(),
            })?;

        let cleaned = clean_text(&raw);
        debug!(
            "Extracted {} chars ({} after cleanup) from {}",
            raw.len(),
            cleaned.len(),
            location.display()
        );
        Ok(cleaned)
    }

    fn name(&self) -> &str {
        "pdf-extract"
    }
}

/// Normalize extracted text.
///
/// Collapses all whitespace runs to single spaces, joins words split by a
/// hyphen at a line break (`"trans-\nformer"` becomes `"transformer"`),
/// replaces en and em dashes with `-`, and trims the result.
pub fn clean_text(text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    let dehyphenated = collapsed.replace("- ", "");
    let dashes = dehyphenated.replace(['\u{2013}', '\u{2014}'], "-");
    collapse_whitespace(&dashes)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
