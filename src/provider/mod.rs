//! Paper provider module.
//!
//! This module defines the interface for sourcing the paper corpus that the
//! index builders consume. The discovery step that produces the corpus lives
//! outside this crate; providers only read what it persisted.
//!
//! Entries that cannot be indexed at all (no abstract) are dropped here, at
//! the corpus boundary, so the rest of the pipeline can rely on every paper
//! carrying a non-blank abstract.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Paper;

pub mod json;

/// Errors that can occur when loading papers from a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Failed to read from the data source
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse the data format
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Trait for sourcing paper metadata.
///
/// Implementations return papers in corpus order. That order determines the
/// order of chunk records, and therefore of vector rows, in a built index.
#[async_trait]
pub trait PaperProvider: Send + Sync {
    /// Fetch every usable paper from this provider.
    ///
    /// # Returns
    /// Papers with a non-blank abstract, in corpus order
    ///
    /// # Errors
    /// Returns `ProviderError` if papers cannot be read or parsed
    async fn fetch_papers(&self) -> ProviderResult<Vec<Paper>>;

    /// Fetch at most `limit` papers, useful for quick trial builds.
    ///
    /// # Arguments
    /// * `limit` - Maximum number of papers to fetch
    async fn fetch_papers_limit(&self, limit: usize) -> ProviderResult<Vec<Paper>> {
        let all_papers = self.fetch_papers().await?;
        Ok(all_papers.into_iter().take(limit).collect())
    }

    /// Get the number of usable papers.
    async fn count_papers(&self) -> ProviderResult<usize> {
        self.fetch_papers().await.map(|papers| papers.len())
    }

    /// Get a human-readable name/description of this provider.
    fn name(&self) -> &str;
}
