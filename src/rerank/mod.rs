//! Cross-encoder reranking.
//!
//! A reranker scores a (query, passage) pair jointly. Scores are only
//! comparable with other scores from the same model and have no fixed range;
//! higher means more relevant. They are never mixed with the cosine
//! similarities produced by the vector index.

pub mod fastembed;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while scoring passages.
#[derive(Debug, Error)]
pub enum RerankError {
    /// Configuration error (e.g., unknown model, model files unavailable)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The model failed to score the input
    #[error("Model error: {0}")]
    ModelError(String),
}

/// Result type for reranking operations.
pub type RerankResult<T> = Result<T, RerankError>;

/// Trait for pairwise relevance scorers.
#[async_trait]
pub trait RerankerProvider: Send + Sync {
    /// Score a single (query, passage) pair.
    async fn score(&self, query: &str, passage: &str) -> RerankResult<f32>;

    /// Score many passages against one query.
    ///
    /// # Returns
    /// One score per passage, in input order
    async fn score_batch(&self, query: &str, passages: &[&str]) -> RerankResult<Vec<f32>> {
        let mut scores = Vec::with_capacity(passages.len());
        for passage in passages {
            scores.push(self.score(query, passage).await?);
        }
        Ok(scores)
    }

    /// Get the model name/identifier for this reranker.
    fn model_name(&self) -> &str;
}
