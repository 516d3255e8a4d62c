//! Embedding provider abstraction and implementations.
//!
//! This module defines the interface for turning text into dense vectors and
//! provides a local FastEmbed implementation. Vectors are compared by inner
//! product, so everything that goes into an index or is used as a query is
//! L2-normalized first (see [`l2_normalize`]).

pub mod fastembed;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Invalid input text (e.g., empty)
    #[error("Invalid input text: {0}")]
    InvalidInput(String),

    /// Configuration error (e.g., unknown model, model files unavailable)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The model ran but produced unusable output
    #[error("Model error: {0}")]
    ModelError(String),

    /// Other unexpected errors
    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for text embedding providers.
///
/// Implementors generate one vector per input text. Output must be
/// deterministic for a fixed model so that a rebuilt index and a later query
/// land in the same space.
///
/// # Example Usage
/// ```ignore
/// let provider = FastEmbedProvider::default()?;
/// let vectors = provider.embed_batch(&["first chunk", "second chunk"]).await?;
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Errors
    /// Returns `EmbeddingError` if the embedding generation fails
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Generate embeddings for multiple texts in a single batch.
    ///
    /// # Returns
    /// A vector of embedding vectors, in the same order as the input texts
    ///
    /// # Errors
    /// Returns `EmbeddingError` if any embedding generation fails
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Get the dimension of embeddings produced by this provider.
    fn dimension(&self) -> usize;

    /// Get the model name/identifier for this provider.
    fn model_name(&self) -> &str;
}

/// Scale `vector` to unit length in place.
///
/// Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Return a unit-length copy of `vector`.
pub fn normalized(mut vector: Vec<f32>) -> Vec<f32> {
    l2_normalize(&mut vector);
    vector
}
