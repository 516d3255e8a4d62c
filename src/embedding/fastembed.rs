//! FastEmbed embedding provider implementation.
//!
//! This module provides an implementation of the `EmbeddingProvider` trait
//! using the fastembed library for local embedding generation. The model is
//! loaded once when the provider is constructed and shared behind a mutex by
//! every clone of the provider.

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// FastEmbed embedding provider.
#[derive(Clone)]
pub struct FastEmbedProvider {
    /// The embedding model instance (wrapped in Arc<Mutex> for thread-safety)
    model: Arc<Mutex<TextEmbedding>>,

    /// Model identifier
    model_name: String,

    /// Expected dimension of the embedding vectors
    embedding_dimension: usize,
}

/// Look up a FastEmbed embedding model by a user-facing name.
///
/// Accepts the enum variant name (`AllMiniLML6V2`) as well as the common
/// HuggingFace ids (`sentence-transformers/all-MiniLM-L6-v2`).
pub fn parse_embedding_model(name: &str) -> EmbeddingResult<EmbeddingModel> {
    let key = name.trim().to_ascii_lowercase();
    let key = key.rsplit('/').next().unwrap_or(&key).replace(['-', '_', '.'], "");
    match key.as_str() {
        "allminilml6v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "allminilml12v2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "bgesmallenv15" => Ok(EmbeddingModel::BGESmallENV15),
        "bgebaseenv15" => Ok(EmbeddingModel::BGEBaseENV15),
        "bgelargeenv15" => Ok(EmbeddingModel::BGELargeENV15),
        "nomicembedtextv1" => Ok(EmbeddingModel::NomicEmbedTextV1),
        "nomicembedtextv15" => Ok(EmbeddingModel::NomicEmbedTextV15),
        "paraphrasemlminilml12v2" | "paraphrasemultilingualminilml12v2" => {
            Ok(EmbeddingModel::ParaphraseMLMiniLML12V2)
        }
        "paraphrasemlmpnetbasev2" | "paraphrasemultilingualmpnetbasev2" => {
            Ok(EmbeddingModel::ParaphraseMLMpnetBaseV2)
        }
        _ => Err(EmbeddingError::ConfigError(format!(
            "Unknown FastEmbed embedding model: {}",
            name
        ))),
    }
}

fn model_dimension(model: &EmbeddingModel) -> usize {
    match model {
        EmbeddingModel::AllMiniLML6V2 => 384,
        EmbeddingModel::AllMiniLML12V2 => 384,
        EmbeddingModel::BGESmallENV15 => 384,
        EmbeddingModel::BGEBaseENV15 => 768,
        EmbeddingModel::BGELargeENV15 => 1024,
        EmbeddingModel::NomicEmbedTextV1 => 768,
        EmbeddingModel::NomicEmbedTextV15 => 768,
        EmbeddingModel::ParaphraseMLMiniLML12V2 => 384,
        EmbeddingModel::ParaphraseMLMpnetBaseV2 => 768,
        _ => 384,
    }
}

impl FastEmbedProvider {
    /// Create a new FastEmbed embedding provider.
    ///
    /// # Arguments
    /// * `model` - Optional model to use (defaults to AllMiniLML6V2)
    /// * `cache_dir` - Optional cache directory for model files
    ///
    /// # Errors
    /// Returns `EmbeddingError` if model initialization fails
    pub fn new(model: Option<EmbeddingModel>, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let model_type = model.unwrap_or(EmbeddingModel::AllMiniLML6V2);
        let model_name = format!("{:?}", model_type);
        let embedding_dimension = model_dimension(&model_type);

        let mut init_options = InitOptions::new(model_type);
        if let Some(dir) = cache_dir {
            init_options = init_options.with_cache_dir(dir);
        }

        let text_embedding = TextEmbedding::try_new(init_options).map_err(|e| {
            EmbeddingError::ConfigError(format!("Failed to initialize FastEmbed model: {}", e))
        })?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_embedding)),
            model_name,
            embedding_dimension,
        })
    }

    /// Create a provider from a model name as it appears in configuration.
    pub fn from_name(name: &str, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        Self::new(Some(parse_embedding_model(name)?), cache_dir)
    }

    /// Create a new FastEmbed provider with default settings.
    pub fn default() -> EmbeddingResult<Self> {
        Self::new(None, None)
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }

        let model = self.model.lock().await;
        let embeddings = model
            .embed(vec![text.to_string()], None)
            .map_err(|e| EmbeddingError::ModelError(format!("Embedding generation failed: {}", e)))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::ModelError("No embedding generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("All texts must be non-empty".to_string()));
        }

        let model = self.model.lock().await;
        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        let embeddings = model.embed(text_strings, None).map_err(|e| {
            EmbeddingError::ModelError(format!("Batch embedding generation failed: {}", e))
        })?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::ModelError(format!(
                "Model returned {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// TextEmbedding does not implement Debug
impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("embedding_dimension", &self.embedding_dimension)
            .finish()
    }
}
