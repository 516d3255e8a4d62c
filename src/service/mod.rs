//! Process-wide service state.
//!
//! Embedding and reranking models are expensive to load. [`ServiceState`]
//! loads them once and hands shared references to every index builder and
//! retrieval service created from it, so both granularities and repeated
//! queries reuse the same model instances.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, RagConfig};
use crate::embedding::fastembed::FastEmbedProvider;
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::ingestion::IndexBuilder;
use crate::models::Granularity;
use crate::query::{QueryResult, RetrievalService, SearchQuery};
use crate::rerank::fastembed::FastEmbedReranker;
use crate::rerank::{RerankError, RerankerProvider};

/// Errors that can occur while setting up services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to load embedding model: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Failed to load reranker model: {0}")]
    Rerank(#[from] RerankError),
}

/// Result type for service setup.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Create an index builder from `config` around an already-loaded embedder.
///
/// # Errors
/// Returns `ServiceError::Config` if the chunking parameters are degenerate
/// or the configured tokenizer cannot be loaded.
pub fn index_builder<E>(config: &RagConfig, embedder: Arc<E>) -> ServiceResult<IndexBuilder<E>>
where
    E: EmbeddingProvider + ?Sized,
{
    Ok(IndexBuilder::new(
        embedder,
        config.chunker()?,
        config.index_store(),
        config.embed_batch_size,
    ))
}

/// Loaded models plus the configuration they were loaded for.
pub struct ServiceState<E: ?Sized, R: ?Sized> {
    config: RagConfig,
    embedder: Arc<E>,
    reranker: Arc<R>,
}

impl<E, R> Clone for ServiceState<E, R>
where
    E: ?Sized,
    R: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            embedder: Arc::clone(&self.embedder),
            reranker: Arc::clone(&self.reranker),
        }
    }
}

impl ServiceState<FastEmbedProvider, FastEmbedReranker> {
    /// Validate `config` and load the configured FastEmbed models.
    ///
    /// Model files are downloaded into the cache directory on first use.
    pub fn load_fastembed(config: RagConfig) -> ServiceResult<Self> {
        config.validate()?;

        info!("Loading embedding model {}", config.embedding_model);
        let embedder = FastEmbedProvider::from_name(&config.embedding_model, config.model_cache_dir.clone())?;
        info!("Loading reranker model {}", config.reranker_model);
        let reranker = FastEmbedReranker::from_name(&config.reranker_model, config.model_cache_dir.clone())?;

        Ok(Self::new(config, Arc::new(embedder), Arc::new(reranker)))
    }
}

impl<E, R> ServiceState<E, R>
where
    E: EmbeddingProvider + ?Sized,
    R: RerankerProvider + ?Sized,
{
    pub fn new(config: RagConfig, embedder: Arc<E>, reranker: Arc<R>) -> Self {
        Self {
            config,
            embedder,
            reranker,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<E> {
        &self.embedder
    }

    pub fn reranker(&self) -> &Arc<R> {
        &self.reranker
    }

    /// Index builder sharing this state's embedder.
    pub fn builder(&self) -> ServiceResult<IndexBuilder<E>> {
        index_builder(&self.config, Arc::clone(&self.embedder))
    }

    /// Retrieval service over the committed `granularity` index.
    pub fn open_search(&self, granularity: Granularity) -> QueryResult<RetrievalService<E, R>> {
        RetrievalService::open(
            Arc::clone(&self.embedder),
            Arc::clone(&self.reranker),
            &self.config.index_store(),
            granularity,
        )
    }

    /// Query for `text` with the configured defaults.
    pub fn query(&self, granularity: Granularity, text: impl Into<String>) -> SearchQuery {
        self.config.query(granularity, text)
    }
}
