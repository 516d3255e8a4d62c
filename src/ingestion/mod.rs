//! Index building pipeline.
//!
//! This module turns a paper corpus into a persisted (chunk records, vector
//! index) pair for one granularity. The same [`IndexBuilder`] serves both
//! granularities; only the [`TextSource`] that supplies each paper's text and
//! the artifact directory differ.
//!
//! # Usage
//!
//! ```ignore
//! use paper_rag::ingestion::{AbstractSource, IndexBuilder};
//!
//! let builder = IndexBuilder::new(embedder, chunker, store, 64);
//! let report = builder.build(&papers, &AbstractSource).await?;
//! println!("{} chunks from {} papers", report.chunks_written, report.papers_indexed);
//! ```
//!
//! The pipeline:
//! 1. Resolves each paper's text through the source, skipping papers whose
//!    text is unavailable or too short (logged, never fatal)
//! 2. Chunks the text and assigns per-paper `chunk_id`s starting at 0
//! 3. Embeds every chunk in batches and L2-normalizes the vectors
//! 4. Persists records and vectors together through the [`IndexStore`]

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunking::{Chunker, ChunkingError};
use crate::embedding::{l2_normalize, EmbeddingError, EmbeddingProvider};
use crate::extraction::fetch::pdf_path;
use crate::extraction::{ExtractionError, TextExtractor};
use crate::index::store::{IndexStore, StoreError};
use crate::index::{IndexError, VectorIndex};
use crate::models::{ChunkRecord, Granularity, IndexManifest, Paper};
use crate::provider::{PaperProvider, ProviderError};

/// Default number of chunk texts per embedding call.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 64;

/// Default minimum length of usable extracted full text, in characters.
pub const DEFAULT_MIN_FULLTEXT_CHARS: usize = 500;

/// Errors that abort an index build.
///
/// Per-paper problems are not errors; they are recorded in
/// [`BuildReport::skipped`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// Chunking configuration or tokenizer failure
    #[error("Chunking error: {0}")]
    Chunking(#[from] ChunkingError),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The embedder returned a different number of vectors than texts
    #[error("Embedding batch returned {actual} vectors for {expected} chunks")]
    RowMismatch { expected: usize, actual: usize },

    /// A vector could not be added to the index
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Persisting the built pair failed
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// The corpus could not be loaded
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Invalid builder configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for build operations.
pub type BuildResult<T> = Result<T, BuildError>;

/// Why a paper contributed no text to a build.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The paper has no usable abstract
    #[error("paper has no abstract")]
    MissingAbstract,

    /// Full-text extraction failed or produced too little text
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// The model tokenizer could not encode or decode this paper's text
    #[error("tokenization failed: {0}")]
    Tokenization(String),
}

/// Supplies the text a granularity indexes for each paper.
#[async_trait]
pub trait TextSource: Send + Sync {
    /// Granularity whose artifacts this source feeds.
    fn granularity(&self) -> Granularity;

    /// Resolve the text to chunk for `paper`.
    ///
    /// # Errors
    /// Returns `SourceError` if the paper has no usable text; the builder
    /// skips such papers.
    async fn text_for(&self, paper: &Paper) -> Result<String, SourceError>;
}

/// Indexes paper abstracts.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbstractSource;

#[async_trait]
impl TextSource for AbstractSource {
    fn granularity(&self) -> Granularity {
        Granularity::Abstract
    }

    async fn text_for(&self, paper: &Paper) -> Result<String, SourceError> {
        paper
            .abstract_str()
            .map(str::to_string)
            .ok_or(SourceError::MissingAbstract)
    }
}

/// Indexes text extracted from cached PDFs at `<pdf_dir>/<paperId>.pdf`.
#[derive(Debug, Clone)]
pub struct FullTextSource<X> {
    extractor: X,
    pdf_dir: PathBuf,
    min_chars: usize,
}

impl<X: TextExtractor> FullTextSource<X> {
    /// # Arguments
    /// * `extractor` - Turns a cached PDF into cleaned text
    /// * `pdf_dir` - Directory of the PDF cache
    /// * `min_chars` - Papers whose text is shorter than this are skipped
    pub fn new(extractor: X, pdf_dir: impl Into<PathBuf>, min_chars: usize) -> Self {
        Self {
            extractor,
            pdf_dir: pdf_dir.into(),
            min_chars,
        }
    }
}

#[async_trait]
impl<X: TextExtractor> TextSource for FullTextSource<X> {
    fn granularity(&self) -> Granularity {
        Granularity::FullText
    }

    async fn text_for(&self, paper: &Paper) -> Result<String, SourceError> {
        let path = pdf_path(&self.pdf_dir, &paper.paper_id);
        let text = self.extractor.extract(&path).await?;
        let chars = text.chars().count();
        if chars < self.min_chars {
            return Err(ExtractionError::TooShort {
                chars,
                min: self.min_chars,
            }
            .into());
        }
        Ok(text)
    }
}

/// A paper left out of a build, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPaper {
    pub paper_id: String,
    pub reason: String,
}

/// Summary of one completed build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Number of input papers
    pub papers_seen: usize,

    /// Papers that contributed at least one chunk
    pub papers_indexed: usize,

    /// Papers left out, in corpus order
    pub skipped: Vec<SkippedPaper>,

    /// Chunk records (and vector rows) persisted
    pub chunks_written: usize,

    /// Manifest of the committed pair
    pub manifest: IndexManifest,
}

impl BuildReport {
    /// Identifier of the committed build.
    pub fn generation(&self) -> Uuid {
        self.manifest.generation
    }
}

/// Progress events emitted while building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildProgress {
    /// One paper's text was resolved and chunked (or skipped)
    PaperProcessed,

    /// A batch of chunks was embedded
    ChunksEmbedded(usize),
}

/// Builds and persists the index pair for one granularity at a time.
///
/// The embedder is shared, so one loaded model can serve several builders
/// and the retrieval services.
pub struct IndexBuilder<E: ?Sized> {
    embedder: Arc<E>,
    chunker: Chunker,
    store: IndexStore,
    batch_size: usize,
}

impl<E> IndexBuilder<E>
where
    E: EmbeddingProvider + ?Sized,
{
    /// Create a new builder.
    ///
    /// # Arguments
    /// * `embedder` - Provider used for every chunk
    /// * `chunker` - Validated chunker
    /// * `store` - Where committed pairs are written
    /// * `batch_size` - Chunk texts per embedding call (0 is treated as 1)
    pub fn new(embedder: Arc<E>, chunker: Chunker, store: IndexStore, batch_size: usize) -> Self {
        Self {
            embedder,
            chunker,
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Build and persist the index for `source`'s granularity.
    ///
    /// # Arguments
    /// * `papers` - Corpus in the order chunk records should be written
    /// * `source` - Text source; also selects the artifact directory
    ///
    /// # Returns
    /// A report of what was indexed and skipped
    ///
    /// # Errors
    /// Returns `BuildError` if embedding or persistence fails. The previously
    /// committed pair, if any, is left in place in that case.
    pub async fn build<T>(&self, papers: &[Paper], source: &T) -> BuildResult<BuildReport>
    where
        T: TextSource + ?Sized,
    {
        self.build_with_progress(papers, source, |_| {}).await
    }

    /// Same as [`build`](Self::build), reporting progress through `on_progress`.
    pub async fn build_with_progress<T, F>(
        &self,
        papers: &[Paper],
        source: &T,
        mut on_progress: F,
    ) -> BuildResult<BuildReport>
    where
        T: TextSource + ?Sized,
        F: FnMut(BuildProgress) + Send,
    {
        let granularity = source.granularity();
        info!(
            "Building {} index over {} papers (max_tokens={}, overlap={})",
            granularity,
            papers.len(),
            self.chunker.config().max_tokens,
            self.chunker.config().overlap
        );

        let mut records: Vec<ChunkRecord> = Vec::new();
        let mut skipped = Vec::new();
        let mut papers_indexed = 0;

        for paper in papers {
            match self.chunk_paper(paper, source).await {
                Ok(chunks) if chunks.is_empty() => {
                    warn!("Skipping paper {}: text produced no chunks", paper.paper_id);
                    skipped.push(SkippedPaper {
                        paper_id: paper.paper_id.clone(),
                        reason: "text produced no chunks".to_string(),
                    });
                }
                Ok(chunks) => {
                    debug!("Paper {} -> {} chunks", paper.paper_id, chunks.len());
                    papers_indexed += 1;
                    records.extend(chunks.into_iter().enumerate().map(|(chunk_id, text)| ChunkRecord {
                        paper_id: paper.paper_id.clone(),
                        chunk_id,
                        text,
                    }));
                }
                Err(PaperFailure::Skip(reason)) => {
                    warn!("Skipping paper {}: {}", paper.paper_id, reason);
                    skipped.push(SkippedPaper {
                        paper_id: paper.paper_id.clone(),
                        reason: reason.to_string(),
                    });
                }
                Err(PaperFailure::Fatal(e)) => return Err(e),
            }
            on_progress(BuildProgress::PaperProcessed);
        }

        let index = self.embed_records(&records, &mut on_progress).await?;
        let manifest = self.store.save(
            granularity,
            &records,
            &index,
            self.embedder.model_name(),
            self.chunker.params(),
        )?;

        info!(
            "{} index built: {} papers indexed, {} skipped, {} chunks",
            granularity,
            papers_indexed,
            skipped.len(),
            records.len()
        );

        Ok(BuildReport {
            papers_seen: papers.len(),
            papers_indexed,
            skipped,
            chunks_written: records.len(),
            manifest,
        })
    }

    /// Load the corpus from `provider` and build it.
    pub async fn build_from_provider<P, T>(&self, provider: &P, source: &T) -> BuildResult<BuildReport>
    where
        P: PaperProvider + ?Sized,
        T: TextSource + ?Sized,
    {
        let papers = provider.fetch_papers().await?;
        info!("Loaded {} papers from {}", papers.len(), provider.name());
        self.build(&papers, source).await
    }

    async fn chunk_paper<T>(&self, paper: &Paper, source: &T) -> Result<Vec<String>, PaperFailure>
    where
        T: TextSource + ?Sized,
    {
        let text = source.text_for(paper).await.map_err(PaperFailure::Skip)?;
        self.chunker.chunk(&text).map_err(PaperFailure::from)
    }

    /// Embed every record's text, preserving record order as row order.
    async fn embed_records<F>(&self, records: &[ChunkRecord], on_progress: &mut F) -> BuildResult<VectorIndex>
    where
        F: FnMut(BuildProgress) + Send,
    {
        let mut index = VectorIndex::new(self.embedder.dimension());

        for batch in records.chunks(self.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|r| r.text.as_str()).collect();
            let mut vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != texts.len() {
                return Err(BuildError::RowMismatch {
                    expected: texts.len(),
                    actual: vectors.len(),
                });
            }
            for vector in vectors.iter_mut() {
                l2_normalize(vector);
            }
            index.add(&vectors)?;
            on_progress(BuildProgress::ChunksEmbedded(batch.len()));
        }

        Ok(index)
    }
}

enum PaperFailure {
    Skip(SourceError),
    Fatal(BuildError),
}

impl From<ChunkingError> for PaperFailure {
    /// Tokenizer failures are specific to one paper's text; a bad window
    /// config would fail every paper.
    fn from(e: ChunkingError) -> Self {
        match e {
            ChunkingError::Tokenizer(reason) => PaperFailure::Skip(SourceError::Tokenization(reason)),
            other => PaperFailure::Fatal(other.into()),
        }
    }
}
