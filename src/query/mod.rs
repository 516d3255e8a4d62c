//! Two-stage retrieval: dense candidate search, cross-encoder rerank, and
//! per-paper aggregation.
//!
//! A [`RetrievalService`] owns one granularity's chunk records and vector
//! index and answers [`SearchQuery`]s against them:
//!
//! 1. Embed the query once and L2-normalize it
//! 2. Fetch the `top_k_raw` nearest chunk rows from the vector index
//! 3. Map rows back to chunk records (row i is record i)
//! 4. Score every (query, chunk text) pair with the reranker
//! 5. Keep the `top_k_final` best by reranker score; equal scores keep their
//!    vector-search order
//! 6. Group the survivors by paper, scoring each paper by its best chunk
//! 7. Return papers by descending score
//!
//! Reranker scores and vector similarities are never mixed: the similarity
//! only decides which chunks are reranked and breaks reranker ties.
//!
//! # Usage
//!
//! ```ignore
//! use paper_rag::query::{RetrievalService, SearchEngine, SearchQuery};
//!
//! let service = RetrievalService::open(embedder, reranker, &store, Granularity::Abstract)?;
//! let query = SearchQuery::new("predictive processing in reading");
//! for paper in service.search(&query).await? {
//!     println!("{} - {:.3}", paper.paper_id, paper.score);
//! }
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::embedding::{normalized, EmbeddingError, EmbeddingProvider};
use crate::index::store::{IndexStore, LoadedIndex, StoreError};
use crate::index::{descending_score, IndexError, VectorIndex};
use crate::models::{ChunkRecord, Granularity, ScoredPaper};
use crate::rerank::{RerankError, RerankerProvider};

/// Default number of final chunks kept after reranking.
pub const DEFAULT_TOP_K_FINAL: usize = 5;

/// Errors that can occur during query processing.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Invalid query parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Query embedding failed
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Candidate reranking failed
    #[error("Rerank error: {0}")]
    Rerank(#[from] RerankError),

    /// Vector search failed
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// The index could not be loaded
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// The loaded index does not fit the service's models or records
    #[error("Index mismatch: {0}")]
    IndexMismatch(String),
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Search query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Free-text research question
    pub query: String,

    /// Candidates fetched from the vector index
    pub top_k_raw: usize,

    /// Candidates kept after reranking
    pub top_k_final: usize,
}

impl SearchQuery {
    /// Create a query with the abstract-level defaults (20 raw, 5 final).
    pub fn new(query: impl Into<String>) -> Self {
        Self::for_granularity(query, Granularity::Abstract)
    }

    /// Create a query with the defaults for `granularity`.
    pub fn for_granularity(query: impl Into<String>, granularity: Granularity) -> Self {
        Self {
            query: query.into(),
            top_k_raw: granularity.default_top_k_raw(),
            top_k_final: DEFAULT_TOP_K_FINAL,
        }
    }

    pub fn with_top_k_raw(mut self, top_k_raw: usize) -> Self {
        self.top_k_raw = top_k_raw;
        self
    }

    pub fn with_top_k_final(mut self, top_k_final: usize) -> Self {
        self.top_k_final = top_k_final;
        self
    }

    /// Check the query text and `1 <= top_k_final <= top_k_raw`.
    ///
    /// # Errors
    /// Returns `QueryError::InvalidQuery` naming the violated condition.
    pub fn validate(&self) -> QueryResult<()> {
        if self.query.trim().is_empty() {
            return Err(QueryError::InvalidQuery("query text is empty".to_string()));
        }
        if self.top_k_raw == 0 {
            return Err(QueryError::InvalidQuery("top_k_raw must be at least 1".to_string()));
        }
        if self.top_k_final == 0 {
            return Err(QueryError::InvalidQuery("top_k_final must be at least 1".to_string()));
        }
        if self.top_k_final > self.top_k_raw {
            return Err(QueryError::InvalidQuery(format!(
                "top_k_final ({}) must not exceed top_k_raw ({})",
                self.top_k_final, self.top_k_raw
            )));
        }
        Ok(())
    }
}

/// Trait for search engines.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Execute a search query and return ranked papers.
    ///
    /// # Returns
    /// Papers sorted by non-increasing score; at most `top_k_final` entries
    ///
    /// # Errors
    /// Returns `QueryError` for invalid parameters or any model or index
    /// failure. There is no partial result.
    async fn search(&self, query: &SearchQuery) -> QueryResult<Vec<ScoredPaper>>;

    /// Granularity this engine searches.
    fn granularity(&self) -> Granularity;
}

/// A chunk fetched by vector search for one query.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Position in vector-search order, 0 = most similar
    pub ann_rank: usize,

    /// Index row, equal to the record's position
    pub row: usize,

    /// Cosine similarity to the query
    pub similarity: f32,

    pub record: &'a ChunkRecord,
}

/// Positions of the `k` highest scores, best first.
///
/// The sort is stable, so equal scores keep their input order.
pub fn select_top(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| descending_score(scores[a], scores[b]));
    order.truncate(k);
    order
}

/// Group selected chunks by paper.
///
/// Each paper's score is the maximum score among its chunks; its chunk ids
/// and texts are kept in the order they appear in `selected`. Papers are
/// returned by descending score, ties in order of first appearance.
pub fn aggregate_by_paper<'a, I>(selected: I) -> Vec<ScoredPaper>
where
    I: IntoIterator<Item = (&'a ChunkRecord, f32)>,
{
    let mut papers: Vec<ScoredPaper> = Vec::new();
    let mut slots: HashMap<&str, usize> = HashMap::new();

    for (record, score) in selected {
        let slot = *slots.entry(record.paper_id.as_str()).or_insert_with(|| {
            papers.push(ScoredPaper {
                paper_id: record.paper_id.clone(),
                score,
                chunk_ids: Vec::new(),
                chunk_texts: Vec::new(),
            });
            papers.len() - 1
        });
        let paper = &mut papers[slot];
        if descending_score(score, paper.score) == Ordering::Less {
            paper.score = score;
        }
        paper.chunk_ids.push(record.chunk_id);
        paper.chunk_texts.push(record.text.clone());
    }

    papers.sort_by(|a, b| descending_score(a.score, b.score));
    papers
}

/// Retrieval service over one granularity's index.
///
/// Models are shared through `Arc`s so that both granularities, and the index
/// builders, can reuse one loaded embedder and reranker.
pub struct RetrievalService<E: ?Sized, R: ?Sized> {
    embedder: Arc<E>,
    reranker: Arc<R>,
    granularity: Granularity,
    chunks: Vec<ChunkRecord>,
    index: VectorIndex,
}

impl<E, R> RetrievalService<E, R>
where
    E: EmbeddingProvider + ?Sized,
    R: RerankerProvider + ?Sized,
{
    /// Create a service over a verified, loaded index.
    ///
    /// # Errors
    /// Returns `QueryError::IndexMismatch` if the index was built with a
    /// different embedding model or dimension than `embedder`.
    pub fn new(embedder: Arc<E>, reranker: Arc<R>, loaded: LoadedIndex) -> QueryResult<Self> {
        let LoadedIndex { manifest, chunks, index } = loaded;
        if manifest.model_name != embedder.model_name() {
            return Err(QueryError::IndexMismatch(format!(
                "{} index was built with '{}' but the query embedder is '{}'",
                manifest.granularity,
                manifest.model_name,
                embedder.model_name()
            )));
        }
        Self::from_parts(embedder, reranker, manifest.granularity, chunks, index)
    }

    /// Load the committed index for `granularity` from `store`.
    pub fn open(embedder: Arc<E>, reranker: Arc<R>, store: &IndexStore, granularity: Granularity) -> QueryResult<Self> {
        let loaded = store.load(granularity)?;
        debug!(
            "Loaded {} index generation {} ({} rows)",
            granularity, loaded.manifest.generation, loaded.manifest.rows
        );
        Self::new(embedder, reranker, loaded)
    }

    /// Create a service from in-memory records and index.
    ///
    /// # Errors
    /// Returns `QueryError::IndexMismatch` if the record and row counts
    /// differ or the index dimension does not match the embedder.
    pub fn from_parts(
        embedder: Arc<E>,
        reranker: Arc<R>,
        granularity: Granularity,
        chunks: Vec<ChunkRecord>,
        index: VectorIndex,
    ) -> QueryResult<Self> {
        if chunks.len() != index.len() {
            return Err(QueryError::IndexMismatch(format!(
                "{} chunk records but {} vector rows",
                chunks.len(),
                index.len()
            )));
        }
        if index.dimension() != embedder.dimension() {
            return Err(QueryError::IndexMismatch(format!(
                "index dimension {} but embedder dimension {}",
                index.dimension(),
                embedder.dimension()
            )));
        }
        Ok(Self {
            embedder,
            reranker,
            granularity,
            chunks,
            index,
        })
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Fetch the vector-search candidates for `query`.
    async fn candidates(&self, query: &SearchQuery) -> QueryResult<Vec<Candidate<'_>>> {
        let query_vector = normalized(self.embedder.embed(&query.query).await?);
        let neighbors = self.index.search(&query_vector, query.top_k_raw)?;

        neighbors
            .into_iter()
            .enumerate()
            .map(|(ann_rank, neighbor)| {
                let record = self.chunks.get(neighbor.row).ok_or_else(|| {
                    QueryError::IndexMismatch(format!("row {} has no chunk record", neighbor.row))
                })?;
                Ok(Candidate {
                    ann_rank,
                    row: neighbor.row,
                    similarity: neighbor.similarity,
                    record,
                })
            })
            .collect()
    }
}

#[async_trait]
impl<E, R> SearchEngine for RetrievalService<E, R>
where
    E: EmbeddingProvider + ?Sized,
    R: RerankerProvider + ?Sized,
{
    async fn search(&self, query: &SearchQuery) -> QueryResult<Vec<ScoredPaper>> {
        query.validate()?;
        if self.is_empty() {
            debug!("{} index is empty", self.granularity);
            return Ok(Vec::new());
        }

        let candidates = self.candidates(query).await?;
        debug!(
            "{} candidates for top_k_raw={} from {} rows",
            candidates.len(),
            query.top_k_raw,
            self.len()
        );

        let passages: Vec<&str> = candidates.iter().map(|c| c.record.text.as_str()).collect();
        let scores = self.reranker.score_batch(&query.query, &passages).await?;
        if scores.len() != candidates.len() {
            return Err(RerankError::ModelError(format!(
                "reranker returned {} scores for {} passages",
                scores.len(),
                candidates.len()
            ))
            .into());
        }

        let selected = select_top(&scores, query.top_k_final);
        let results = aggregate_by_paper(selected.iter().map(|&i| (candidates[i].record, scores[i])));
        debug!(
            "{} chunks kept after rerank, {} papers",
            selected.len(),
            results.len()
        );
        Ok(results)
    }

    fn granularity(&self) -> Granularity {
        self.granularity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{Chunker, ChunkingConfig};
    use crate::embedding::EmbeddingResult;
    use crate::ingestion::{AbstractSource, IndexBuilder};
    use crate::models::Paper;
    use crate::test_support::{MockEmbedder, MockReranker};

    /// Embedder that maps every query to the first basis vector.
    struct FixedEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> EmbeddingResult<Vec<f32>> {
            if self.fail {
                return Err(EmbeddingError::ModelError("Mock embedding failure".to_string()));
            }
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            let mut results = Vec::new();
            for text in texts {
                results.push(self.embed(text).await?);
            }
            Ok(results)
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn record(paper_id: &str, chunk_id: usize, text: &str) -> ChunkRecord {
        ChunkRecord {
            paper_id: paper_id.to_string(),
            chunk_id,
            text: text.to_string(),
        }
    }

    /// Four rows whose vector-search order for any query is r1, r2, r0, r3.
    fn four_rows(chunks: Vec<ChunkRecord>) -> (Vec<ChunkRecord>, VectorIndex) {
        let mut index = VectorIndex::new(4);
        index
            .add(&[
                normalized(vec![0.2, 1.0, 0.0, 0.0]),
                normalized(vec![1.0, 0.0, 0.0, 0.0]),
                normalized(vec![1.0, 1.0, 0.0, 0.0]),
                normalized(vec![0.0, 0.0, 1.0, 0.0]),
            ])
            .unwrap();
        (chunks, index)
    }

    fn service(
        chunks: Vec<ChunkRecord>,
        index: VectorIndex,
        reranker: MockReranker,
    ) -> RetrievalService<FixedEmbedder, MockReranker> {
        RetrievalService::from_parts(
            Arc::new(FixedEmbedder { fail: false }),
            Arc::new(reranker),
            Granularity::Abstract,
            chunks,
            index,
        )
        .unwrap()
    }

    // ===== Query validation =====

    #[test]
    fn test_query_defaults() {
        let q = SearchQuery::new("x");
        assert_eq!((q.top_k_raw, q.top_k_final), (20, 5));
        let q = SearchQuery::for_granularity("x", Granularity::FullText);
        assert_eq!((q.top_k_raw, q.top_k_final), (50, 5));
        assert!(q.validate().is_ok());
    }

    #[test]
    fn test_query_validation() {
        let bad = [
            SearchQuery::new("x").with_top_k_raw(0).with_top_k_final(0),
            SearchQuery::new("x").with_top_k_raw(5).with_top_k_final(0),
            SearchQuery::new("x").with_top_k_raw(2).with_top_k_final(3),
            SearchQuery::new("   "),
        ];
        for q in bad {
            assert!(matches!(q.validate(), Err(QueryError::InvalidQuery(_))), "{:?}", q);
        }
        assert!(SearchQuery::new("x").with_top_k_raw(1).with_top_k_final(1).validate().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_query_is_rejected_before_models_run() {
        let (chunks, index) = four_rows(vec![
            record("a", 0, "r0"),
            record("b", 0, "r1"),
            record("c", 0, "r2"),
            record("d", 0, "r3"),
        ]);
        let reranker = MockReranker::new();
        let svc = service(chunks, index, reranker.clone());
        let q = SearchQuery::new("q").with_top_k_raw(2).with_top_k_final(3);
        assert!(matches!(svc.search(&q).await, Err(QueryError::InvalidQuery(_))));
        assert!(reranker.calls().is_empty());
    }

    // ===== Selection and aggregation =====

    #[test]
    fn test_select_top_is_stable() {
        assert_eq!(select_top(&[0.5, 0.8, 0.5, 0.5], 3), vec![1, 0, 2]);
        assert_eq!(select_top(&[0.1, 0.2], 5), vec![1, 0]);
        assert!(select_top(&[], 3).is_empty());
    }

    #[test]
    fn test_aggregate_max_score_and_selection_order() {
        let a1 = record("A", 1, "a one");
        let b0 = record("B", 0, "b zero");
        let a0 = record("A", 0, "a zero");
        let papers = aggregate_by_paper(vec![(&a1, 0.9), (&b0, 0.7), (&a0, 0.6)]);

        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].paper_id, "A");
        assert!((papers[0].score - 0.9).abs() < 1e-6);
        assert_eq!(papers[0].chunk_ids, vec![1, 0]);
        assert_eq!(papers[0].chunk_texts, vec!["a one", "a zero"]);
        assert_eq!(papers[1].paper_id, "B");
        assert_eq!(papers[1].chunk_ids, vec![0]);
    }

    #[test]
    fn test_aggregate_takes_max_regardless_of_order() {
        let low = record("A", 0, "low");
        let high = record("A", 3, "high");
        let papers = aggregate_by_paper(vec![(&low, -2.0), (&high, 4.5)]);
        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].score, 4.5);
        assert_eq!(papers[0].chunk_ids, vec![0, 3]);
    }

    #[test]
    fn test_nan_scores_rank_last() {
        assert_eq!(select_top(&[f32::NAN, 0.2, -1.0, 0.2], 4), vec![1, 3, 2, 0]);

        let a0 = record("A", 0, "nan");
        let a1 = record("A", 1, "three");
        let b0 = record("B", 0, "nan only");
        let c0 = record("C", 0, "one");
        let papers = aggregate_by_paper(vec![(&a0, f32::NAN), (&b0, f32::NAN), (&a1, 3.0), (&c0, 1.0)]);

        let ids: Vec<_> = papers.iter().map(|p| p.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C", "B"]);
        assert_eq!(papers[0].score, 3.0);
        assert_eq!(papers[0].chunk_ids, vec![0, 1]);
        assert!(papers[2].score.is_nan());
    }

    // ===== End-to-end over fixed vectors =====

    #[tokio::test]
    async fn test_same_paper_chunks_aggregate() {
        let (chunks, index) = four_rows(vec![
            record("pB", 0, "r0"),
            record("pA", 0, "r1"),
            record("pA", 1, "r2"),
            record("pC", 0, "r3"),
        ]);
        let reranker = MockReranker::new()
            .with_score("r0", 0.7)
            .with_score("r1", 0.6)
            .with_score("r2", 0.9)
            .with_score("r3", 0.1);
        let svc = service(chunks, index, reranker);

        let q = SearchQuery::new("q").with_top_k_raw(4).with_top_k_final(3);
        let results = svc.search(&q).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].paper_id, "pA");
        assert!((results[0].score - 0.9).abs() < 1e-6);
        assert_eq!(results[0].chunk_ids, vec![1, 0]);
        assert_eq!(results[1].paper_id, "pB");
        assert!((results[1].score - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_reranker_ties_keep_ann_order() {
        let (chunks, index) = four_rows(vec![
            record("p0", 0, "r0"),
            record("p1", 0, "r1"),
            record("p2", 0, "r2"),
            record("p3", 0, "r3"),
        ]);
        let reranker = MockReranker::new()
            .with_score("r0", 0.5)
            .with_score("r1", 0.5)
            .with_score("r2", 0.8)
            .with_score("r3", 0.5);
        let svc = service(chunks, index, reranker.clone());

        let q = SearchQuery::new("q").with_top_k_raw(4).with_top_k_final(3);
        let ids: Vec<_> = svc
            .search(&q)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.paper_id)
            .collect();
        assert_eq!(ids, vec!["p2", "p1", "p0"]);

        // candidates were reranked in vector-search order
        assert_eq!(reranker.calls(), vec![vec!["r1", "r2", "r0", "r3"]]);
    }

    #[tokio::test]
    async fn test_fewer_rows_than_top_k_raw() {
        let mut index = VectorIndex::new(4);
        index
            .add(&[
                normalized(vec![1.0, 0.0, 0.0, 0.0]),
                normalized(vec![1.0, 1.0, 0.0, 0.0]),
                normalized(vec![0.0, 1.0, 0.0, 0.0]),
            ])
            .unwrap();
        let chunks = vec![record("a", 0, "x"), record("b", 0, "y"), record("c", 0, "z")];
        let reranker = MockReranker::new();
        let svc = service(chunks, index, reranker.clone());

        let q = SearchQuery::new("q").with_top_k_raw(5).with_top_k_final(2);
        let results = svc.search(&q).await.unwrap();
        assert!(results.len() <= 2);
        assert_eq!(reranker.calls()[0].len(), 3);
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_empty() {
        let reranker = MockReranker::new();
        let svc = service(Vec::new(), VectorIndex::new(4), reranker.clone());
        let results = svc.search(&SearchQuery::new("anything")).await.unwrap();
        assert!(results.is_empty());
        assert!(reranker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_model_failures_propagate() {
        let (chunks, index) = four_rows(vec![
            record("a", 0, "r0"),
            record("b", 0, "r1"),
            record("c", 0, "r2"),
            record("d", 0, "r3"),
        ]);
        let svc = RetrievalService::from_parts(
            Arc::new(FixedEmbedder { fail: true }),
            Arc::new(MockReranker::new()),
            Granularity::Abstract,
            chunks.clone(),
            index.clone(),
        )
        .unwrap();
        assert!(matches!(
            svc.search(&SearchQuery::new("q")).await,
            Err(QueryError::Embedding(_))
        ));

        let svc = service(chunks, index, MockReranker::new().failing());
        assert!(matches!(
            svc.search(&SearchQuery::new("q")).await,
            Err(QueryError::Rerank(_))
        ));
    }

    #[test]
    fn test_from_parts_rejects_misaligned_inputs() {
        let (mut chunks, index) = four_rows(vec![
            record("a", 0, "r0"),
            record("b", 0, "r1"),
            record("c", 0, "r2"),
            record("d", 0, "r3"),
        ]);
        chunks.pop();
        let result = RetrievalService::from_parts(
            Arc::new(FixedEmbedder { fail: false }),
            Arc::new(MockReranker::new()),
            Granularity::Abstract,
            chunks,
            index,
        );
        assert!(matches!(result, Err(QueryError::IndexMismatch(_))));

        let result = RetrievalService::from_parts(
            Arc::new(FixedEmbedder { fail: false }),
            Arc::new(MockReranker::new()),
            Granularity::Abstract,
            Vec::new(),
            VectorIndex::new(8),
        );
        assert!(matches!(result, Err(QueryError::IndexMismatch(_))));
    }

    // ===== Built index =====

    fn corpus() -> Vec<Paper> {
        vec![
            Paper::new("reading", "Reading", "eye movements during natural reading predict surprisal effects"),
            Paper::new("memory", "Memory", "working memory capacity limits sentence comprehension in adults"),
            Paper::new("vision", "Vision", "convolutional networks model ventral stream object recognition"),
        ]
    }

    async fn built_store(dir: &std::path::Path, embedder: Arc<MockEmbedder>) -> IndexStore {
        let store = IndexStore::new(dir);
        let chunker = Chunker::new(ChunkingConfig::new(4, 1).unwrap()).unwrap();
        IndexBuilder::new(embedder, chunker, store.clone(), 8)
            .build(&corpus(), &AbstractSource)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_search_over_built_index() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(MockEmbedder::new(64));
        let store = built_store(dir.path(), embedder.clone()).await;

        let svc = RetrievalService::open(embedder, Arc::new(MockReranker::new()), &store, Granularity::Abstract)
            .unwrap();
        assert_eq!(svc.granularity(), Granularity::Abstract);

        let q = SearchQuery::new("working memory limits comprehension")
            .with_top_k_raw(10)
            .with_top_k_final(4);
        let results = svc.search(&q).await.unwrap();

        assert_eq!(results[0].paper_id, "memory");
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for paper in &results {
            let mut ids = paper.chunk_ids.clone();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), paper.chunk_ids.len());
            assert_eq!(paper.chunk_ids.len(), paper.chunk_texts.len());
        }
        let kept: usize = results.iter().map(|p| p.chunk_ids.len()).sum();
        assert_eq!(kept, 4);
    }

    #[tokio::test]
    async fn test_open_rejects_other_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = built_store(dir.path(), Arc::new(MockEmbedder::new(4))).await;

        let result = RetrievalService::open(
            Arc::new(FixedEmbedder { fail: false }),
            Arc::new(MockReranker::new()),
            &store,
            Granularity::Abstract,
        );
        assert!(matches!(result, Err(QueryError::IndexMismatch(_))));

        let missing = RetrievalService::open(
            Arc::new(FixedEmbedder { fail: false }),
            Arc::new(MockReranker::new()),
            &store,
            Granularity::FullText,
        );
        assert!(matches!(missing, Err(QueryError::Store(StoreError::Missing { .. }))));
    }
}
