//! Paper RAG - two-stage retrieval over research papers.
//!
//! This library retrieves the passages of a paper corpus most relevant to a
//! free-text research question. Retrieval runs at two granularities, paper
//! abstracts and full-text chunks, each with its own persisted index.
//!
//! # Architecture
//!
//! - **models**: Core records (Paper, ChunkRecord, ScoredPaper, IndexManifest)
//! - **chunking**: Overlapping fixed-size token windows
//! - **embedding**: Text embedding providers and vector normalization
//! - **rerank**: Cross-encoder relevance scoring
//! - **index**: Inner-product vector index and paired on-disk persistence
//! - **extraction**: PDF acquisition and text extraction
//! - **provider**: Corpus loading
//! - **ingestion**: Index building for either granularity
//! - **query**: Retrieve, rerank and aggregate
//! - **service**: Models loaded once and shared
//! - **config**: Data layout, model names and defaults
//!
//! # Workflow
//!
//! ## Offline build
//!
//! 1. Load the corpus and drop papers without an abstract
//! 2. Resolve each paper's text (abstract, or extracted PDF text)
//! 3. Chunk the text into overlapping windows
//! 4. Embed and normalize every chunk in batches
//! 5. Persist chunk records and vectors as one committed pair
//!
//! ## Online search
//!
//! 1. Embed the query and fetch the `top_k_raw` nearest chunks
//! 2. Rerank those chunks against the query with a cross-encoder
//! 3. Keep the `top_k_final` best and group them by paper
//! 4. Return papers ordered by their best chunk's score
//!
//! # Example
//!
//! ```ignore
//! use paper_rag::{Granularity, RagConfig, SearchEngine, ServiceState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let state = ServiceState::load_fastembed(RagConfig::default())?;
//!     let service = state.open_search(Granularity::Abstract)?;
//!
//!     let query = state.query(Granularity::Abstract, "prediction during reading");
//!     for paper in service.search(&query).await? {
//!         println!("{}: {:.3} ({} chunks)", paper.paper_id, paper.score, paper.chunk_ids.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod chunking;
pub mod config;
pub mod embedding;
pub mod extraction;
pub mod index;
pub mod ingestion;
pub mod models;
pub mod provider;
pub mod query;
pub mod rerank;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types at the crate root
pub use chunking::{chunk_text, Chunker, ChunkingConfig};
pub use config::RagConfig;
pub use embedding::EmbeddingProvider;
pub use index::store::IndexStore;
pub use index::VectorIndex;
pub use ingestion::{AbstractSource, BuildReport, FullTextSource, IndexBuilder, TextSource};
pub use models::{ChunkRecord, Granularity, IndexManifest, Paper, ScoredPaper};
pub use query::{RetrievalService, SearchEngine, SearchQuery};
pub use rerank::RerankerProvider;
pub use service::ServiceState;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
