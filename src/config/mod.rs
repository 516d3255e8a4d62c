//! Runtime configuration.
//!
//! [`RagConfig`] describes where the corpus, PDF cache and index artifacts
//! live, which models to load, and the chunking and search defaults. Every
//! field has a default, so a TOML file only needs the values it changes:
//!
//! ```toml
//! index_dir = "/srv/papers/index"
//! reranker_model = "BGERerankerV2M3"
//!
//! [chunking]
//! max_tokens = 200
//! overlap = 40
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::chunking::{Chunker, ChunkingConfig, ChunkingError};
use crate::index::store::IndexStore;
use crate::ingestion::{DEFAULT_EMBED_BATCH_SIZE, DEFAULT_MIN_FULLTEXT_CHARS};
use crate::models::Granularity;
use crate::query::{SearchQuery, DEFAULT_TOP_K_FINAL};

/// Default FastEmbed embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "AllMiniLML6V2";

/// Default FastEmbed cross-encoder.
pub const DEFAULT_RERANKER_MODEL: &str = "BGERerankerBase";

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("Failed to parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// Chunking parameters are unusable
    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    /// Some other value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Search defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchSettings {
    /// Candidate pool size; unset means the granularity's default
    /// (20 for abstracts, 50 for full text)
    pub top_k_raw: Option<usize>,

    /// Chunks kept after reranking
    pub top_k_final: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            top_k_raw: None,
            top_k_final: DEFAULT_TOP_K_FINAL,
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Root of the data layout
    pub data_dir: PathBuf,

    /// Corpus JSON written by discovery
    pub papers_file: PathBuf,

    /// PDF cache, one `<paperId>.pdf` per paper
    pub pdf_dir: PathBuf,

    /// Index artifact root, one subdirectory per granularity
    pub index_dir: PathBuf,

    /// FastEmbed embedding model name
    pub embedding_model: String,

    /// FastEmbed reranker model name
    pub reranker_model: String,

    /// Model download cache; FastEmbed's default when unset
    pub model_cache_dir: Option<PathBuf>,

    /// HuggingFace `tokenizer.json` for model-token chunking; whitespace
    /// chunking when unset
    pub tokenizer_file: Option<PathBuf>,

    pub chunking: ChunkingConfig,

    pub search: SearchSettings,

    /// Full-text papers with less extracted text than this are skipped
    pub min_fulltext_chars: usize,

    /// Chunk texts per embedding call
    pub embed_batch_size: usize,

    /// Per-download timeout for PDF fetches, in seconds
    pub fetch_timeout_secs: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self::with_data_dir("data")
    }
}

impl RagConfig {
    /// Default configuration with every path under `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            papers_file: data_dir.join("papers.json"),
            pdf_dir: data_dir.join("pdfs"),
            index_dir: data_dir.join("index"),
            data_dir,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            reranker_model: DEFAULT_RERANKER_MODEL.to_string(),
            model_cache_dir: None,
            tokenizer_file: None,
            chunking: ChunkingConfig::default(),
            search: SearchSettings::default(),
            min_fulltext_chars: DEFAULT_MIN_FULLTEXT_CHARS,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            fetch_timeout_secs: 10,
        }
    }

    /// Read a TOML config file.
    ///
    /// # Errors
    /// Returns `ConfigError::Io` or `ConfigError::Parse`. The result is not
    /// validated; call [`validate`](Self::validate) after applying overrides.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&contents).map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn from_toml(contents: &str) -> Result<Self, String> {
        toml::from_str(contents).map_err(|e| e.to_string())
    }

    /// Check every precondition that would otherwise fail mid-run.
    pub fn validate(&self) -> ConfigResult<()> {
        self.chunking.validate()?;
        if self.embed_batch_size == 0 {
            return Err(ConfigError::Invalid("embed_batch_size must be at least 1".to_string()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_secs must be at least 1".to_string()));
        }
        // An explicit pool size applies to every granularity. Without one each
        // granularity uses its own default, which each query checks for itself.
        match self.search.top_k_raw {
            Some(_) => self
                .query(Granularity::Abstract, "validate")
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("search defaults: {}", e)))?,
            None if self.search.top_k_final == 0 => {
                return Err(ConfigError::Invalid("search.top_k_final must be at least 1".to_string()));
            }
            None => {}
        }
        Ok(())
    }

    /// Check that the search defaults form a valid query for `granularity`.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if `top_k_final` exceeds the candidate
    /// pool `granularity` would search with.
    pub fn validate_for(&self, granularity: Granularity) -> ConfigResult<()> {
        self.query(granularity, "validate")
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("{} search defaults: {}", granularity, e)))
    }

    /// A query for `text` carrying the configured defaults for `granularity`.
    pub fn query(&self, granularity: Granularity, text: impl Into<String>) -> SearchQuery {
        SearchQuery::for_granularity(text, granularity)
            .with_top_k_raw(self.search.top_k_raw.unwrap_or(granularity.default_top_k_raw()))
            .with_top_k_final(self.search.top_k_final)
    }

    /// Store rooted at `index_dir`.
    pub fn index_store(&self) -> IndexStore {
        IndexStore::new(&self.index_dir)
    }

    /// Chunker for the configured window and tokenizer.
    pub fn chunker(&self) -> ConfigResult<Chunker> {
        let chunker = match &self.tokenizer_file {
            Some(path) => Chunker::with_tokenizer_file(self.chunking, path)?,
            None => Chunker::new(self.chunking)?,
        };
        Ok(chunker)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
