//! Overlapping fixed-size text chunking.
//!
//! Text is split into tokens and cut into windows of at most `max_tokens`
//! tokens, each window starting `max_tokens - overlap` tokens after the
//! previous one. Tokens are whitespace-separated words by default; a
//! HuggingFace `tokenizer.json` can be supplied to count model subword tokens
//! instead, in which case each window is decoded back to text for storage.
//!
//! ```
//! use paper_rag::chunking::chunk_text;
//!
//! let chunks = chunk_text("a b c d e f g", 4, 1).unwrap();
//! assert_eq!(chunks, vec!["a b c d", "d e f g", "g"]);
//! ```

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokenizers::Tokenizer;

use crate::models::{ChunkingParams, TokenizerKind};

/// Default window size in tokens.
pub const DEFAULT_MAX_TOKENS: usize = 300;

/// Default overlap between consecutive windows in tokens.
pub const DEFAULT_OVERLAP: usize = 50;

/// Errors that can occur while chunking.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Window parameters that would never advance
    #[error("Degenerate chunking config: overlap ({overlap}) must be smaller than max_tokens ({max_tokens})")]
    DegenerateConfig { max_tokens: usize, overlap: usize },

    /// The model tokenizer could not be loaded
    #[error("Failed to load tokenizer: {0}")]
    TokenizerLoad(String),

    /// Encoding or decoding through the model tokenizer failed
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
}

/// Result type for chunking operations.
pub type ChunkingResult<T> = Result<T, ChunkingError>;

/// Window size and overlap, validated before any text is touched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum number of tokens per chunk
    pub max_tokens: usize,

    /// Tokens shared by consecutive chunks
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    /// Create a validated config.
    ///
    /// # Errors
    /// Returns `ChunkingError::DegenerateConfig` unless `0 <= overlap < max_tokens`.
    pub fn new(max_tokens: usize, overlap: usize) -> ChunkingResult<Self> {
        let config = Self { max_tokens, overlap };
        config.validate()?;
        Ok(config)
    }

    /// Check that the window always advances.
    pub fn validate(&self) -> ChunkingResult<()> {
        if self.max_tokens == 0 || self.overlap >= self.max_tokens {
            return Err(ChunkingError::DegenerateConfig {
                max_tokens: self.max_tokens,
                overlap: self.overlap,
            });
        }
        Ok(())
    }

    /// Distance between the starts of consecutive windows.
    pub fn stride(&self) -> usize {
        self.max_tokens - self.overlap
    }
}

/// Token ranges covered by each window over `len` tokens.
///
/// Windows start at 0 and advance by the config's stride while the start is
/// still inside the token sequence. The last window may be shorter.
pub fn window_bounds(len: usize, config: &ChunkingConfig) -> ChunkingResult<Vec<Range<usize>>> {
    config.validate()?;

    let stride = config.stride();
    let mut bounds = Vec::with_capacity(len.div_ceil(stride));
    let mut start = 0;
    while start < len {
        let end = (start + config.max_tokens).min(len);
        bounds.push(start..end);
        start += stride;
    }
    Ok(bounds)
}

/// Chunk `text` by whitespace tokens.
///
/// Convenience wrapper around a whitespace [`Chunker`].
pub fn chunk_text(text: &str, max_tokens: usize, overlap: usize) -> ChunkingResult<Vec<String>> {
    Chunker::new(ChunkingConfig::new(max_tokens, overlap)?)?.chunk(text)
}

/// How text is split into tokens.
#[derive(Clone)]
pub enum ChunkTokenizer {
    /// Whitespace-separated words; chunks are re-joined with single spaces
    Whitespace,

    /// Subword tokens from a HuggingFace tokenizer
    Model(Arc<Tokenizer>),
}

impl std::fmt::Debug for ChunkTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkTokenizer::Whitespace => write!(f, "Whitespace"),
            ChunkTokenizer::Model(_) => write!(f, "Model"),
        }
    }
}

/// Splits text into overlapping token windows.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    tokenizer: ChunkTokenizer,
}

impl Chunker {
    /// Create a whitespace chunker.
    ///
    /// # Errors
    /// Returns `ChunkingError::DegenerateConfig` if the config cannot advance.
    pub fn new(config: ChunkingConfig) -> ChunkingResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            tokenizer: ChunkTokenizer::Whitespace,
        })
    }

    /// Create a chunker that counts subword tokens of a model tokenizer.
    ///
    /// # Arguments
    /// * `config` - Window parameters, in model tokens
    /// * `tokenizer_path` - Path to a HuggingFace `tokenizer.json`
    pub fn with_tokenizer_file(config: ChunkingConfig, tokenizer_path: &Path) -> ChunkingResult<Self> {
        config.validate()?;
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| ChunkingError::TokenizerLoad(format!("{}: {}", tokenizer_path.display(), e)))?;
        Ok(Self {
            config,
            tokenizer: ChunkTokenizer::Model(Arc::new(tokenizer)),
        })
    }

    /// Window parameters.
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Parameters to record in an index manifest.
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams {
            max_tokens: self.config.max_tokens,
            overlap: self.config.overlap,
            tokenizer: match self.tokenizer {
                ChunkTokenizer::Whitespace => TokenizerKind::Whitespace,
                ChunkTokenizer::Model(_) => TokenizerKind::Model,
            },
        }
    }

    /// Split `text` into ordered, overlapping chunks.
    ///
    /// Empty or whitespace-only text yields no chunks. The output depends only
    /// on the input text and the chunker's configuration.
    pub fn chunk(&self, text: &str) -> ChunkingResult<Vec<String>> {
        match &self.tokenizer {
            ChunkTokenizer::Whitespace => {
                let tokens: Vec<&str> = text.split_whitespace().collect();
                Ok(window_bounds(tokens.len(), &self.config)?
                    .into_iter()
                    .map(|range| tokens[range].join(" "))
                    .collect())
            }
            ChunkTokenizer::Model(tokenizer) => {
                let encoding = tokenizer
                    .encode(text, false)
                    .map_err(|e| ChunkingError::Tokenizer(e.to_string()))?;
                let ids = encoding.get_ids();
                window_bounds(ids.len(), &self.config)?
                    .into_iter()
                    .map(|range| {
                        tokenizer
                            .decode(&ids[range], true)
                            .map_err(|e| ChunkingError::Tokenizer(e.to_string()))
                    })
                    .collect()
            }
        }
    }
}
