//! Core data models for the paper retrieval system.
//!
//! This module contains the records that flow through the pipeline: papers as
//! they come out of discovery, the chunk records that sit parallel to a vector
//! index, the manifest that pairs the two on disk, and the per-paper results
//! returned by a search.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A research paper as persisted by the discovery step.
///
/// Papers are read-only input to the retrieval core. Only `paperId`, `title`
/// and `abstract` are required to build an abstract-level index; the remaining
/// metadata is carried through for display and PDF acquisition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Paper {
    /// Immutable identifier assigned by the discovery source
    #[serde(rename = "paperId")]
    pub paper_id: String,

    /// Paper title
    pub title: String,

    /// Abstract text; papers without one are dropped at the corpus boundary
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,

    /// Discovery source tag (e.g. "s2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Landing page URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Author names in publication order
    #[serde(default, deserialize_with = "null_as_default")]
    pub authors: Vec<String>,

    /// Publication year, when known
    #[serde(default)]
    pub year: Option<i32>,

    /// Citation count reported by the discovery source
    #[serde(rename = "citationCount", default, deserialize_with = "null_as_default")]
    pub citation_count: u64,

    /// arXiv identifier, used as a fallback PDF location
    #[serde(default)]
    pub arxiv_id: Option<String>,

    /// Whether the discovery source flagged the paper as open access
    #[serde(rename = "isOpenAccess", default, deserialize_with = "null_as_default")]
    pub is_open_access: bool,

    /// Direct link to an open-access PDF
    #[serde(default)]
    pub pdf_url: Option<String>,
}

/// Discovery writes `null` for metadata the source did not report.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Paper {
    /// Create a paper with only the fields required for indexing.
    pub fn new(paper_id: impl Into<String>, title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            title: title.into(),
            abstract_text: Some(abstract_text.into()),
            source: None,
            url: None,
            authors: Vec::new(),
            year: None,
            citation_count: 0,
            arxiv_id: None,
            is_open_access: false,
            pdf_url: None,
        }
    }

    /// The abstract, if present and not blank.
    pub fn abstract_str(&self) -> Option<&str> {
        self.abstract_text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }

    /// Where the full-text PDF can be fetched from.
    ///
    /// Prefers the open-access link and falls back to arXiv when the paper
    /// carries an arXiv identifier.
    pub fn pdf_location(&self) -> Option<String> {
        match self.pdf_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Some(url.to_string()),
            _ => self
                .arxiv_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| format!("https://arxiv.org/pdf/{}.pdf", id)),
        }
    }
}

/// One overlapping slice of a paper's text.
///
/// The position of a record in its chunk-record sequence is its row in the
/// paired vector index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Parent paper identifier
    #[serde(rename = "paperId")]
    pub paper_id: String,

    /// 0-based position of this chunk within its parent paper
    pub chunk_id: usize,

    /// Chunk text
    pub text: String,
}

/// Which text layer an index operates over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// Paper abstracts
    Abstract,

    /// Text extracted from the full PDF
    FullText,
}

impl Granularity {
    /// Both granularities, abstract first.
    pub const ALL: [Granularity; 2] = [Granularity::Abstract, Granularity::FullText];

    /// Directory name holding this granularity's artifacts.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Granularity::Abstract => "abstract",
            Granularity::FullText => "fulltext",
        }
    }

    /// Candidate pool size used when the caller does not pick one.
    pub fn default_top_k_raw(&self) -> usize {
        match self {
            Granularity::Abstract => 20,
            Granularity::FullText => 50,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Abstract => write!(f, "abstract"),
            Granularity::FullText => write!(f, "full-text"),
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abstract" | "abs" => Ok(Granularity::Abstract),
            "full-text" | "fulltext" | "full_text" | "full" => Ok(Granularity::FullText),
            other => Err(format!("unknown granularity '{}'", other)),
        }
    }
}

/// A paper in a search result, scored by its best surviving chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredPaper {
    /// Paper identifier
    #[serde(rename = "paperId")]
    pub paper_id: String,

    /// Maximum reranker score among this paper's selected chunks
    pub score: f32,

    /// Selected chunk ids, in selection order
    pub chunk_ids: Vec<usize>,

    /// Selected chunk texts, parallel to `chunk_ids`
    pub chunk_texts: Vec<String>,
}

/// Chunking parameters recorded alongside a built index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkingParams {
    pub max_tokens: usize,
    pub overlap: usize,
    pub tokenizer: TokenizerKind,
}

/// How chunk boundaries were counted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    Whitespace,
    Model,
}

/// Commit record for one persisted (chunk records, vector index) pair.
///
/// The manifest is written last. A reader trusts the pair only if the
/// manifest exists and every count and checksum in it matches the files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    /// Unique id of the build that produced this pair
    pub generation: Uuid,

    /// Granularity of the pair
    pub granularity: Granularity,

    /// Embedding model used for the vectors
    pub model_name: String,

    /// Vector dimension
    pub dimension: usize,

    /// Number of chunk records, equal to the number of index rows
    pub rows: usize,

    /// Chunking parameters used for the build
    pub chunking: ChunkingParams,

    /// When the build finished
    pub built_at: DateTime<Utc>,

    /// Hex SHA-256 of the chunk-record file
    pub chunks_sha256: String,

    /// Hex SHA-256 of the vector index file
    pub vectors_sha256: String,
}
