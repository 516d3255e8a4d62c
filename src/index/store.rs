//! Paired persistence of chunk records and their vector index.
//!
//! Each granularity owns a directory under the store root:
//!
//! ```text
//! <root>/<abstract|fulltext>/
//!     chunks.json     JSON array of {paperId, chunk_id, text}
//!     vectors.idx     VectorIndex artifact, row i <-> chunks[i]
//!     manifest.json   generation, counts and SHA-256 of both files
//! ```
//!
//! A save writes all three files into a fresh temporary directory, removes
//! the live manifest, renames the data files into place and renames the new
//! manifest last. Readers only trust a pair whose manifest matches both files,
//! so a reader racing a rebuild either fails loudly or sees a complete pair.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::{IndexError, VectorIndex};
use crate::models::{ChunkRecord, ChunkingParams, Granularity, IndexManifest};

const CHUNKS_FILE: &str = "chunks.json";
const VECTORS_FILE: &str = "vectors.idx";
const MANIFEST_FILE: &str = "manifest.json";

/// Errors that can occur while persisting or loading an index pair.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No committed index exists for the granularity
    #[error("No {granularity} index at {path}; build it first")]
    Missing { granularity: Granularity, path: PathBuf },

    /// The files on disk do not form a consistent pair
    #[error("Inconsistent {granularity} index: {reason}")]
    Inconsistent { granularity: Granularity, reason: String },

    /// Chunk records or manifest could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Vector artifact error
    #[error("Vector index error: {0}")]
    Index(#[from] IndexError),

    /// Filesystem error
    #[error("IO error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// A loaded, verified (chunk records, vector index) pair.
#[derive(Debug, Clone)]
pub struct LoadedIndex {
    pub manifest: IndexManifest,
    pub chunks: Vec<ChunkRecord>,
    pub index: VectorIndex,
}

/// On-disk locations of one granularity's artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub chunks: PathBuf,
    pub vectors: PathBuf,
    pub manifest: PathBuf,
}

/// Directory-backed store for index pairs.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    /// Create a store rooted at `root`. Nothing is touched until a save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Artifact locations for `granularity`.
    pub fn paths(&self, granularity: Granularity) -> ArtifactPaths {
        let dir = self.root.join(granularity.dir_name());
        ArtifactPaths {
            chunks: dir.join(CHUNKS_FILE),
            vectors: dir.join(VECTORS_FILE),
            manifest: dir.join(MANIFEST_FILE),
            dir,
        }
    }

    /// Whether a committed pair exists for `granularity`.
    pub fn exists(&self, granularity: Granularity) -> bool {
        self.paths(granularity).manifest.is_file()
    }

    /// Persist `chunks` and `index` as one unit, replacing any previous pair.
    ///
    /// # Arguments
    /// * `granularity` - Which artifact directory to write
    /// * `chunks` - Chunk records; element i describes index row i
    /// * `index` - Vector index built from `chunks`
    /// * `model_name` - Embedding model that produced the vectors
    /// * `chunking` - Chunking parameters used for the records
    ///
    /// # Returns
    /// The committed manifest
    ///
    /// # Errors
    /// Returns `StoreError::Inconsistent` if the record and row counts differ;
    /// nothing is written in that case.
    pub fn save(
        &self,
        granularity: Granularity,
        chunks: &[ChunkRecord],
        index: &VectorIndex,
        model_name: &str,
        chunking: ChunkingParams,
    ) -> StoreResult<IndexManifest> {
        if chunks.len() != index.len() {
            return Err(StoreError::Inconsistent {
                granularity,
                reason: format!("{} chunk records but {} vector rows", chunks.len(), index.len()),
            });
        }

        let paths = self.paths(granularity);
        fs::create_dir_all(&paths.dir).map_err(io_err(&paths.dir))?;

        let generation = Uuid::new_v4();
        let staging = paths.dir.join(format!(".tmp-{}", generation));
        fs::create_dir_all(&staging).map_err(io_err(&staging))?;

        let result = self.stage_and_commit(&paths, &staging, generation, granularity, chunks, index, model_name, chunking);
        if staging.exists() {
            let _ = fs::remove_dir_all(&staging);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn stage_and_commit(
        &self,
        paths: &ArtifactPaths,
        staging: &Path,
        generation: Uuid,
        granularity: Granularity,
        chunks: &[ChunkRecord],
        index: &VectorIndex,
        model_name: &str,
        chunking: ChunkingParams,
    ) -> StoreResult<IndexManifest> {
        let chunk_bytes = serde_json::to_vec_pretty(chunks)?;
        let vector_bytes = index.to_bytes()?;

        let manifest = IndexManifest {
            generation,
            granularity,
            model_name: model_name.to_string(),
            dimension: index.dimension(),
            rows: index.len(),
            chunking,
            built_at: Utc::now(),
            chunks_sha256: sha256_hex(&chunk_bytes),
            vectors_sha256: sha256_hex(&vector_bytes),
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;

        let staged_chunks = staging.join(CHUNKS_FILE);
        let staged_vectors = staging.join(VECTORS_FILE);
        let staged_manifest = staging.join(MANIFEST_FILE);
        fs::write(&staged_chunks, &chunk_bytes).map_err(io_err(&staged_chunks))?;
        fs::write(&staged_vectors, &vector_bytes).map_err(io_err(&staged_vectors))?;
        fs::write(&staged_manifest, &manifest_bytes).map_err(io_err(&staged_manifest))?;

        // Invalidate the live pair before touching its data files.
        if paths.manifest.exists() {
            fs::remove_file(&paths.manifest).map_err(io_err(&paths.manifest))?;
        }
        fs::rename(&staged_chunks, &paths.chunks).map_err(io_err(&paths.chunks))?;
        fs::rename(&staged_vectors, &paths.vectors).map_err(io_err(&paths.vectors))?;
        fs::rename(&staged_manifest, &paths.manifest).map_err(io_err(&paths.manifest))?;

        info!(
            "Committed {} index generation {} ({} rows, dim {})",
            granularity, generation, manifest.rows, manifest.dimension
        );
        Ok(manifest)
    }

    /// Read just the manifest of the committed pair.
    pub fn manifest(&self, granularity: Granularity) -> StoreResult<IndexManifest> {
        let paths = self.paths(granularity);
        let bytes = match fs::read(&paths.manifest) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::Missing {
                    granularity,
                    path: paths.dir,
                })
            }
            Err(e) => return Err(io_err(&paths.manifest)(e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load and verify the committed pair for `granularity`.
    ///
    /// # Errors
    /// Returns `StoreError::Missing` if nothing has been committed and
    /// `StoreError::Inconsistent` if the files do not match the manifest.
    pub fn load(&self, granularity: Granularity) -> StoreResult<LoadedIndex> {
        let manifest = self.manifest(granularity)?;
        let paths = self.paths(granularity);
        let inconsistent = |reason: String| StoreError::Inconsistent { granularity, reason };

        if manifest.granularity != granularity {
            return Err(inconsistent(format!(
                "manifest is for {} index",
                manifest.granularity
            )));
        }

        let chunk_bytes = fs::read(&paths.chunks).map_err(io_err(&paths.chunks))?;
        let vector_bytes = fs::read(&paths.vectors).map_err(io_err(&paths.vectors))?;

        if sha256_hex(&chunk_bytes) != manifest.chunks_sha256 {
            return Err(inconsistent(format!(
                "{} does not match generation {}",
                CHUNKS_FILE, manifest.generation
            )));
        }
        if sha256_hex(&vector_bytes) != manifest.vectors_sha256 {
            return Err(inconsistent(format!(
                "{} does not match generation {}",
                VECTORS_FILE, manifest.generation
            )));
        }

        let chunks: Vec<ChunkRecord> = serde_json::from_slice(&chunk_bytes)?;
        let index = VectorIndex::read_from(&vector_bytes[..])?;

        if chunks.len() != index.len() || index.len() != manifest.rows {
            return Err(inconsistent(format!(
                "{} chunk records, {} vector rows, manifest says {}",
                chunks.len(),
                index.len(),
                manifest.rows
            )));
        }
        if index.dimension() != manifest.dimension {
            return Err(inconsistent(format!(
                "vector dimension {} but manifest says {}",
                index.dimension(),
                manifest.dimension
            )));
        }

        debug!(
            "Loaded {} index generation {} with {} rows",
            granularity, manifest.generation, manifest.rows
        );
        Ok(LoadedIndex {
            manifest,
            chunks,
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenizerKind;

    fn params() -> ChunkingParams {
        ChunkingParams {
            max_tokens: 50,
            overlap: 10,
            tokenizer: TokenizerKind::Whitespace,
        }
    }

    fn records(n: usize) -> Vec<ChunkRecord> {
        (0..n)
            .map(|i| ChunkRecord {
                paper_id: format!("p{}", i / 2),
                chunk_id: i % 2,
                text: format!("chunk text {}", i),
            })
            .collect()
    }

    fn vectors(n: usize) -> VectorIndex {
        let mut index = VectorIndex::new(2);
        let rows: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32, 1.0]).collect();
        index.add(&rows).unwrap();
        index
    }

    #[test]
    fn test_save_then_load_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        assert!(!store.exists(Granularity::Abstract));

        let manifest = store
            .save(Granularity::Abstract, &records(4), &vectors(4), "mock", params())
            .unwrap();
        assert_eq!(manifest.rows, 4);
        assert!(store.exists(Granularity::Abstract));
        assert!(!store.exists(Granularity::FullText));

        let loaded = store.load(Granularity::Abstract).unwrap();
        assert_eq!(loaded.manifest.generation, manifest.generation);
        assert_eq!(loaded.chunks, records(4));
        assert_eq!(loaded.index, vectors(4));
    }

    #[test]
    fn test_chunk_file_is_plain_record_array() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store
            .save(Granularity::FullText, &records(2), &vectors(2), "mock", params())
            .unwrap();
        let raw = fs::read_to_string(store.paths(Granularity::FullText).chunks).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[1]["paperId"], "p0");
        assert_eq!(value[1]["chunk_id"], 1);
    }

    #[test]
    fn test_rebuild_replaces_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let first = store
            .save(Granularity::Abstract, &records(4), &vectors(4), "mock", params())
            .unwrap();
        let second = store
            .save(Granularity::Abstract, &records(2), &vectors(2), "mock", params())
            .unwrap();
        assert_ne!(first.generation, second.generation);

        let loaded = store.load(Granularity::Abstract).unwrap();
        assert_eq!(loaded.chunks.len(), 2);

        let leftovers: Vec<_> = fs::read_dir(store.paths(Granularity::Abstract).dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_mismatched_counts_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let result = store.save(Granularity::Abstract, &records(3), &vectors(2), "mock", params());
        assert!(matches!(result, Err(StoreError::Inconsistent { .. })));
        assert!(!store.exists(Granularity::Abstract));
    }

    #[test]
    fn test_missing_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        assert!(matches!(
            store.load(Granularity::FullText),
            Err(StoreError::Missing { granularity: Granularity::FullText, .. })
        ));
    }

    #[test]
    fn test_detects_swapped_chunk_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store
            .save(Granularity::Abstract, &records(4), &vectors(4), "mock", params())
            .unwrap();

        // Simulate a half-finished rebuild: new chunk file, old vectors and manifest.
        let stale = serde_json::to_vec_pretty(&records(3)).unwrap();
        fs::write(store.paths(Granularity::Abstract).chunks, stale).unwrap();

        assert!(matches!(
            store.load(Granularity::Abstract),
            Err(StoreError::Inconsistent { .. })
        ));
    }

    #[test]
    fn test_detects_tampered_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store
            .save(Granularity::Abstract, &records(2), &vectors(2), "mock", params())
            .unwrap();
        let path = store.paths(Granularity::Abstract).vectors;
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            store.load(Granularity::Abstract),
            Err(StoreError::Inconsistent { .. })
        ));
    }

    #[test]
    fn test_empty_pair_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store
            .save(Granularity::Abstract, &[], &VectorIndex::new(8), "mock", params())
            .unwrap();
        let loaded = store.load(Granularity::Abstract).unwrap();
        assert!(loaded.chunks.is_empty());
        assert!(loaded.index.is_empty());
        assert_eq!(loaded.index.dimension(), 8);
    }
}
