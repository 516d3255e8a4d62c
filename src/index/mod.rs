//! Inner-product vector index.
//!
//! [`VectorIndex`] is an append-only, exact (brute-force) nearest-neighbor
//! store. Rows are addressed by insertion position only; callers keep a
//! parallel sequence of records and use the row number to look them up.
//! Vectors are expected to be L2-normalized, which makes the inner product a
//! cosine similarity.
//!
//! The binary artifact is little-endian: a 4-byte magic, a format version,
//! the dimension, the row count, then `rows * dimension` f32 values.

pub mod store;

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

const INDEX_MAGIC: u32 = 0x4956_5250; // "PRVI"
const INDEX_VERSION: u32 = 1;

/// Errors that can occur in the vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A vector did not have the index dimension
    #[error("Dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The binary artifact is not a valid index
    #[error("Corrupt index artifact: {0}")]
    Corrupt(String),

    /// Reading or writing the artifact failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Orders scores highest first, with NaN after every number.
pub fn descending_score(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => b.total_cmp(&a),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    }
}

/// One search hit: a row number and its similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub row: usize,
    pub similarity: f32,
}

/// Exact inner-product index over fixed-dimension vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    /// Row-major vector storage
    data: Vec<f32>,
}

impl VectorIndex {
    /// Create an empty index for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector stored at `row`.
    pub fn row(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Append vectors as new rows, in input order.
    ///
    /// Either every vector is appended or, on a dimension mismatch, none is.
    ///
    /// # Errors
    /// Returns `IndexError::DimensionMismatch` if any vector has the wrong length
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> IndexResult<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    /// Find the `k` rows with the highest inner product with `query`.
    ///
    /// Results are sorted by descending similarity; equal similarities keep
    /// ascending row order. When `k` exceeds the row count every row is
    /// returned.
    ///
    /// # Errors
    /// Returns `IndexError::DimensionMismatch` if the query has the wrong length
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<Neighbor>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut hits: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(row, vector)| Neighbor {
                row,
                similarity: vector.iter().zip(query).map(|(a, b)| a * b).sum(),
            })
            .collect();

        hits.sort_by(|a, b| descending_score(a.similarity, b.similarity).then(a.row.cmp(&b.row)));
        hits.truncate(k);
        Ok(hits)
    }

    /// Serialize the index to `writer`.
    pub fn write_to<W: Write>(&self, mut writer: W) -> IndexResult<()> {
        writer.write_u32::<LittleEndian>(INDEX_MAGIC)?;
        writer.write_u32::<LittleEndian>(INDEX_VERSION)?;
        writer.write_u32::<LittleEndian>(self.dimension as u32)?;
        writer.write_u64::<LittleEndian>(self.len() as u64)?;
        for value in &self.data {
            writer.write_f32::<LittleEndian>(*value)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Deserialize an index previously written with [`VectorIndex::write_to`].
    pub fn read_from<R: Read>(mut reader: R) -> IndexResult<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != INDEX_MAGIC {
            return Err(IndexError::Corrupt(format!("bad magic {:#010x}", magic)));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != INDEX_VERSION {
            return Err(IndexError::Corrupt(format!("unsupported version {}", version)));
        }
        let dimension = reader.read_u32::<LittleEndian>()? as usize;
        let rows = reader.read_u64::<LittleEndian>()? as usize;
        if rows > 0 && dimension == 0 {
            return Err(IndexError::Corrupt(format!("{} rows of dimension 0", rows)));
        }

        let len = rows
            .checked_mul(dimension)
            .ok_or_else(|| IndexError::Corrupt("row count overflows".to_string()))?;
        let mut data = vec![0.0f32; len];
        reader
            .read_f32_into::<LittleEndian>(&mut data)
            .map_err(|e| IndexError::Corrupt(format!("truncated vector data: {}", e)))?;

        Ok(Self { dimension, data })
    }

    /// Serialize the index into a byte buffer.
    pub fn to_bytes(&self) -> IndexResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(20 + self.data.len() * 4);
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Write the index to a file.
    pub fn save(&self, path: &Path) -> IndexResult<()> {
        self.write_to(BufWriter::new(File::create(path)?))
    }

    /// Read an index from a file.
    pub fn load(path: &Path) -> IndexResult<Self> {
        Self::read_from(BufReader::new(File::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::normalized;

    fn unit(values: &[f32]) -> Vec<f32> {
        normalized(values.to_vec())
    }

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new(3);
        index
            .add(&[
                unit(&[1.0, 0.0, 0.0]),
                unit(&[0.0, 1.0, 0.0]),
                unit(&[1.0, 1.0, 0.0]),
                unit(&[0.0, 0.0, 1.0]),
            ])
            .unwrap();
        index
    }

    #[test]
    fn test_add_appends_in_order() {
        let index = sample_index();
        assert_eq!(index.len(), 4);
        assert_eq!(index.row(1), Some(&[0.0, 1.0, 0.0][..]));
        assert!(index.row(4).is_none());
    }

    #[test]
    fn test_add_rejects_wrong_dimension_atomically() {
        let mut index = sample_index();
        let result = index.add(&[vec![1.0, 0.0, 0.0], vec![1.0, 0.0]]);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = sample_index();
        let hits = index.search(&unit(&[1.0, 0.2, 0.0]), 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].row, 0);
        assert_eq!(hits[1].row, 2);
        assert_eq!(hits[2].row, 1);
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn test_search_k_exceeds_rows() {
        let mut index = VectorIndex::new(2);
        index.add(&[unit(&[1.0, 0.0]), unit(&[0.0, 1.0]), unit(&[1.0, 1.0])]).unwrap();
        let hits = index.search(&unit(&[1.0, 0.0]), 5).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_search_ties_keep_row_order() {
        let mut index = VectorIndex::new(2);
        index.add(&[unit(&[0.0, 1.0]), unit(&[1.0, 0.0]), unit(&[1.0, 0.0])]).unwrap();
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits.iter().map(|h| h.row).collect::<Vec<_>>(), vec![1, 2, 0]);
    }

    #[test]
    fn test_nan_rows_sort_last() {
        let mut index = VectorIndex::new(2);
        index.add(&[vec![f32::NAN, 0.0], unit(&[0.0, 1.0]), unit(&[1.0, 0.0])]).unwrap();
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits.iter().map(|h| h.row).collect::<Vec<_>>(), vec![2, 1, 0]);

        assert_eq!(descending_score(1.0, f32::NAN), Ordering::Less);
        assert_eq!(descending_score(f32::NAN, -5.0), Ordering::Greater);
        assert_eq!(descending_score(0.5, 0.5), Ordering::Equal);
    }

    #[test]
    fn test_each_row_finds_itself() {
        let index = sample_index();
        for row in 0..index.len() {
            let query = index.row(row).unwrap().to_vec();
            let hits = index.search(&query, 1).unwrap();
            assert_eq!(hits[0].row, row);
        }
    }

    #[test]
    fn test_search_empty_and_zero_k() {
        let index = VectorIndex::new(3);
        assert!(index.search(&[1.0, 0.0, 0.0], 10).unwrap().is_empty());
        assert!(sample_index().search(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_search_dimension_mismatch() {
        let index = sample_index();
        assert!(matches!(
            index.search(&[1.0, 0.0], 2),
            Err(IndexError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_persisted_index_reproduces_ranking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");
        let index = sample_index();
        index.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded, index);

        let query = unit(&[0.3, 0.9, 0.1]);
        assert_eq!(index.search(&query, 4).unwrap(), loaded.search(&query, 4).unwrap());
    }

    #[test]
    fn test_artifact_layout() {
        let bytes = sample_index().to_bytes().unwrap();
        assert_eq!(bytes.len(), 20 + 4 * 3 * 4);
        assert_eq!(&bytes[0..4], &INDEX_MAGIC.to_le_bytes());
    }

    #[test]
    fn test_read_rejects_garbage() {
        assert!(matches!(
            VectorIndex::read_from(&b"not an index at all, really"[..]),
            Err(IndexError::Corrupt(_))
        ));

        let mut bytes = sample_index().to_bytes().unwrap();
        bytes.truncate(bytes.len() - 5);
        assert!(matches!(
            VectorIndex::read_from(&bytes[..]),
            Err(IndexError::Corrupt(_))
        ));
    }
}
