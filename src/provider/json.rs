//! JSON corpus file provider.
//!
//! Reads the array of paper objects written by the discovery step
//! (`papers.json`). The whole file is held in memory; corpora here are in the
//! hundreds to low thousands of papers.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{PaperProvider, ProviderError, ProviderResult};
use crate::models::Paper;

/// Paper provider backed by a JSON array file.
#[derive(Debug, Clone)]
pub struct JsonFilePaperProvider {
    path: PathBuf,
    name: String,
    papers: Vec<Paper>,
    by_id: HashMap<String, usize>,
}

impl JsonFilePaperProvider {
    /// Load and filter the corpus at `path`.
    ///
    /// Papers with a missing or blank abstract are dropped with a debug log.
    ///
    /// # Errors
    /// Returns `ProviderError::IoError` if the file cannot be read and
    /// `ProviderError::ParseError` if it is not a JSON array.
    pub async fn from_file(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = tokio::fs::read_to_string(&path).await?;
        let provider = Self::from_json(&contents, path.display().to_string())?;
        info!(
            "Loaded {} papers from {}",
            provider.papers.len(),
            path.display()
        );
        Ok(Self { path, ..provider })
    }

    /// Build a provider from an in-memory JSON document.
    ///
    /// Entries that do not decode as a paper are dropped with a debug log;
    /// only a document that is not a JSON array fails.
    pub fn from_json(contents: &str, name: impl Into<String>) -> ProviderResult<Self> {
        let entries: Vec<serde_json::Value> = serde_json::from_str(contents)
            .map_err(|e| ProviderError::ParseError(format!("invalid corpus JSON: {}", e)))?;

        let raw = entries
            .into_iter()
            .enumerate()
            .filter_map(|(i, entry)| match serde_json::from_value::<Paper>(entry) {
                Ok(paper) => Some(paper),
                Err(e) => {
                    debug!("Dropping malformed corpus entry {}: {}", i, e);
                    None
                }
            })
            .collect();
        Ok(Self::from_papers(raw, name))
    }

    /// Build a provider from already-parsed papers, applying the same filter.
    pub fn from_papers(raw: Vec<Paper>, name: impl Into<String>) -> Self {
        let total = raw.len();
        let papers: Vec<Paper> = raw
            .into_iter()
            .filter(|paper| {
                let keep = paper.abstract_str().is_some();
                if !keep {
                    debug!("Dropping paper {} without abstract", paper.paper_id);
                }
                keep
            })
            .collect();
        if papers.len() < total {
            debug!("{} of {} papers had no abstract", total - papers.len(), total);
        }

        let by_id = papers
            .iter()
            .enumerate()
            .map(|(i, paper)| (paper.paper_id.clone(), i))
            .collect();

        Self {
            path: PathBuf::new(),
            name: format!("json:{}", name.into()),
            papers,
            by_id,
        }
    }

    /// Source file, empty for in-memory providers.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a paper by id.
    pub fn find(&self, paper_id: &str) -> Option<&Paper> {
        self.by_id.get(paper_id).map(|&i| &self.papers[i])
    }

    /// Papers named by `paper_ids`, in the order given.
    ///
    /// Unknown ids (including papers dropped for lacking an abstract) are
    /// skipped with a debug log; repeated ids are returned once.
    pub fn select<S: AsRef<str>>(&self, paper_ids: &[S]) -> Vec<Paper> {
        let mut seen = HashSet::new();
        paper_ids
            .iter()
            .map(AsRef::as_ref)
            .filter(|id| seen.insert(*id))
            .filter_map(|id| {
                let paper = self.find(id);
                if paper.is_none() {
                    debug!("Paper {} is not in the corpus", id);
                }
                paper.cloned()
            })
            .collect()
    }

    /// All usable papers, in corpus order.
    pub fn papers(&self) -> &[Paper] {
        &self.papers
    }
}

#[async_trait]
impl PaperProvider for JsonFilePaperProvider {
    async fn fetch_papers(&self) -> ProviderResult<Vec<Paper>> {
        Ok(self.papers.clone())
    }

    async fn count_papers(&self) -> ProviderResult<usize> {
        Ok(self.papers.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
