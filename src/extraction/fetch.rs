//! PDF acquisition with a local cache keyed by paper id.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::Paper;

/// Timeout applied to each PDF download.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur while acquiring a PDF.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The paper has neither a PDF link nor an arXiv id
    #[error("No PDF location for paper {0}")]
    NoLocation(String),

    /// Network or HTTP status error
    #[error("Download failed for {url}: {reason}")]
    Http { url: String, reason: String },

    /// The response body is not a PDF
    #[error("Response from {0} is not a PDF")]
    NotPdf(String),

    /// Writing the cached file failed
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Downloads a document given its URL.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch_pdf(&self, url: &str) -> FetchResult<Vec<u8>>;
}

/// HTTP fetcher backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpPdfFetcher {
    client: reqwest::Client,
}

impl HttpPdfFetcher {
    /// Create a fetcher with the given per-request timeout.
    pub fn new(timeout: Duration) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("paper-rag/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Http {
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentFetcher for HttpPdfFetcher {
    async fn fetch_pdf(&self, url: &str) -> FetchResult<Vec<u8>> {
        let http_err = |e: reqwest::Error| FetchError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?;
        let bytes = response.bytes().await.map_err(http_err)?;
        Ok(bytes.to_vec())
    }
}

/// Outcome of making a set of papers' PDFs available locally.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Papers whose PDF is now in the cache, in input order
    pub available: Vec<Paper>,

    /// How many of those were already cached
    pub cached: usize,

    /// Papers that could not be fetched, with the reason
    pub failed: Vec<(String, String)>,
}

/// Directory of `<paperId>.pdf` files, filled on demand through a fetcher.
#[derive(Debug, Clone)]
pub struct PdfCache<F> {
    dir: PathBuf,
    fetcher: F,
}

impl<F: DocumentFetcher> PdfCache<F> {
    pub fn new(dir: impl Into<PathBuf>, fetcher: F) -> Self {
        Self {
            dir: dir.into(),
            fetcher,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache location for a paper's PDF.
    pub fn pdf_path(&self, paper_id: &str) -> PathBuf {
        pdf_path(&self.dir, paper_id)
    }

    /// Make one paper's PDF available, downloading it if it is not cached.
    ///
    /// # Returns
    /// The cached path and whether it was already present
    pub async fn ensure(&self, paper: &Paper) -> FetchResult<(PathBuf, bool)> {
        let path = self.pdf_path(&paper.paper_id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("PDF for paper {} already cached", paper.paper_id);
            return Ok((path, true));
        }

        let url = paper
            .pdf_location()
            .ok_or_else(|| FetchError::NoLocation(paper.paper_id.clone()))?;
        debug!("Downloading PDF for paper {} from {}", paper.paper_id, url);
        let bytes = self.fetcher.fetch_pdf(&url).await?;
        if !bytes.starts_with(b"%PDF") {
            return Err(FetchError::NotPdf(url));
        }

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| FetchError::Io { path, source }
        };
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_err(&self.dir))?;
        let partial = self.dir.join(format!(".{}.{}.part", paper.paper_id, Uuid::new_v4()));
        tokio::fs::write(&partial, &bytes).await.map_err(io_err(&partial))?;
        tokio::fs::rename(&partial, &path).await.map_err(io_err(&path))?;

        Ok((path, false))
    }

    /// Make every paper's PDF available. Failures are logged and skipped.
    pub async fn ensure_all(&self, papers: &[Paper]) -> FetchReport {
        let mut report = FetchReport::default();
        for paper in papers {
            match self.ensure(paper).await {
                Ok((_, cached)) => {
                    if cached {
                        report.cached += 1;
                    }
                    report.available.push(paper.clone());
                }
                Err(e) => {
                    warn!("Skipping paper {}: {}", paper.paper_id, e);
                    report.failed.push((paper.paper_id.clone(), e.to_string()));
                }
            }
        }
        info!(
            "{} of {} PDFs available ({} cached, {} failed)",
            report.available.len(),
            papers.len(),
            report.cached,
            report.failed.len()
        );
        report
    }
}

/// Cache location for a paper's PDF under `dir`.
pub fn pdf_path(dir: &Path, paper_id: &str) -> PathBuf {
    dir.join(format!("{}.pdf", paper_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MockFetcher {
        requested: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
        body: Option<Vec<u8>>,
    }

    #[async_trait]
    impl DocumentFetcher for MockFetcher {
        async fn fetch_pdf(&self, url: &str) -> FetchResult<Vec<u8>> {
            self.requested.lock().unwrap().push(url.to_string());
            if self.fail_on.as_deref().is_some_and(|f| url.contains(f)) {
                return Err(FetchError::Http {
                    url: url.to_string(),
                    reason: "404 Not Found".to_string(),
                });
            }
            Ok(self.body.clone().unwrap_or_else(|| b"%PDF-1.7 mock".to_vec()))
        }
    }

    fn paper(id: &str, pdf_url: Option<&str>, arxiv: Option<&str>) -> Paper {
        let mut paper = Paper::new(id, format!("Title {}", id), "abstract");
        paper.pdf_url = pdf_url.map(str::to_string);
        paper.arxiv_id = arxiv.map(str::to_string);
        paper
    }

    #[tokio::test]
    async fn test_downloads_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::default();
        let cache = PdfCache::new(dir.path(), fetcher.clone());
        let p = paper("p1", Some("https://host/p1.pdf"), None);

        let (path, cached) = cache.ensure(&p).await.unwrap();
        assert!(!cached);
        assert_eq!(path, dir.path().join("p1.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7 mock");

        let (_, cached) = cache.ensure(&p).await.unwrap();
        assert!(cached);
        assert_eq!(fetcher.requested.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_arxiv_fallback_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher {
            fail_on: Some("broken".to_string()),
            ..Default::default()
        };
        let cache = PdfCache::new(dir.path(), fetcher.clone());
        let papers = vec![
            paper("a", None, Some("2101.00001")),
            paper("b", None, None),
            paper("c", Some("https://broken/c.pdf"), None),
            paper("d", Some("https://host/d.pdf"), None),
        ];

        let report = cache.ensure_all(&papers).await;
        let ids: Vec<_> = report.available.iter().map(|p| p.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);
        assert_eq!(report.failed.len(), 2);
        assert!(fetcher
            .requested
            .lock()
            .unwrap()
            .contains(&"https://arxiv.org/pdf/2101.00001.pdf".to_string()));
        assert!(!dir.path().join("c.pdf").exists());
    }

    #[tokio::test]
    async fn test_rejects_html_error_page() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher {
            body: Some(b"<html>paywall</html>".to_vec()),
            ..Default::default()
        };
        let cache = PdfCache::new(dir.path(), fetcher);
        let result = cache.ensure(&paper("p", Some("https://host/p.pdf"), None)).await;
        assert!(matches!(result, Err(FetchError::NotPdf(_))));
        assert!(!dir.path().join("p.pdf").exists());
    }
}
