//! FastEmbed cross-encoder reranker.

use super::{RerankError, RerankResult, RerankerProvider};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Cross-encoder reranker running locally through fastembed.
#[derive(Clone)]
pub struct FastEmbedReranker {
    model: Arc<Mutex<TextRerank>>,
    model_name: String,
}

/// Look up a FastEmbed reranker model by a user-facing name.
pub fn parse_reranker_model(name: &str) -> RerankResult<RerankerModel> {
    let key = name.trim().to_ascii_lowercase();
    let key = key.rsplit('/').next().unwrap_or(&key).replace(['-', '_', '.'], "");
    match key.as_str() {
        "bgererankerbase" => Ok(RerankerModel::BGERerankerBase),
        "bgererankerv2m3" => Ok(RerankerModel::BGERerankerV2M3),
        "jinarerankerv1turboen" => Ok(RerankerModel::JINARerankerV1TurboEn),
        _ => Err(RerankError::ConfigError(format!(
            "Unknown FastEmbed reranker model: {}",
            name
        ))),
    }
}

impl FastEmbedReranker {
    /// Load a reranker model.
    ///
    /// # Arguments
    /// * `model` - Optional model to use (defaults to BGERerankerBase)
    /// * `cache_dir` - Optional cache directory for model files
    pub fn new(model: Option<RerankerModel>, cache_dir: Option<PathBuf>) -> RerankResult<Self> {
        let model_type = model.unwrap_or(RerankerModel::BGERerankerBase);
        let model_name = format!("{:?}", model_type);

        let mut init_options = RerankInitOptions::new(model_type);
        if let Some(dir) = cache_dir {
            init_options = init_options.with_cache_dir(dir);
        }

        let reranker = TextRerank::try_new(init_options).map_err(|e| {
            RerankError::ConfigError(format!("Failed to initialize FastEmbed reranker: {}", e))
        })?;

        Ok(Self {
            model: Arc::new(Mutex::new(reranker)),
            model_name,
        })
    }

    /// Load a reranker from a model name as it appears in configuration.
    pub fn from_name(name: &str, cache_dir: Option<PathBuf>) -> RerankResult<Self> {
        Self::new(Some(parse_reranker_model(name)?), cache_dir)
    }
}

#[async_trait]
impl RerankerProvider for FastEmbedReranker {
    async fn score(&self, query: &str, passage: &str) -> RerankResult<f32> {
        let scores = self.score_batch(query, &[passage]).await?;
        scores
            .into_iter()
            .next()
            .ok_or_else(|| RerankError::ModelError("No score produced".to_string()))
    }

    async fn score_batch(&self, query: &str, passages: &[&str]) -> RerankResult<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model.lock().await;
        let ranked = model
            .rerank(query, passages.to_vec(), false, None)
            .map_err(|e| RerankError::ModelError(format!("Reranking failed: {}", e)))?;

        // fastembed returns results sorted by score; put them back in input order
        let mut scores = vec![None; passages.len()];
        for result in ranked {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = Some(result.score);
            }
        }
        scores
            .into_iter()
            .enumerate()
            .map(|(i, score)| {
                score.ok_or_else(|| RerankError::ModelError(format!("No score for passage {}", i)))
            })
            .collect()
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl std::fmt::Debug for FastEmbedReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedReranker")
            .field("model_name", &self.model_name)
            .finish()
    }
}
