//! Deterministic in-memory model doubles shared by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::embedding::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
use crate::rerank::{RerankError, RerankResult, RerankerProvider};

fn word_bucket(word: &str, dimension: usize) -> usize {
    // FNV-1a, stable across runs and platforms
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.to_lowercase().bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % dimension as u64) as usize
}

/// Bag-of-words embedder: each word adds 1.0 to a hashed bucket.
///
/// Vectors are intentionally left unnormalized so callers' normalization is
/// exercised.
#[derive(Clone)]
pub struct MockEmbedder {
    dimension: usize,
    state: Arc<Mutex<MockEmbedderState>>,
}

#[derive(Default)]
struct MockEmbedderState {
    batch_calls: Vec<usize>,
    fail: bool,
    drop_last: bool,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: Arc::new(Mutex::new(MockEmbedderState::default())),
        }
    }

    /// Make every call fail.
    pub fn failing(self) -> Self {
        self.state.lock().unwrap().fail = true;
        self
    }

    /// Return one vector fewer than requested from batch calls.
    pub fn dropping_last(self) -> Self {
        self.state.lock().unwrap().drop_last = true;
        self
    }

    /// Sizes of the batches passed to `embed_batch`, in call order.
    pub fn batch_calls(&self) -> Vec<usize> {
        self.state.lock().unwrap().batch_calls.clone()
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        for word in text.split_whitespace() {
            vector[word_bucket(word, self.dimension)] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if self.state.lock().unwrap().fail {
            return Err(EmbeddingError::ModelError("mock embed failure".to_string()));
        }
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let (fail, drop_last) = {
            let mut state = self.state.lock().unwrap();
            state.batch_calls.push(texts.len());
            (state.fail, state.drop_last)
        };
        if fail {
            return Err(EmbeddingError::ModelError("mock embed_batch failure".to_string()));
        }
        let mut vectors: Vec<Vec<f32>> = texts.iter().map(|t| self.vector_for(t)).collect();
        if drop_last {
            vectors.pop();
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedder"
    }
}

/// Reranker that returns fixed scores for known passages and the number of
/// shared words with the query otherwise.
#[derive(Clone, Default)]
pub struct MockReranker {
    scores: HashMap<String, f32>,
    fail: bool,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockReranker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_score(mut self, passage: &str, score: f32) -> Self {
        self.scores.insert(passage.to_string(), score);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Passages passed to `score_batch`, one entry per call.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RerankerProvider for MockReranker {
    async fn score(&self, query: &str, passage: &str) -> RerankResult<f32> {
        if self.fail {
            return Err(RerankError::ModelError("mock rerank failure".to_string()));
        }
        if let Some(score) = self.scores.get(passage) {
            return Ok(*score);
        }
        let query_words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let shared = passage
            .split_whitespace()
            .filter(|w| query_words.contains(&w.to_lowercase()))
            .count();
        Ok(shared as f32)
    }

    async fn score_batch(&self, query: &str, passages: &[&str]) -> RerankResult<Vec<f32>> {
        self.calls
            .lock()
            .unwrap()
            .push(passages.iter().map(|p| p.to_string()).collect());
        let mut scores = Vec::with_capacity(passages.len());
        for passage in passages {
            scores.push(self.score(query, passage).await?);
        }
        Ok(scores)
    }

    fn model_name(&self) -> &str {
        "mock-reranker"
    }
}
