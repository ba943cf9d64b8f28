//! Mock embedding providers

use async_trait::async_trait;
use codebook::{Embedder, EmbeddingError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A 2-d unit vector whose cosine similarity to `[1, 0]` is `similarity`.
pub fn at_similarity(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).max(0.0).sqrt()]
}

/// Returns a fixed vector per label; unknown labels are a model error.
#[derive(Default)]
pub struct VectorEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
    embedded: Mutex<Vec<String>>,
    model: Option<String>,
}

impl VectorEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `model` instead of the default model name.
    pub fn named(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn with(mut self, label: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(label.to_string(), vector);
        self
    }

    pub fn insert(&mut self, label: &str, vector: Vec<f32>) {
        self.vectors.insert(label.to_string(), vector);
    }

    /// Number of `embed_batch` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every text sent to the provider, in call order.
    pub fn embedded_texts(&self) -> Vec<String> {
        self.embedded.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for VectorEmbedder {
    fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or("vector-mock")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.embedded.lock().unwrap().extend(texts.iter().cloned());
        texts
            .iter()
            .map(|t| {
                self.vectors
                    .get(t)
                    .cloned()
                    .ok_or_else(|| EmbeddingError::ModelError(format!("no vector for {:?}", t)))
            })
            .collect()
    }
}

/// Fails with `Unavailable` a fixed number of times, then delegates.
pub struct FlakyEmbedder {
    inner: VectorEmbedder,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn new(inner: VectorEmbedder, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky-mock"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(EmbeddingError::Unavailable("503 service unavailable".to_string()));
        }
        self.inner.embed_batch(texts).await
    }
}

/// Always unavailable.
#[derive(Default)]
pub struct UnavailableEmbedder {
    calls: AtomicUsize,
}

impl UnavailableEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for UnavailableEmbedder {
    fn model_name(&self) -> &str {
        "down"
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EmbeddingError::Unavailable("connection refused".to_string()))
    }
}
