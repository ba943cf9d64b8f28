//! Embedding provider seam and the label → vector lookup in front of it
//!
//! Uses a trait-based embedding backend (`Embedder`) so production code can
//! use fastembed-rs while tests use deterministic mock embedders.
//! `LabelEmbeddings` caches vectors by label text so identical labels are
//! embedded once and every consumer sees the same vector for the same text,
//! even when the provider itself is not strictly pure.

#[cfg(feature = "embeddings")]
mod fastembed_impl;

#[cfg(feature = "embeddings")]
pub use fastembed_impl::FastEmbedEmbedder;

use crate::config::RetryPolicy;
use crate::retry::{with_retry, Transient};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Error type for embedding operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingError {
    /// The provider could not be reached or is overloaded
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    /// A call did not complete in time
    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),
    /// The provider returned no vector for a text
    #[error("embedding returned no results")]
    EmptyResult,
    /// The provider returned a different number of vectors than texts
    #[error("embedding returned {actual} vectors for {expected} texts")]
    CountMismatch { expected: usize, actual: usize },
    /// Model loading or inference failed
    #[error("embedding model error: {0}")]
    ModelError(String),
}

impl Transient for EmbeddingError {
    fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Unavailable(_) | EmbeddingError::Timeout(_))
    }

    fn timed_out(after: Duration) -> Self {
        EmbeddingError::Timeout(after)
    }
}

/// Trait for embedding text into vectors.
///
/// Implementations handle model loading and inference.
/// fastembed-rs for production, mock for tests.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifies the embedding model.
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, returning one vector per text.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Cached, retrying label embedding lookup.
///
/// Safe to share across concurrent workers: the cache is a `DashMap` and the
/// first vector stored for a label wins.
pub struct LabelEmbeddings {
    embedder: Arc<dyn Embedder>,
    cache: DashMap<String, Arc<[f32]>>,
    retry: RetryPolicy,
    timeout: Duration,
    provider_calls: AtomicUsize,
}

impl LabelEmbeddings {
    pub fn new(embedder: Arc<dyn Embedder>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            embedder,
            cache: DashMap::new(),
            retry,
            timeout,
            provider_calls: AtomicUsize::new(0),
        }
    }

    /// Seed the cache with vectors persisted by an earlier run.
    pub fn with_cached(self, cached: impl IntoIterator<Item = (String, Vec<f32>)>) -> Self {
        for (label, vector) in cached {
            self.cache.insert(label, Arc::from(vector));
        }
        self
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn get(&self, label: &str) -> Option<Arc<[f32]>> {
        self.cache.get(label).map(|v| Arc::clone(v.value()))
    }

    /// Number of cached labels.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Number of batch calls made to the provider (retries included).
    pub fn provider_calls(&self) -> usize {
        self.provider_calls.load(Ordering::Relaxed)
    }

    /// The cache contents, ordered by label.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<f32>> {
        self.cache
            .iter()
            .map(|r| (r.key().clone(), r.value().to_vec()))
            .collect()
    }

    /// Resolve each label to a vector, aligned with `labels`.
    ///
    /// Cached labels are served from the cache; the rest are embedded in a
    /// single batch call with timeout and retry. When that call fails, every
    /// uncached label in the batch gets the error.
    pub async fn resolve(&self, labels: &[String]) -> Vec<Result<Arc<[f32]>, EmbeddingError>> {
        let mut seen = HashSet::new();
        let missing: Vec<String> = labels
            .iter()
            .filter(|l| !self.cache.contains_key(l.as_str()))
            .filter(|l| seen.insert(l.as_str()))
            .cloned()
            .collect();

        let mut failure = None;
        if !missing.is_empty() {
            debug!(count = missing.len(), model = self.model_name(), "embedding uncached labels");
            match self.embed_missing(&missing).await {
                Ok(vectors) => {
                    for (label, vector) in missing.iter().zip(vectors) {
                        self.cache
                            .entry(label.clone())
                            .or_insert_with(|| Arc::from(vector));
                    }
                }
                Err(e) => failure = Some(e),
            }
        }

        labels
            .iter()
            .map(|label| match self.get(label) {
                Some(vector) => Ok(vector),
                None => Err(failure.clone().unwrap_or(EmbeddingError::EmptyResult)),
            })
            .collect()
    }

    /// Ask the provider for the length of its vectors.
    ///
    /// Embeds a throwaway text with the usual timeout and retry. The result
    /// is not cached, so it never reaches the persisted label cache.
    pub async fn output_dimension(&self) -> Result<usize, EmbeddingError> {
        let sample = ["dimension check".to_string()];
        let vectors = self.embed_missing(&sample).await?;
        vectors
            .first()
            .map(Vec::len)
            .ok_or(EmbeddingError::EmptyResult)
    }

    async fn embed_missing(&self, missing: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = with_retry(&self.retry, self.timeout, "embed", || {
            self.provider_calls.fetch_add(1, Ordering::Relaxed);
            self.embedder.embed_batch(missing)
        })
        .await?;

        if vectors.len() != missing.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: missing.len(),
                actual: vectors.len(),
            });
        }
        if vectors.iter().any(Vec::is_empty) {
            return Err(EmbeddingError::EmptyResult);
        }
        Ok(vectors)
    }
}
