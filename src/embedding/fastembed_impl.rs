//! FastEmbedEmbedder: local ONNX embedding backend behind the `embeddings` feature

use super::{Embedder, EmbeddingError};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

/// Production embedder backed by fastembed (ONNX Runtime).
///
/// `TextEmbedding::embed` needs `&mut self` and is CPU-bound, so the model
/// sits behind a `Mutex` and inference runs on the blocking pool.
pub struct FastEmbedEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    name: String,
}

impl FastEmbedEmbedder {
    pub fn new(model: EmbeddingModel) -> Result<Self, EmbeddingError> {
        let name = format!("{:?}", model);
        let options = InitOptions::new(model).with_show_download_progress(false);
        let embedding =
            TextEmbedding::try_new(options).map_err(|e| EmbeddingError::ModelError(e.to_string()))?;
        Ok(Self {
            model: Arc::new(Mutex::new(embedding)),
            name,
        })
    }

    /// Create an embedder with the default model (nomic-embed-text-v1.5).
    pub fn default_model() -> Result<Self, EmbeddingError> {
        Self::new(EmbeddingModel::NomicEmbedTextV15)
    }
}

#[async_trait]
impl Embedder for FastEmbedEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let embeddings = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|e| EmbeddingError::ModelError(e.to_string()))?;
            model
                .embed(texts, None)
                .map_err(|e| EmbeddingError::ModelError(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::ModelError(e.to_string()))??;

        if embeddings.is_empty() {
            return Err(EmbeddingError::EmptyResult);
        }
        Ok(embeddings)
    }
}
