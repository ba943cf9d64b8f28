//! Common test utilities for codebook synthesis tests
//!
//! Deterministic embedders, instrumented stores and fragment builders.

#![allow(dead_code)]

pub mod embedders;
pub mod stores;

pub use embedders::{at_similarity, FlakyEmbedder, UnavailableEmbedder, VectorEmbedder};
pub use stores::{CountingStore, FailAfterStore};

use codebook::{
    CandidateGenerator, CodebookStore, Embedder, Fragment, RetryPolicy, SynthesisConfig,
    Synthesizer,
};
use std::sync::Arc;

/// Retries that do not slow tests down.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
    }
}

pub fn test_config(threshold: f32) -> SynthesisConfig {
    SynthesisConfig::default()
        .with_threshold(threshold)
        .with_retry(fast_retry())
        .with_checkpoint_every(0)
}

/// Fragment carrying pre-generated labels.
pub fn fragment(id: &str, labels: &[&str]) -> Fragment {
    Fragment::new(id, format!("text of {}", id)).with_codes(labels.iter().copied())
}

pub fn open_synthesizer(
    config: SynthesisConfig,
    store: Arc<dyn CodebookStore>,
    generator: Arc<dyn CandidateGenerator>,
    embedder: Arc<dyn Embedder>,
) -> Synthesizer {
    Synthesizer::open(config, store, generator, embedder).expect("synthesizer should open")
}
