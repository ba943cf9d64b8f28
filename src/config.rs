//! Synthesis configuration
//!
//! Loaded from YAML; every field has a default so a partial file (or none)
//! is valid.

use crate::codebook::RelabelPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Bounded exponential backoff for calls to external services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the given failed attempt (1-based): doubles each time,
    /// capped at `max_backoff_ms`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

/// Configuration for a synthesis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Minimum cosine similarity (inclusive) to merge into an existing code
    pub merge_threshold: f32,
    /// Matches within this distance of the best similarity count as tied
    pub tie_epsilon: f32,
    /// How canonical labels evolve as synonyms accumulate
    pub relabel: RelabelPolicy,
    /// Concurrent generation/embedding workers
    pub workers: usize,
    /// Timeout for one candidate-generation call, in seconds
    pub generation_timeout_secs: u64,
    /// Timeout for one embedding call, in seconds
    pub embedding_timeout_secs: u64,
    /// Retry policy for candidate generation
    pub generation_retry: RetryPolicy,
    /// Retry policy for embedding
    pub embedding_retry: RetryPolicy,
    /// Persist a checkpoint after this many applied fragments (0 = only at run end)
    pub checkpoint_every: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.90,
            tie_epsilon: 1e-4,
            relabel: RelabelPolicy::MostFrequent,
            workers: 4,
            generation_timeout_secs: 30,
            embedding_timeout_secs: 30,
            generation_retry: RetryPolicy::default(),
            embedding_retry: RetryPolicy::default(),
            checkpoint_every: 25,
        }
    }
}

impl SynthesisConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML configuration file and validate it.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.merge_threshold = threshold;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_relabel(mut self, policy: RelabelPolicy) -> Self {
        self.relabel = policy;
        self
    }

    pub fn with_checkpoint_every(mut self, fragments: usize) -> Self {
        self.checkpoint_every = fragments;
        self
    }

    /// Use the same retry policy for generation and embedding.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.generation_retry = policy.clone();
        self.embedding_retry = policy;
        self
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.merge_threshold) {
            return Err(ConfigError::Invalid(format!(
                "merge_threshold must be within [-1, 1], got {}",
                self.merge_threshold
            )));
        }
        if !(self.tie_epsilon >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tie_epsilon must be non-negative, got {}",
                self.tie_epsilon
            )));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        for (name, policy) in [
            ("generation_retry", &self.generation_retry),
            ("embedding_retry", &self.embedding_retry),
        ] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{}.max_attempts must be at least 1",
                    name
                )));
            }
        }
        Ok(())
    }
}
