//! Candidate generator contract
//!
//! Turning raw text into open codes happens upstream (an LLM service, a human
//! coder). The synthesis pipeline only sees this trait, so upstream
//! nondeterminism stays behind it. Two implementations:
//! - `PrecodedGenerator`: serves labels that arrived with the fragment
//! - `MockGenerator`: preconfigured responses for testing

use crate::fragment::Fragment;
use crate::retry::Transient;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Errors from candidate generation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeneratorError {
    /// The upstream service could not be reached, or timed out
    #[error("generator unavailable: {0}")]
    Unavailable(String),
    /// The upstream service answered with something unusable
    #[error("invalid generator response: {0}")]
    InvalidResponse(String),
}

impl Transient for GeneratorError {
    fn is_transient(&self) -> bool {
        matches!(self, GeneratorError::Unavailable(_))
    }

    fn timed_out(after: Duration) -> Self {
        GeneratorError::Unavailable(format!("timed out after {:?}", after))
    }
}

/// Produces ordered candidate labels for a fragment.
///
/// Implementations return at most a few labels (three by convention), or an
/// empty list when the fragment has nothing to code.
#[async_trait]
pub trait CandidateGenerator: Send + Sync {
    /// Short name used in logs.
    fn id(&self) -> &str;

    async fn generate(&self, fragment: &Fragment) -> Result<Vec<String>, GeneratorError>;
}

/// Serves the labels stored on each fragment.
#[derive(Debug, Default)]
pub struct PrecodedGenerator;

impl PrecodedGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CandidateGenerator for PrecodedGenerator {
    fn id(&self) -> &str {
        "precoded"
    }

    async fn generate(&self, fragment: &Fragment) -> Result<Vec<String>, GeneratorError> {
        Ok(fragment.codes.clone())
    }
}

/// Mock generator for testing: returns preconfigured labels per fragment id.
///
/// Fragments without a registered response fall back to their own `codes`.
pub struct MockGenerator {
    responses: HashMap<String, Result<Vec<String>, GeneratorError>>,
    flaky: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            flaky: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Register labels for a fragment id.
    pub fn with_response<I, S>(mut self, fragment_id: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responses.insert(
            fragment_id.into(),
            Ok(labels.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Register a failure for a fragment id.
    pub fn with_failure(mut self, fragment_id: impl Into<String>, error: GeneratorError) -> Self {
        self.responses.insert(fragment_id.into(), Err(error));
        self
    }

    /// Fail with `Unavailable` for the first `failures` calls on a fragment.
    pub fn with_transient_failures(
        mut self,
        fragment_id: impl Into<String>,
        failures: usize,
    ) -> Self {
        if let Ok(flaky) = self.flaky.get_mut() {
            flaky.insert(fragment_id.into(), failures);
        }
        self
    }

    /// Total calls to `generate`.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandidateGenerator for MockGenerator {
    fn id(&self) -> &str {
        "mock"
    }

    async fn generate(&self, fragment: &Fragment) -> Result<Vec<String>, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut flaky = self
                .flaky
                .lock()
                .map_err(|e| GeneratorError::Unavailable(e.to_string()))?;
            if let Some(remaining) = flaky.get_mut(&fragment.id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(GeneratorError::Unavailable("simulated outage".to_string()));
                }
            }
        }
        match self.responses.get(&fragment.id) {
            Some(response) => response.clone(),
            None => Ok(fragment.codes.clone()),
        }
    }
}
