//! Incremental codebook synthesis
//!
//! Turns a stream of candidate codes into merges and new entries on the
//! persistent codebook, with an audit trail in the ledger.

mod cancel;
mod candidate;
mod pipeline;
mod resolver;
mod summary;

pub use cancel::CancellationToken;
pub use candidate::{Candidate, CandidateOutcome, CandidateReport, CandidateState, ValidationError};
pub use pipeline::Synthesizer;
pub use resolver::{MergeDecision, MergeResolver};
pub use summary::{FailedFragment, InvalidCandidate, MergeTie, RunSummary, UnresolvedCandidate};

use crate::codebook::CodebookError;
use crate::config::ConfigError;
use crate::index::IndexError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors that abort a synthesis run.
///
/// Per-fragment and per-candidate failures are not errors at this level;
/// they are reported in the `RunSummary`.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// The store could not be read or written. The last successful
    /// checkpoint is the recovery point.
    #[error("persistence failed: {0}")]
    Persistence(#[from] StorageError),

    #[error("similarity index failed: {0}")]
    Index(#[from] IndexError),

    #[error("codebook rejected an update: {0}")]
    Codebook(#[from] CodebookError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Stored vectors were produced by another embedding model and are not
    /// comparable with new ones.
    #[error("store was built with embedding model {stored:?}, but {current:?} is configured")]
    EmbeddingModelMismatch { stored: String, current: String },
}
