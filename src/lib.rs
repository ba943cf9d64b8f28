//! Codebook: incremental codebook synthesis for qualitative coding
//!
//! Consolidates short "open codes" generated from evidence fragments into a
//! single deduplicated, append-only vocabulary, merging candidates into
//! existing codes by embedding similarity and keeping an audit trail from
//! every code back to the evidence it came from.
//!
//! # Core Concepts
//!
//! - **Candidates**: labels proposed for a fragment by an upstream generator
//! - **Codebook**: canonical codes with stable ids, synonyms and evidence
//! - **Ledger**: which candidates were ingested and where they went
//! - **Synthesizer**: concurrent generation and embedding, single-writer merge
//!
//! # Example
//!
//! ```
//! use codebook::{Codebook, RelabelPolicy};
//!
//! let mut book = Codebook::new();
//! let id = book.create("Sintiendo ansiedad financiera", "F1", vec![0.9, 0.1]).unwrap();
//! book.merge(id, "Sintiendo ansiedad por dinero", "F2", RelabelPolicy::MostFrequent)
//!     .unwrap();
//! assert_eq!(book.get(&id).unwrap().occurrence_count, 2);
//! ```

pub mod codebook;
pub mod config;
pub mod embedding;
pub mod fragment;
pub mod generator;
pub mod index;
pub mod ledger;
pub mod retry;
pub mod storage;
pub mod synthesis;

pub use codebook::{
    CanonicalCode, CodeId, Codebook, CodebookError, CodebookExport, CodebookResult,
    ExportedCode, RelabelPolicy, SynonymCount, SynonymLabels,
};
pub use config::{ConfigError, RetryPolicy, SynthesisConfig};
pub use embedding::{Embedder, EmbeddingError, LabelEmbeddings};
pub use fragment::{read_fragments_jsonl, Fragment, FragmentBatch};
pub use generator::{CandidateGenerator, GeneratorError, MockGenerator, PrecodedGenerator};
pub use index::{cosine_similarity, FlatIndex, IndexError, Neighbor, SimilarityIndex};
pub use ledger::{IngestKey, LedgerRecord, TraceLedger};
pub use storage::{
    CodebookState, CodebookStore, JsonFileStore, OpenStore, SqliteStore, StorageError,
    StorageResult,
};
pub use synthesis::{
    CancellationToken, Candidate, CandidateOutcome, CandidateReport, CandidateState,
    MergeDecision, MergeResolver, RunSummary, SynthesisError, Synthesizer, ValidationError,
};

#[cfg(feature = "embeddings")]
pub use embedding::FastEmbedEmbedder;
#[cfg(feature = "embeddings")]
pub use index::SqliteVecIndex;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
