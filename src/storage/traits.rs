//! Storage trait definitions

use crate::codebook::{CanonicalCode, Codebook, CodebookError};
use crate::ledger::{LedgerRecord, TraceLedger};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be turned back into a valid codebook
    #[error("Corrupt store: {0}")]
    Corrupt(String),
}

impl From<CodebookError> for StorageError {
    fn from(e: CodebookError) -> Self {
        StorageError::Corrupt(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Everything a synthesis run reads at start and writes at each checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CodebookState {
    pub codebook: Codebook,
    pub ledger: TraceLedger,
    /// Label text → embedding, reused across runs
    pub label_cache: BTreeMap<String, Vec<f32>>,
    /// Embedding model that produced the code and cache vectors
    pub embedding_model: Option<String>,
}

impl CodebookState {
    pub fn new() -> Self {
        Self {
            codebook: Codebook::new(),
            ledger: TraceLedger::new(),
            label_cache: BTreeMap::new(),
            embedding_model: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.codebook.is_empty() && self.ledger.is_empty() && self.label_cache.is_empty()
    }

    /// Flatten into the serialized form.
    pub fn to_stored(&self) -> StoredState {
        StoredState {
            format_version: FORMAT_VERSION,
            next_id: self.codebook.next_id(),
            codes: self.codebook.iter().cloned().collect(),
            ledger: self.ledger.records().into_iter().cloned().collect(),
            label_cache: self
                .label_cache
                .iter()
                .map(|(label, embedding)| CachedEmbedding {
                    label: label.clone(),
                    embedding: embedding.clone(),
                })
                .collect(),
            embedding_model: self.embedding_model.clone(),
        }
    }

    /// Rebuild from the serialized form, validating the codebook.
    pub fn from_stored(stored: StoredState) -> StorageResult<Self> {
        if stored.format_version > FORMAT_VERSION {
            return Err(StorageError::Corrupt(format!(
                "unsupported format version {} (newest known is {})",
                stored.format_version, FORMAT_VERSION
            )));
        }
        let codebook = Codebook::from_parts(stored.codes, stored.next_id)?;
        for record in &stored.ledger {
            if !codebook.contains(&record.code_id) {
                return Err(StorageError::Corrupt(format!(
                    "ledger references unknown code {}",
                    record.code_id
                )));
            }
        }
        Ok(Self {
            codebook,
            ledger: TraceLedger::from_records(stored.ledger),
            label_cache: stored
                .label_cache
                .into_iter()
                .map(|c| (c.label, c.embedding))
                .collect(),
            embedding_model: stored.embedding_model,
        })
    }
}

/// Current version of the serialized layout.
pub const FORMAT_VERSION: u32 = 1;

/// Serialized codebook state (used verbatim by the JSON store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredState {
    pub format_version: u32,
    pub next_id: u64,
    pub codes: Vec<CanonicalCode>,
    pub ledger: Vec<LedgerRecord>,
    #[serde(default)]
    pub label_cache: Vec<CachedEmbedding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEmbedding {
    pub label: String,
    pub embedding: Vec<f32>,
}

/// Trait for codebook persistence backends
///
/// `load` on a store that has never been saved returns an empty state.
/// `save` must be atomic: a failure leaves the previously saved state
/// readable.
pub trait CodebookStore: Send + Sync {
    fn load(&self) -> StorageResult<CodebookState>;

    fn save(&self, state: &CodebookState) -> StorageResult<()>;
}

/// Trait for stores that can be opened from a path
pub trait OpenStore: CodebookStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
