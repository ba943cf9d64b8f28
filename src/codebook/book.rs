//! Codebook: the append-only collection of canonical codes

use super::entry::{CanonicalCode, CodeId, RelabelPolicy};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur when mutating a codebook
#[derive(Debug, Error, PartialEq)]
pub enum CodebookError {
    #[error("Code not found: {0}")]
    UnknownCode(CodeId),

    #[error("Embedding dimension mismatch: codebook uses {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty embedding")]
    EmptyEmbedding,

    #[error("Duplicate code id on load: {0}")]
    DuplicateCode(CodeId),

    #[error("Code {code_id} is not below the id sequence {next_id}")]
    SequenceBehind { code_id: CodeId, next_id: u64 },
}

/// Result type for codebook operations
pub type CodebookResult<T> = Result<T, CodebookError>;

/// The canonical codebook.
///
/// Entries are keyed by `CodeId` and iterate in creation order. There is no
/// removal operation: entries are created once and then only mutated, so a
/// `CodeId` handed to a downstream consumer stays valid in every later run.
#[derive(Debug, Clone, Default)]
pub struct Codebook {
    entries: BTreeMap<CodeId, CanonicalCode>,
    /// Next raw id to hand out (ids start at 1)
    next_id: u64,
    /// Fixed once the first entry exists
    dimension: Option<usize>,
}

impl Codebook {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
            dimension: None,
        }
    }

    /// Rebuild a codebook from persisted entries.
    ///
    /// Validates that ids are unique, that every id lies below the persisted
    /// sequence counter and that all embeddings share one dimension.
    pub fn from_parts(entries: Vec<CanonicalCode>, next_id: u64) -> CodebookResult<Self> {
        let mut book = Self::new();
        let mut max_seen = 0;
        for entry in entries {
            book.check_dimension(&entry.embedding)?;
            if book.dimension.is_none() {
                book.dimension = Some(entry.embedding.len());
            }
            max_seen = max_seen.max(entry.code_id.raw());
            let id = entry.code_id;
            if book.entries.insert(id, entry).is_some() {
                return Err(CodebookError::DuplicateCode(id));
            }
        }
        if max_seen >= next_id.max(1) {
            return Err(CodebookError::SequenceBehind {
                code_id: CodeId::from_raw(max_seen),
                next_id,
            });
        }
        book.next_id = next_id.max(1);
        Ok(book)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding dimension shared by all entries, once known.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// The raw id the next created entry will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn get(&self, id: &CodeId) -> Option<&CanonicalCode> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &CodeId) -> bool {
        self.entries.contains_key(id)
    }

    /// Entries in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &CanonicalCode> {
        self.entries.values()
    }

    /// `(code_id, canonical_label)` pairs for downstream consumers.
    pub fn canonical_pairs(&self) -> Vec<(CodeId, String)> {
        self.entries
            .values()
            .map(|e| (e.code_id, e.canonical_label.clone()))
            .collect()
    }

    /// Reject vectors whose dimension differs from the codebook's.
    pub fn check_dimension(&self, embedding: &[f32]) -> CodebookResult<()> {
        if embedding.is_empty() {
            return Err(CodebookError::EmptyEmbedding);
        }
        match self.dimension {
            Some(expected) if expected != embedding.len() => Err(CodebookError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Create a new canonical entry from a candidate that matched nothing.
    pub fn create(
        &mut self,
        label: &str,
        evidence_id: &str,
        embedding: Vec<f32>,
    ) -> CodebookResult<CodeId> {
        self.check_dimension(&embedding)?;
        if self.dimension.is_none() {
            self.dimension = Some(embedding.len());
        }
        let id = CodeId::from_raw(self.next_id);
        self.next_id += 1;
        self.entries
            .insert(id, CanonicalCode::seed(id, label, evidence_id, embedding));
        Ok(id)
    }

    /// Merge a candidate occurrence into an existing entry.
    pub fn merge(
        &mut self,
        id: CodeId,
        label: &str,
        evidence_id: &str,
        policy: RelabelPolicy,
    ) -> CodebookResult<&CanonicalCode> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(CodebookError::UnknownCode(id))?;
        entry.absorb(label, evidence_id, policy);
        Ok(entry)
    }
}
