//! Candidate codes and their lifecycle

use crate::codebook::CodeId;
use crate::embedding::EmbeddingError;
use crate::ledger::IngestKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Why a candidate was rejected before embedding.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("candidate {index} has no evidence id")]
    MissingEvidenceId { index: usize },

    #[error("candidate {index} of {evidence_id} has an empty label")]
    EmptyLabel { evidence_id: String, index: usize },
}

impl ValidationError {
    /// Position of the rejected candidate within its fragment.
    pub fn index(&self) -> usize {
        match self {
            ValidationError::MissingEvidenceId { index }
            | ValidationError::EmptyLabel { index, .. } => *index,
        }
    }
}

/// A proposed label for one evidence fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Label text, verbatim
    pub label: String,
    pub evidence_id: String,
    /// Position in the generator's output for this fragment
    pub index: usize,
}

impl Candidate {
    pub fn validate(evidence_id: &str, label: &str, index: usize) -> Result<Self, ValidationError> {
        if evidence_id.trim().is_empty() {
            return Err(ValidationError::MissingEvidenceId { index });
        }
        if label.trim().is_empty() {
            return Err(ValidationError::EmptyLabel {
                evidence_id: evidence_id.to_string(),
                index,
            });
        }
        Ok(Self {
            label: label.to_string(),
            evidence_id: evidence_id.to_string(),
            index,
        })
    }

    pub fn ingest_key(&self) -> IngestKey {
        IngestKey::new(&self.evidence_id, &self.label)
    }
}

/// Where a candidate is in the pipeline.
///
/// `Pending → Embedded → {Merged | NewEntry | Unresolved}`, or
/// `Pending → Unresolved` when embedding fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateState {
    Pending,
    Embedded,
    Merged,
    NewEntry,
    Unresolved,
}

impl CandidateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CandidateState::Merged | CandidateState::NewEntry | CandidateState::Unresolved
        )
    }
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidateState::Pending => "pending",
            CandidateState::Embedded => "embedded",
            CandidateState::Merged => "merged",
            CandidateState::NewEntry => "new_entry",
            CandidateState::Unresolved => "unresolved",
        };
        f.write_str(s)
    }
}

/// A candidate as handed from a worker to the merge loop.
#[derive(Debug)]
pub(crate) enum Prepared {
    Invalid(ValidationError),
    /// Not embedded: already ingested when the run started
    Pending(Candidate),
    Embedded(Candidate, Arc<[f32]>),
    Unresolved(Candidate, EmbeddingError),
}

impl Prepared {
    pub(crate) fn state(&self) -> Option<CandidateState> {
        match self {
            Prepared::Invalid(_) => None,
            Prepared::Pending(_) => Some(CandidateState::Pending),
            Prepared::Embedded(..) => Some(CandidateState::Embedded),
            Prepared::Unresolved(..) => Some(CandidateState::Unresolved),
        }
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CandidateOutcome {
    Merged {
        code_id: CodeId,
        similarity: f32,
        /// Other codes that were equally good matches
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tied_with: Vec<CodeId>,
    },
    NewEntry {
        code_id: CodeId,
    },
    /// Already in the ledger; nothing changed
    AlreadyIngested {
        code_id: CodeId,
    },
    Unresolved {
        reason: String,
    },
    Invalid {
        reason: String,
    },
}

impl CandidateOutcome {
    /// The terminal lifecycle state, for candidates that went through it.
    pub fn state(&self) -> Option<CandidateState> {
        match self {
            CandidateOutcome::Merged { .. } => Some(CandidateState::Merged),
            CandidateOutcome::NewEntry { .. } => Some(CandidateState::NewEntry),
            CandidateOutcome::Unresolved { .. } => Some(CandidateState::Unresolved),
            CandidateOutcome::AlreadyIngested { .. } | CandidateOutcome::Invalid { .. } => None,
        }
    }

    /// The code the candidate ended up assigned to, if any.
    pub fn code_id(&self) -> Option<CodeId> {
        match self {
            CandidateOutcome::Merged { code_id, .. }
            | CandidateOutcome::NewEntry { code_id }
            | CandidateOutcome::AlreadyIngested { code_id } => Some(*code_id),
            CandidateOutcome::Unresolved { .. } | CandidateOutcome::Invalid { .. } => None,
        }
    }
}

/// One candidate and its outcome, in application order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReport {
    pub evidence_id: String,
    pub label: String,
    pub index: usize,
    #[serde(flatten)]
    pub outcome: CandidateOutcome,
}
