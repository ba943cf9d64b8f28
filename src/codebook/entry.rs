//! Canonical code entries and their identifiers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Identifier of a canonical code.
///
/// Assigned from a monotonically increasing sequence that is persisted with
/// the codebook, so a lower id always means an earlier-created entry. Ids are
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeId(u64);

impl CodeId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C{:06}", self.0)
    }
}

impl FromStr for CodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('C').unwrap_or(s);
        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|_| format!("invalid code id: {}", s))
    }
}

/// One distinct label and how many times it was merged into an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynonymCount {
    pub label: String,
    pub count: u64,
}

/// Multiset of labels merged into a canonical code, kept in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SynonymLabels(Vec<SynonymCount>);

impl SynonymLabels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more occurrence of `label`.
    pub fn record(&mut self, label: &str) {
        match self.0.iter_mut().find(|s| s.label == label) {
            Some(existing) => existing.count += 1,
            None => self.0.push(SynonymCount {
                label: label.to_string(),
                count: 1,
            }),
        }
    }

    /// The most frequent label; ties go to the label seen first.
    pub fn most_frequent(&self) -> Option<&str> {
        let mut best: Option<&SynonymCount> = None;
        for synonym in &self.0 {
            match best {
                Some(b) if synonym.count <= b.count => {}
                _ => best = Some(synonym),
            }
        }
        best.map(|s| s.label.as_str())
    }

    pub fn count(&self, label: &str) -> u64 {
        self.0
            .iter()
            .find(|s| s.label == label)
            .map_or(0, |s| s.count)
    }

    /// Total occurrences across all labels.
    pub fn total(&self) -> u64 {
        self.0.iter().map(|s| s.count).sum()
    }

    /// Number of distinct labels.
    pub fn distinct(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SynonymCount> {
        self.0.iter()
    }
}

/// How the canonical label of an entry evolves as synonyms are merged in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelabelPolicy {
    /// Re-derive the label on every merge: most frequent synonym wins,
    /// ties go to the first-seen label.
    #[default]
    MostFrequent,
    /// Keep the label the entry was created with.
    FirstSeen,
}

/// A canonical code: the merged representation of one or more equivalent
/// open codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCode {
    pub code_id: CodeId,
    pub canonical_label: String,
    pub embedding: Vec<f32>,
    pub occurrence_count: u64,
    pub evidence_ids: BTreeSet<String>,
    pub synonym_labels: SynonymLabels,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalCode {
    /// A fresh entry seeded by its first candidate.
    pub(crate) fn seed(
        code_id: CodeId,
        label: &str,
        evidence_id: &str,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        let mut synonym_labels = SynonymLabels::new();
        synonym_labels.record(label);
        Self {
            code_id,
            canonical_label: label.to_string(),
            embedding,
            occurrence_count: 1,
            evidence_ids: BTreeSet::from([evidence_id.to_string()]),
            synonym_labels,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold another occurrence into this entry.
    pub(crate) fn absorb(&mut self, label: &str, evidence_id: &str, policy: RelabelPolicy) {
        self.occurrence_count += 1;
        self.evidence_ids.insert(evidence_id.to_string());
        self.synonym_labels.record(label);
        if policy == RelabelPolicy::MostFrequent {
            if let Some(best) = self.synonym_labels.most_frequent() {
                if best != self.canonical_label {
                    self.canonical_label = best.to_string();
                }
            }
        }
        self.updated_at = Utc::now();
    }
}
