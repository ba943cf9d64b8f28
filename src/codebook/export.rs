//! Downstream view of a codebook: canonical codes and evidence assignments
//! without embeddings.

use super::book::Codebook;
use crate::ledger::TraceLedger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One canonical code as seen by downstream stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedCode {
    pub canonical_label: String,
    /// label → number of occurrences, in first-seen order
    pub synonym_labels: Vec<(String, u64)>,
    pub occurrence_count: u64,
    pub evidence_ids: BTreeSet<String>,
}

/// Output structure: `code_id → code` plus `evidence_id → [code_id]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodebookExport {
    pub generated_at: DateTime<Utc>,
    pub codes: BTreeMap<String, ExportedCode>,
    pub assignments: BTreeMap<String, Vec<String>>,
}

impl CodebookExport {
    pub fn build(codebook: &Codebook, ledger: &TraceLedger) -> Self {
        let codes = codebook
            .iter()
            .map(|entry| {
                (
                    entry.code_id.to_string(),
                    ExportedCode {
                        canonical_label: entry.canonical_label.clone(),
                        synonym_labels: entry
                            .synonym_labels
                            .iter()
                            .map(|s| (s.label.clone(), s.count))
                            .collect(),
                        occurrence_count: entry.occurrence_count,
                        evidence_ids: entry.evidence_ids.clone(),
                    },
                )
            })
            .collect();

        let assignments = ledger
            .assignments()
            .iter()
            .map(|(evidence, ids)| {
                (
                    evidence.clone(),
                    ids.iter().map(|id| id.to_string()).collect(),
                )
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            codes,
            assignments,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
