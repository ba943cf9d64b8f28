//! End-of-run report

use super::candidate::{CandidateOutcome, CandidateReport};
use crate::codebook::CodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A merge where more than one code qualified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeTie {
    pub evidence_id: String,
    pub label: String,
    pub chosen: CodeId,
    pub passed_over: Vec<CodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedCandidate {
    pub evidence_id: String,
    pub label: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidCandidate {
    pub evidence_id: String,
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedFragment {
    pub fragment_id: String,
    pub reason: String,
}

/// What a synthesis run did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fragments_total: usize,
    /// Fragments whose candidates went through the merge loop
    pub fragments_applied: usize,
    pub merged: usize,
    pub created: usize,
    /// Candidates already in the ledger
    pub skipped: usize,
    pub ties: Vec<MergeTie>,
    pub unresolved: Vec<UnresolvedCandidate>,
    pub invalid: Vec<InvalidCandidate>,
    pub failed_fragments: Vec<FailedFragment>,
    pub cancelled_fragments: Vec<String>,
    pub codes_before: usize,
    pub codes_after: usize,
    pub ledger_before: usize,
    pub ledger_after: usize,
    /// Saves made during the run, the final one included
    pub checkpoints: usize,
    /// Every candidate in application order
    pub outcomes: Vec<CandidateReport>,
}

impl RunSummary {
    pub(crate) fn start(fragments_total: usize, codes_before: usize, ledger_before: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            fragments_total,
            fragments_applied: 0,
            merged: 0,
            created: 0,
            skipped: 0,
            ties: Vec::new(),
            unresolved: Vec::new(),
            invalid: Vec::new(),
            failed_fragments: Vec::new(),
            cancelled_fragments: Vec::new(),
            codes_before,
            codes_after: codes_before,
            ledger_before,
            ledger_after: ledger_before,
            checkpoints: 0,
            outcomes: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, report: CandidateReport) {
        match &report.outcome {
            CandidateOutcome::Merged {
                code_id, tied_with, ..
            } => {
                self.merged += 1;
                if !tied_with.is_empty() {
                    self.ties.push(MergeTie {
                        evidence_id: report.evidence_id.clone(),
                        label: report.label.clone(),
                        chosen: *code_id,
                        passed_over: tied_with.clone(),
                    });
                }
            }
            CandidateOutcome::NewEntry { .. } => self.created += 1,
            CandidateOutcome::AlreadyIngested { .. } => self.skipped += 1,
            CandidateOutcome::Unresolved { reason } => self.unresolved.push(UnresolvedCandidate {
                evidence_id: report.evidence_id.clone(),
                label: report.label.clone(),
                reason: reason.clone(),
            }),
            CandidateOutcome::Invalid { reason } => self.invalid.push(InvalidCandidate {
                evidence_id: report.evidence_id.clone(),
                index: report.index,
                reason: reason.clone(),
            }),
        }
        self.outcomes.push(report);
    }

    pub(crate) fn fail_fragment(&mut self, fragment_id: &str, reason: impl Into<String>) {
        self.failed_fragments.push(FailedFragment {
            fragment_id: fragment_id.to_string(),
            reason: reason.into(),
        });
    }

    pub(crate) fn finish(&mut self, codes_after: usize, ledger_after: usize) {
        self.codes_after = codes_after;
        self.ledger_after = ledger_after;
        self.finished_at = Utc::now();
    }

    /// Entries added to the codebook by this run.
    pub fn net_growth(&self) -> usize {
        self.codes_after.saturating_sub(self.codes_before)
    }

    /// Outcomes for one fragment, in candidate order.
    pub fn outcomes_for<'a>(
        &'a self,
        evidence_id: &'a str,
    ) -> impl Iterator<Item = &'a CandidateReport> {
        self.outcomes.iter().filter(move |r| r.evidence_id == evidence_id)
    }

    /// True when every fragment was applied and every candidate resolved.
    pub fn is_clean(&self) -> bool {
        self.unresolved.is_empty()
            && self.invalid.is_empty()
            && self.failed_fragments.is_empty()
            && self.cancelled_fragments.is_empty()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = self.finished_at - self.started_at;
        writeln!(
            f,
            "Run {} finished in {:.1}s",
            self.run_id,
            elapsed.num_milliseconds() as f64 / 1000.0
        )?;
        writeln!(
            f,
            "  fragments:  {} total, {} applied, {} failed, {} cancelled",
            self.fragments_total,
            self.fragments_applied,
            self.failed_fragments.len(),
            self.cancelled_fragments.len()
        )?;
        writeln!(
            f,
            "  candidates: {} merged, {} created, {} already ingested, {} unresolved, {} invalid",
            self.merged,
            self.created,
            self.skipped,
            self.unresolved.len(),
            self.invalid.len()
        )?;
        writeln!(f, "  ties broken: {}", self.ties.len())?;
        writeln!(
            f,
            "  codebook:   {} -> {} codes (+{}), ledger {} -> {}",
            self.codes_before,
            self.codes_after,
            self.net_growth(),
            self.ledger_before,
            self.ledger_after
        )?;

        if !self.unresolved.is_empty() {
            writeln!(f, "Unresolved candidates:")?;
            for u in &self.unresolved {
                writeln!(f, "  {} {:?}: {}", u.evidence_id, u.label, u.reason)?;
            }
        }
        if !self.invalid.is_empty() {
            writeln!(f, "Invalid candidates:")?;
            for i in &self.invalid {
                writeln!(f, "  {} #{}: {}", i.evidence_id, i.index, i.reason)?;
            }
        }
        if !self.failed_fragments.is_empty() {
            writeln!(f, "Failed fragments:")?;
            for failed in &self.failed_fragments {
                writeln!(f, "  {}: {}", failed.fragment_id, failed.reason)?;
            }
        }
        if !self.cancelled_fragments.is_empty() {
            writeln!(f, "Cancelled fragments: {}", self.cancelled_fragments.join(", "))?;
        }
        Ok(())
    }
}
