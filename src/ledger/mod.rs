//! Traceability ledger
//!
//! Records which canonical codes each evidence fragment has been assigned and
//! which `(evidence_id, label)` candidates have already been ingested, so
//! reprocessing the same input is an idempotent no-op.

use crate::codebook::CodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// UUID v5 namespace for ingestion keys
const INGEST_NS: Uuid = Uuid::from_bytes([
    0x4d, 0x1f, 0x8a, 0x62, 0x3c, 0x0b, 0x5e, 0x21,
    0x9a, 0x77, 0x16, 0xe0, 0x2b, 0xc4, 0x51, 0x8f,
]);

/// Content address of a candidate: derived from its evidence id and label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IngestKey(Uuid);

impl IngestKey {
    pub fn new(evidence_id: &str, label: &str) -> Self {
        // Unit separator keeps ("a", "bc") and ("ab", "c") apart
        let input = format!("{}\u{1f}{}", evidence_id, label);
        Self(Uuid::new_v5(&INGEST_NS, input.as_bytes()))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for IngestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One ingested candidate and the canonical code it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub key: IngestKey,
    pub evidence_id: String,
    pub label: String,
    pub code_id: CodeId,
    /// Position in ingestion order
    pub seq: u64,
}

/// The traceability ledger.
#[derive(Debug, Clone, Default)]
pub struct TraceLedger {
    records: HashMap<IngestKey, LedgerRecord>,
    /// evidence_id → code ids in first-assigned order, no duplicates
    assignments: BTreeMap<String, Vec<CodeId>>,
    next_seq: u64,
}

impl TraceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records, replaying them in `seq` order.
    pub fn from_records(mut records: Vec<LedgerRecord>) -> Self {
        records.sort_by_key(|r| r.seq);
        let mut ledger = Self::new();
        for record in records {
            ledger.next_seq = ledger.next_seq.max(record.seq + 1);
            ledger.assign(&record.evidence_id, record.code_id);
            ledger.records.insert(record.key, record);
        }
        ledger
    }

    /// Whether this candidate was already ingested (in this or a prior run).
    pub fn contains(&self, key: &IngestKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn get(&self, key: &IngestKey) -> Option<&LedgerRecord> {
        self.records.get(key)
    }

    /// Every ingest key, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &IngestKey> {
        self.records.keys()
    }

    /// Record an ingested candidate.
    ///
    /// Returns `false` (and changes nothing) if the key is already present.
    pub fn record(&mut self, evidence_id: &str, label: &str, code_id: CodeId) -> bool {
        let key = IngestKey::new(evidence_id, label);
        if self.records.contains_key(&key) {
            return false;
        }
        let record = LedgerRecord {
            key,
            evidence_id: evidence_id.to_string(),
            label: label.to_string(),
            code_id,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.assign(evidence_id, code_id);
        self.records.insert(key, record);
        true
    }

    fn assign(&mut self, evidence_id: &str, code_id: CodeId) {
        let codes = self.assignments.entry(evidence_id.to_string()).or_default();
        if !codes.contains(&code_id) {
            codes.push(code_id);
        }
    }

    /// Number of ingested candidates.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of distinct `(evidence_id, code_id)` pairs.
    pub fn pair_count(&self) -> usize {
        self.assignments.values().map(Vec::len).sum()
    }

    /// Codes assigned to one evidence fragment, in first-assigned order.
    pub fn assignments_for(&self, evidence_id: &str) -> &[CodeId] {
        self.assignments
            .get(evidence_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The full assignment map: evidence_id → ordered code ids.
    pub fn assignments(&self) -> &BTreeMap<String, Vec<CodeId>> {
        &self.assignments
    }

    /// All records in ingestion order.
    pub fn records(&self) -> Vec<&LedgerRecord> {
        let mut records: Vec<&LedgerRecord> = self.records.values().collect();
        records.sort_by_key(|r| r.seq);
        records
    }
}
