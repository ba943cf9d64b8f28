//! SQLite storage backend for codebooks

use super::traits::{
    CachedEmbedding, CodebookState, CodebookStore, OpenStore, StorageError, StorageResult,
    StoredState, FORMAT_VERSION,
};
use crate::codebook::{CanonicalCode, CodeId, SynonymLabels};
use crate::ledger::{IngestKey, LedgerRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// SQLite-backed codebook store
///
/// One database file with tables for codes, the ledger and the label
/// embedding cache. Thread-safe via internal mutex on the connection.
///
/// Saves are append-only upserts inside one transaction: rows are never
/// deleted, and a failed save rolls back to the last committed checkpoint.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS codes (
                code_id INTEGER PRIMARY KEY,
                canonical_label TEXT NOT NULL,
                embedding BLOB NOT NULL,
                occurrence_count INTEGER NOT NULL,
                evidence_json TEXT NOT NULL,
                synonyms_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ledger (
                ingest_key TEXT PRIMARY KEY,
                evidence_id TEXT NOT NULL,
                label TEXT NOT NULL,
                code_id INTEGER NOT NULL REFERENCES codes(code_id),
                seq INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_evidence
                ON ledger(evidence_id);

            CREATE TABLE IF NOT EXISTS label_embeddings (
                label TEXT PRIMARY KEY,
                embedding BLOB NOT NULL
            );

            -- Enable WAL mode for concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Corrupt("connection lock poisoned".to_string()))
    }

    fn read_meta(conn: &Connection, key: &str) -> StorageResult<Option<String>> {
        Ok(conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn write_meta(tx: &Transaction<'_>, key: &str, value: &str) -> StorageResult<()> {
        tx.execute(
            r#"
            INSERT INTO meta (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    fn load_stored(conn: &Connection) -> StorageResult<StoredState> {
        let format_version = match Self::read_meta(conn, "format_version")? {
            Some(v) => v
                .parse()
                .map_err(|_| StorageError::Corrupt(format!("bad format_version: {}", v)))?,
            None => FORMAT_VERSION,
        };
        let next_id = match Self::read_meta(conn, "next_id")? {
            Some(v) => v
                .parse()
                .map_err(|_| StorageError::Corrupt(format!("bad next_id: {}", v)))?,
            None => 1,
        };
        let embedding_model = Self::read_meta(conn, "embedding_model")?;

        let mut stmt = conn.prepare(
            r#"
            SELECT code_id, canonical_label, embedding, occurrence_count,
                   evidence_json, synonyms_json, created_at, updated_at
            FROM codes ORDER BY code_id
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CodeRow {
                    code_id: row.get(0)?,
                    canonical_label: row.get(1)?,
                    embedding: row.get(2)?,
                    occurrence_count: row.get(3)?,
                    evidence_json: row.get(4)?,
                    synonyms_json: row.get(5)?,
                    created_at: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let codes = rows
            .into_iter()
            .map(CodeRow::into_code)
            .collect::<StorageResult<Vec<_>>>()?;

        let mut stmt =
            conn.prepare("SELECT ingest_key, evidence_id, label, code_id, seq FROM ledger ORDER BY seq")?;
        let ledger = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(key, evidence_id, label, code_id, seq)| {
                let uuid = Uuid::parse_str(&key)
                    .map_err(|e| StorageError::Corrupt(format!("bad ingest key {}: {}", key, e)))?;
                Ok(LedgerRecord {
                    key: IngestKey::from_uuid(uuid),
                    evidence_id,
                    label,
                    code_id: CodeId::from_raw(code_id as u64),
                    seq: seq as u64,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let mut stmt = conn.prepare("SELECT label, embedding FROM label_embeddings ORDER BY label")?;
        let label_cache = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(label, blob)| {
                Ok(CachedEmbedding {
                    label,
                    embedding: blob_to_vec(&blob)?,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(StoredState {
            format_version,
            next_id,
            codes,
            ledger,
            label_cache,
            embedding_model,
        })
    }

    fn write_code(tx: &Transaction<'_>, code: &CanonicalCode) -> StorageResult<()> {
        tx.execute(
            r#"
            INSERT INTO codes (code_id, canonical_label, embedding, occurrence_count,
                               evidence_json, synonyms_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(code_id) DO UPDATE SET
                canonical_label = excluded.canonical_label,
                occurrence_count = excluded.occurrence_count,
                evidence_json = excluded.evidence_json,
                synonyms_json = excluded.synonyms_json,
                updated_at = excluded.updated_at
            "#,
            params![
                code.code_id.raw() as i64,
                code.canonical_label,
                vec_to_blob(&code.embedding),
                code.occurrence_count as i64,
                serde_json::to_string(&code.evidence_ids)?,
                serde_json::to_string(&code.synonym_labels)?,
                code.created_at.to_rfc3339(),
                code.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

struct CodeRow {
    code_id: i64,
    canonical_label: String,
    embedding: Vec<u8>,
    occurrence_count: i64,
    evidence_json: String,
    synonyms_json: String,
    created_at: String,
    updated_at: String,
}

impl CodeRow {
    fn into_code(self) -> StorageResult<CanonicalCode> {
        let evidence_ids: BTreeSet<String> = serde_json::from_str(&self.evidence_json)?;
        let synonym_labels: SynonymLabels = serde_json::from_str(&self.synonyms_json)?;
        Ok(CanonicalCode {
            code_id: CodeId::from_raw(self.code_id as u64),
            canonical_label: self.canonical_label,
            embedding: blob_to_vec(&self.embedding)?,
            occurrence_count: self.occurrence_count as u64,
            evidence_ids,
            synonym_labels,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {}: {}", s, e)))
}

/// Little-endian f32 blob.
fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn blob_to_vec(blob: &[u8]) -> StorageResult<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(StorageError::Corrupt(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CodebookStore for SqliteStore {
    fn load(&self) -> StorageResult<CodebookState> {
        let conn = self.lock()?;
        let stored = Self::load_stored(&conn)?;
        CodebookState::from_stored(stored)
    }

    fn save(&self, state: &CodebookState) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for code in state.codebook.iter() {
            Self::write_code(&tx, code)?;
        }

        for record in state.ledger.records() {
            tx.execute(
                r#"
                INSERT OR IGNORE INTO ledger (ingest_key, evidence_id, label, code_id, seq)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    record.key.to_string(),
                    record.evidence_id,
                    record.label,
                    record.code_id.raw() as i64,
                    record.seq as i64,
                ],
            )?;
        }

        for (label, embedding) in &state.label_cache {
            tx.execute(
                "INSERT OR IGNORE INTO label_embeddings (label, embedding) VALUES (?1, ?2)",
                params![label, vec_to_blob(embedding)],
            )?;
        }

        Self::write_meta(&tx, "format_version", &FORMAT_VERSION.to_string())?;
        Self::write_meta(&tx, "next_id", &state.codebook.next_id().to_string())?;
        if let Some(model) = &state.embedding_model {
            Self::write_meta(&tx, "embedding_model", model)?;
        }

        tx.commit()?;
        debug!(
            codes = state.codebook.len(),
            ledger = state.ledger.len(),
            cached_labels = state.label_cache.len(),
            "saved codebook"
        );
        Ok(())
    }
}
