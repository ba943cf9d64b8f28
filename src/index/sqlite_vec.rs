//! KNN similarity search backed by sqlite-vec
//!
//! Vectors are L2-normalized on insert so that L2 distance from vec0 can be
//! converted to cosine similarity: `sim = 1 - dist² / 2`. The code id is the
//! vec0 rowid.
//!
//! The index lives in memory only. It is rebuilt from the codebook with
//! `populate` at the start of every run, so it never holds vectors the
//! codebook no longer has.
//!
//! Only the `k` nearest codes are considered per query, so near-ties beyond
//! the k-th neighbor are not seen. Use `FlatIndex` where exact tie handling
//! over the whole codebook matters.

use super::{within_epsilon_of_best, IndexError, Neighbor, SimilarityIndex};
use crate::codebook::CodeId;
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::sync::Mutex;

/// Number of nearest neighbors fetched per query.
pub const DEFAULT_K: usize = 32;

/// Register the sqlite-vec extension globally (safe under parallel test execution).
fn register_vec_extension() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

fn backend(e: rusqlite::Error) -> IndexError {
    IndexError::Backend(e.to_string())
}

/// L2-normalize a vector in place.
fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Similarity index backed by a sqlite-vec `vec0` virtual table.
pub struct SqliteVecIndex {
    conn: Mutex<Connection>,
    dimensions: usize,
    k: usize,
    count: usize,
}

impl SqliteVecIndex {
    /// Open an in-memory index.
    pub fn open_in_memory(dimensions: usize) -> Result<Self, IndexError> {
        register_vec_extension();
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::init_connection(conn, dimensions)
    }

    fn init_connection(conn: Connection, dimensions: usize) -> Result<Self, IndexError> {
        let create_sql = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_codes USING vec0(embedding float[{}])",
            dimensions
        );
        conn.execute_batch(&create_sql).map_err(backend)?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM vec_codes", [], |row| row.get(0))
            .map_err(backend)?;

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
            k: DEFAULT_K,
            count: count as usize,
        })
    }

    /// Set how many nearest neighbors each query fetches.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn check_dimension(&self, v: &[f32]) -> Result<(), IndexError> {
        if v.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: v.len(),
            });
        }
        Ok(())
    }
}

impl SimilarityIndex for SqliteVecIndex {
    fn insert(&mut self, code_id: CodeId, vector: &[f32]) -> Result<(), IndexError> {
        self.check_dimension(vector)?;
        let mut normalized = vector.to_vec();
        l2_normalize(&mut normalized);
        let conn = self
            .conn
            .lock()
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO vec_codes(rowid, embedding) VALUES (?1, ?2)",
                rusqlite::params![code_id.raw() as i64, to_blob(&normalized)],
            )
            .map_err(backend)?;
        self.count += inserted;
        Ok(())
    }

    fn len(&self) -> usize {
        self.count
    }

    fn best_matches(&self, query: &[f32], epsilon: f32) -> Result<Vec<Neighbor>, IndexError> {
        self.check_dimension(query)?;
        if self.count == 0 {
            return Ok(Vec::new());
        }
        let mut normalized = query.to_vec();
        l2_normalize(&mut normalized);
        let conn = self
            .conn
            .lock()
            .map_err(|e| IndexError::Backend(e.to_string()))?;

        // For unit vectors: L2_dist² = 2(1 - cos_sim), so cos_sim = 1 - dist²/2.
        let sql = format!(
            "SELECT rowid, distance FROM vec_codes WHERE embedding MATCH ?1 AND k = {}",
            self.k
        );
        let mut stmt = conn.prepare(&sql).map_err(backend)?;
        let scored = stmt
            .query_map(rusqlite::params![to_blob(&normalized)], |row| {
                let rowid: i64 = row.get(0)?;
                let distance: f64 = row.get(1)?;
                Ok(Neighbor {
                    code_id: CodeId::from_raw(rowid as u64),
                    similarity: 1.0 - (distance * distance) as f32 / 2.0,
                })
            })
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;

        Ok(within_epsilon_of_best(scored, epsilon))
    }
}
