//! Similarity index over canonical code embeddings
//!
//! `FlatIndex` answers queries with an exact linear scan. The sqlite-vec
//! backend (behind the `embeddings` feature) answers them with a KNN query;
//! both return the same shape so merge semantics do not depend on the
//! backend.

#[cfg(feature = "embeddings")]
mod sqlite_vec;

#[cfg(feature = "embeddings")]
pub use sqlite_vec::SqliteVecIndex;

use crate::codebook::{CodeId, Codebook};
use thiserror::Error;

/// Errors from index backends.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index backend error: {0}")]
    Backend(String),

    #[error("index dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A canonical code and its similarity to a query vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub code_id: CodeId,
    pub similarity: f32,
}

/// Trait for nearest-neighbor lookup over canonical embeddings.
///
/// The merge phase is single-writer, so mutation takes `&mut self`.
pub trait SimilarityIndex: Send {
    /// Add the embedding of a newly created canonical code.
    fn insert(&mut self, code_id: CodeId, vector: &[f32]) -> Result<(), IndexError>;

    /// Number of indexed codes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every code whose similarity to `query` is within `epsilon` of the best
    /// similarity, ordered by similarity descending then code id ascending.
    /// Empty when the index is empty.
    fn best_matches(&self, query: &[f32], epsilon: f32) -> Result<Vec<Neighbor>, IndexError>;
}

/// Load every entry of a codebook into an index.
pub fn populate(index: &mut dyn SimilarityIndex, codebook: &Codebook) -> Result<(), IndexError> {
    for entry in codebook.iter() {
        index.insert(entry.code_id, &entry.embedding)?;
    }
    Ok(())
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Keep the neighbors within `epsilon` of the best one, in canonical order.
pub(crate) fn within_epsilon_of_best(mut scored: Vec<Neighbor>, epsilon: f32) -> Vec<Neighbor> {
    let Some(best) = scored
        .iter()
        .map(|n| n.similarity)
        .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s))))
    else {
        return Vec::new();
    };
    scored.retain(|n| n.similarity >= best - epsilon);
    scored.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(a.code_id.cmp(&b.code_id))
    });
    scored
}

struct IndexedVector {
    code_id: CodeId,
    vector: Vec<f32>,
}

/// Exact in-memory index: compares the query against every stored vector.
#[derive(Default)]
pub struct FlatIndex {
    vectors: Vec<IndexedVector>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index holding every entry of `codebook`.
    pub fn from_codebook(codebook: &Codebook) -> Self {
        Self {
            vectors: codebook
                .iter()
                .map(|e| IndexedVector {
                    code_id: e.code_id,
                    vector: e.embedding.clone(),
                })
                .collect(),
        }
    }
}

impl SimilarityIndex for FlatIndex {
    fn insert(&mut self, code_id: CodeId, vector: &[f32]) -> Result<(), IndexError> {
        if let Some(first) = self.vectors.first() {
            if first.vector.len() != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: first.vector.len(),
                    actual: vector.len(),
                });
            }
        }
        self.vectors.push(IndexedVector {
            code_id,
            vector: vector.to_vec(),
        });
        Ok(())
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn best_matches(&self, query: &[f32], epsilon: f32) -> Result<Vec<Neighbor>, IndexError> {
        let scored = self
            .vectors
            .iter()
            .map(|v| Neighbor {
                code_id: v.code_id,
                similarity: cosine_similarity(query, &v.vector),
            })
            .collect();
        Ok(within_epsilon_of_best(scored, epsilon))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(raw: u64) -> CodeId {
        CodeId::from_raw(raw)
    }

    #[test]
    fn cosine_similarity_correct() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6, "identical vectors");

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 1e-6, "orthogonal vectors");

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 1e-6, "opposite vectors");
    }

    #[test]
    fn cosine_similarity_zero_vector() {
        let a = vec![1.0, 0.0, 0.0];
        let zero = vec![0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &zero), 0.0);
    }

    #[test]
    fn empty_index_has_no_matches() {
        let index = FlatIndex::new();
        assert!(index.best_matches(&[1.0, 0.0], 1e-4).unwrap().is_empty());
    }

    #[test]
    fn best_match_is_returned_alone_when_clear() {
        let mut index = FlatIndex::new();
        index.insert(c(1), &[1.0, 0.0]).unwrap();
        index.insert(c(2), &[0.0, 1.0]).unwrap();

        let matches = index.best_matches(&[0.9, 0.1], 1e-4).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].code_id, c(1));
    }

    #[test]
    fn near_ties_are_all_returned_in_id_order() {
        let mut index = FlatIndex::new();
        index.insert(c(3), &[1.0, 0.0]).unwrap();
        index.insert(c(1), &[0.0, 1.0]).unwrap();
        index.insert(c(2), &[-1.0, 0.0]).unwrap();

        // Query on the diagonal: equally similar to c1 and c3
        let matches = index.best_matches(&[1.0, 1.0], 1e-4).unwrap();
        let ids: Vec<CodeId> = matches.iter().map(|n| n.code_id).collect();
        assert_eq!(ids, vec![c(1), c(3)]);
    }

    #[test]
    fn insert_rejects_dimension_change() {
        let mut index = FlatIndex::new();
        index.insert(c(1), &[1.0, 0.0]).unwrap();
        assert!(matches!(
            index.insert(c(2), &[1.0]),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn from_codebook_indexes_every_entry() {
        let mut book = Codebook::new();
        book.create("a", "F1", vec![1.0, 0.0]).unwrap();
        book.create("b", "F2", vec![0.0, 1.0]).unwrap();

        let index = FlatIndex::from_codebook(&book);
        assert_eq!(index.len(), 2);

        let mut populated = FlatIndex::new();
        populate(&mut populated, &book).unwrap();
        assert_eq!(populated.len(), 2);
    }
}
