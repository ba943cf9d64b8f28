//! Merge-vs-create decision for an embedded candidate

use crate::codebook::{CodeId, Codebook};
use crate::config::SynthesisConfig;
use crate::index::{IndexError, Neighbor, SimilarityIndex};

/// The resolver's verdict for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeDecision {
    /// Fold the candidate into an existing code.
    Merge {
        code_id: CodeId,
        similarity: f32,
        /// Other codes at the same similarity (within epsilon) and above
        /// the threshold that lost the tie-break
        tied_with: Vec<CodeId>,
    },
    /// Start a new code; `best` is the closest existing similarity, if any.
    Create { best: Option<f32> },
}

/// Decides whether a candidate joins an existing code.
///
/// A candidate merges when the best similarity is at or above the threshold.
/// Among matches within epsilon of the best that also clear the threshold,
/// the code with the higher occurrence count wins, then the lower code id.
#[derive(Debug, Clone, Copy)]
pub struct MergeResolver {
    threshold: f32,
    epsilon: f32,
}

impl MergeResolver {
    pub fn new(threshold: f32, epsilon: f32) -> Self {
        Self { threshold, epsilon }
    }

    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self::new(config.merge_threshold, config.tie_epsilon)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn decide(
        &self,
        index: &dyn SimilarityIndex,
        codebook: &Codebook,
        embedding: &[f32],
    ) -> Result<MergeDecision, IndexError> {
        let matches = index.best_matches(embedding, self.epsilon)?;
        Ok(self.choose(&matches, codebook))
    }

    /// Apply threshold and tie-break to an ordered match list.
    pub fn choose(&self, matches: &[Neighbor], codebook: &Codebook) -> MergeDecision {
        let occurrences = |id: &CodeId| codebook.get(id).map_or(0, |e| e.occurrence_count);

        let mut eligible: Vec<&Neighbor> = matches
            .iter()
            .filter(|n| n.similarity >= self.threshold)
            .collect();
        if eligible.is_empty() {
            return MergeDecision::Create {
                best: matches.iter().map(|n| n.similarity).reduce(f32::max),
            };
        }

        eligible.sort_by(|a, b| {
            occurrences(&b.code_id)
                .cmp(&occurrences(&a.code_id))
                .then(a.code_id.cmp(&b.code_id))
        });
        let winner = eligible[0];
        MergeDecision::Merge {
            code_id: winner.code_id,
            similarity: winner.similarity,
            tied_with: eligible[1..].iter().map(|n| n.code_id).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebook::RelabelPolicy;
    use crate::index::FlatIndex;

    fn n(raw: u64, similarity: f32) -> Neighbor {
        Neighbor {
            code_id: CodeId::from_raw(raw),
            similarity,
        }
    }

    fn book_with_counts(counts: &[u64]) -> Codebook {
        let mut book = Codebook::new();
        for (i, &count) in counts.iter().enumerate() {
            let label = format!("code-{}", i);
            let id = book.create(&label, "F0", vec![1.0, i as f32]).unwrap();
            for k in 1..count {
                book.merge(id, &label, &format!("F{}", k), RelabelPolicy::MostFrequent)
                    .unwrap();
            }
        }
        book
    }

    #[test]
    fn no_matches_creates() {
        let resolver = MergeResolver::new(0.8, 1e-4);
        assert_eq!(
            resolver.choose(&[], &Codebook::new()),
            MergeDecision::Create { best: None }
        );
    }

    #[test]
    fn below_threshold_creates() {
        let resolver = MergeResolver::new(0.8, 1e-4);
        let book = book_with_counts(&[1]);
        assert_eq!(
            resolver.choose(&[n(1, 0.4)], &book),
            MergeDecision::Create { best: Some(0.4) }
        );
    }

    #[test]
    fn threshold_is_inclusive() {
        let resolver = MergeResolver::new(0.8, 1e-4);
        let book = book_with_counts(&[1]);
        assert!(matches!(
            resolver.choose(&[n(1, 0.8)], &book),
            MergeDecision::Merge { .. }
        ));
    }

    #[test]
    fn tie_prefers_higher_occurrence_count() {
        let resolver = MergeResolver::new(0.8, 1e-4);
        let book = book_with_counts(&[1, 3]);
        let decision = resolver.choose(&[n(1, 0.9), n(2, 0.9)], &book);
        assert_eq!(
            decision,
            MergeDecision::Merge {
                code_id: CodeId::from_raw(2),
                similarity: 0.9,
                tied_with: vec![CodeId::from_raw(1)],
            }
        );
    }

    #[test]
    fn tie_on_count_prefers_lowest_id() {
        let resolver = MergeResolver::new(0.8, 1e-4);
        let book = book_with_counts(&[2, 2]);
        let decision = resolver.choose(&[n(2, 0.9), n(1, 0.9)], &book);
        assert!(matches!(
            decision,
            MergeDecision::Merge { code_id, .. } if code_id == CodeId::from_raw(1)
        ));
    }

    #[test]
    fn near_tie_below_threshold_is_not_eligible() {
        let resolver = MergeResolver::new(0.8, 1e-3);
        let book = book_with_counts(&[1, 5]);
        // code 2 is within epsilon of the best but under the threshold
        let decision = resolver.choose(&[n(1, 0.8), n(2, 0.7995)], &book);
        assert_eq!(
            decision,
            MergeDecision::Merge {
                code_id: CodeId::from_raw(1),
                similarity: 0.8,
                tied_with: Vec::new(),
            }
        );
    }

    #[test]
    fn decide_queries_the_index() {
        let mut book = Codebook::new();
        book.create("a", "F1", vec![1.0, 0.0]).unwrap();
        book.create("b", "F2", vec![0.0, 1.0]).unwrap();
        let index = FlatIndex::from_codebook(&book);

        let resolver = MergeResolver::new(0.9, 1e-4);
        let decision = resolver.decide(&index, &book, &[0.99, 0.05]).unwrap();
        assert!(matches!(
            decision,
            MergeDecision::Merge { code_id, .. } if code_id == CodeId::from_raw(1)
        ));

        let decision = resolver.decide(&index, &book, &[1.0, 1.0]).unwrap();
        assert!(matches!(decision, MergeDecision::Create { best: Some(_) }));
    }
}
