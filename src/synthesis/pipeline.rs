//! The synthesis run: concurrent preparation, sequential merge
//!
//! Workers generate candidates and embed them concurrently, bounded by a
//! semaphore. Their results go into a reorder buffer keyed by fragment
//! position, and a single consumer applies them strictly in that order, so
//! the outcome depends only on the input order and the embeddings, never on
//! which worker finished first.

use super::cancel::CancellationToken;
use super::candidate::{Candidate, CandidateOutcome, CandidateReport, Prepared};
use super::resolver::{MergeDecision, MergeResolver};
use super::summary::RunSummary;
use super::SynthesisError;
use crate::codebook::Codebook;
use crate::config::{RetryPolicy, SynthesisConfig};
use crate::embedding::{Embedder, LabelEmbeddings};
use crate::fragment::{Fragment, MAX_CODES_PER_FRAGMENT};
use crate::generator::{CandidateGenerator, GeneratorError};
use crate::index::{populate, FlatIndex, SimilarityIndex};
use crate::ledger::{IngestKey, TraceLedger};
use crate::retry::with_retry;
use crate::storage::{CodebookState, CodebookStore};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A worker's result for one fragment.
#[derive(Debug)]
enum FragmentWork {
    Ready {
        fragment_id: String,
        candidates: Vec<Prepared>,
    },
    Failed {
        fragment_id: String,
        error: GeneratorError,
    },
    Cancelled {
        fragment_id: String,
    },
}

/// Everything a worker needs, cloned per task.
#[derive(Clone)]
struct WorkerContext {
    generator: Arc<dyn CandidateGenerator>,
    embeddings: Arc<LabelEmbeddings>,
    /// Ledger keys at run start: these candidates are not embedded again
    known: Arc<HashSet<IngestKey>>,
    retry: RetryPolicy,
    timeout: Duration,
    cancel: CancellationToken,
}

impl WorkerContext {
    async fn prepare(&self, fragment: Fragment) -> FragmentWork {
        if self.cancel.is_cancelled() {
            return FragmentWork::Cancelled {
                fragment_id: fragment.id,
            };
        }

        let labels = match with_retry(&self.retry, self.timeout, "generate", || {
            self.generator.generate(&fragment)
        })
        .await
        {
            Ok(labels) => labels,
            Err(error) => {
                warn!(
                    fragment = %fragment.id,
                    generator = self.generator.id(),
                    error = %error,
                    "candidate generation failed"
                );
                return FragmentWork::Failed {
                    fragment_id: fragment.id,
                    error,
                };
            }
        };
        if labels.len() > MAX_CODES_PER_FRAGMENT {
            debug!(
                fragment = %fragment.id,
                count = labels.len(),
                "generator returned more candidates than expected"
            );
        }

        let validated: Vec<_> = labels
            .iter()
            .enumerate()
            .map(|(index, label)| Candidate::validate(&fragment.id, label, index))
            .collect();
        let needs_embedding =
            |c: &Candidate| -> bool { !self.known.contains(&c.ingest_key()) };

        let to_embed: Vec<String> = validated
            .iter()
            .filter_map(|v| v.as_ref().ok())
            .filter(|c| needs_embedding(c))
            .map(|c| c.label.clone())
            .collect();
        let mut embedded = if to_embed.is_empty() {
            Vec::new()
        } else {
            self.embeddings.resolve(&to_embed).await
        }
        .into_iter();

        let candidates = validated
            .into_iter()
            .map(|v| match v {
                Err(e) => Prepared::Invalid(e),
                Ok(c) if !needs_embedding(&c) => Prepared::Pending(c),
                Ok(c) => match embedded.next() {
                    Some(Ok(vector)) => Prepared::Embedded(c, vector),
                    Some(Err(e)) => {
                        warn!(
                            fragment = %fragment.id,
                            label = %c.label,
                            error = %e,
                            "embedding failed"
                        );
                        Prepared::Unresolved(c, e)
                    }
                    None => Prepared::Pending(c),
                },
            })
            .collect();

        FragmentWork::Ready {
            fragment_id: fragment.id,
            candidates,
        }
    }
}

fn has_vectors(state: &CodebookState) -> bool {
    !state.codebook.is_empty() || !state.label_cache.is_empty()
}

/// Incrementally merges candidate codes into a persistent codebook.
///
/// Owns the in-memory codebook and ledger for the duration of its life;
/// the store is read once at open and written at each checkpoint.
pub struct Synthesizer {
    config: SynthesisConfig,
    resolver: MergeResolver,
    generator: Arc<dyn CandidateGenerator>,
    embeddings: Arc<LabelEmbeddings>,
    store: Arc<dyn CodebookStore>,
    state: CodebookState,
    index: Box<dyn SimilarityIndex>,
}

impl Synthesizer {
    /// Load the codebook from `store` and prepare to run.
    ///
    /// Fails with `EmbeddingModelMismatch` when the store holds vectors from
    /// a different embedding model than `embedder`. A store without vectors
    /// adopts the current model.
    pub fn open(
        config: SynthesisConfig,
        store: Arc<dyn CodebookStore>,
        generator: Arc<dyn CandidateGenerator>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, SynthesisError> {
        config.validate()?;
        let mut state = store.load()?;
        let current = embedder.model_name().to_string();
        match state.embedding_model.as_deref() {
            Some(stored) if stored != current && has_vectors(&state) => {
                return Err(SynthesisError::EmbeddingModelMismatch {
                    stored: stored.to_string(),
                    current,
                });
            }
            _ => state.embedding_model = Some(current),
        }
        let embeddings = LabelEmbeddings::new(
            embedder,
            config.embedding_retry.clone(),
            config.embedding_timeout(),
        )
        .with_cached(state.label_cache.clone());
        let index = Box::new(FlatIndex::from_codebook(&state.codebook));

        info!(
            codes = state.codebook.len(),
            ledger = state.ledger.len(),
            cached_labels = embeddings.len(),
            model = embeddings.model_name(),
            "opened codebook"
        );

        Ok(Self {
            resolver: MergeResolver::from_config(&config),
            config,
            generator,
            embeddings: Arc::new(embeddings),
            store,
            state,
            index,
        })
    }

    /// Swap in another similarity index, loading every current code into it.
    pub fn with_index(
        mut self,
        mut index: Box<dyn SimilarityIndex>,
    ) -> Result<Self, SynthesisError> {
        populate(index.as_mut(), &self.state.codebook)?;
        self.index = index;
        Ok(self)
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    pub fn codebook(&self) -> &Codebook {
        &self.state.codebook
    }

    pub fn ledger(&self) -> &TraceLedger {
        &self.state.ledger
    }

    pub fn embeddings(&self) -> &LabelEmbeddings {
        &self.embeddings
    }

    /// Persist the current state.
    pub fn checkpoint(&mut self) -> Result<(), SynthesisError> {
        self.state.label_cache = self.embeddings.snapshot();
        self.store.save(&self.state)?;
        debug!(codes = self.state.codebook.len(), "checkpoint saved");
        Ok(())
    }

    /// Process a batch of fragments.
    ///
    /// Fragments are applied in id order. Generation and embedding failures
    /// are isolated to their fragment or candidate and reported in the
    /// summary; only persistence and index failures abort the run.
    pub async fn run(
        &mut self,
        mut fragments: Vec<Fragment>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, SynthesisError> {
        fragments.sort_by(|a, b| a.id.cmp(&b.id));
        let ids: Vec<String> = fragments.iter().map(|f| f.id.clone()).collect();
        let total = fragments.len();
        let mut summary =
            RunSummary::start(total, self.state.codebook.len(), self.state.ledger.len());
        info!(
            run = %summary.run_id,
            fragments = total,
            workers = self.config.workers,
            "synthesis run started"
        );

        let context = WorkerContext {
            generator: Arc::clone(&self.generator),
            embeddings: Arc::clone(&self.embeddings),
            known: Arc::new(self.state.ledger.keys().copied().collect()),
            retry: self.config.generation_retry.clone(),
            timeout: self.config.generation_timeout(),
            cancel: cancel.clone(),
        };
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks = JoinSet::new();
        for (position, fragment) in fragments.into_iter().enumerate() {
            let context = context.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let work = match semaphore.acquire_owned().await {
                    Ok(_permit) => context.prepare(fragment).await,
                    Err(_) => FragmentWork::Cancelled {
                        fragment_id: fragment.id,
                    },
                };
                (position, work)
            });
        }

        let mut buffer: BTreeMap<usize, FragmentWork> = BTreeMap::new();
        let mut next = 0;
        let mut since_checkpoint = 0;
        loop {
            while next < total && !cancel.is_cancelled() {
                let Some(work) = buffer.remove(&next) else {
                    break;
                };
                if self.apply_fragment(work, &mut summary)? {
                    since_checkpoint += 1;
                }
                next += 1;
                let every = self.config.checkpoint_every;
                if every > 0 && since_checkpoint >= every {
                    self.checkpoint()?;
                    summary.checkpoints += 1;
                    since_checkpoint = 0;
                }
            }
            if next == total || cancel.is_cancelled() {
                break;
            }
            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = cancel.cancelled() => break,
            };
            match joined {
                Some(Ok((position, work))) => {
                    buffer.insert(position, work);
                }
                Some(Err(e)) => warn!(error = %e, "synthesis worker did not complete"),
                None => {
                    // The worker for `next` died without reporting.
                    summary.fail_fragment(&ids[next], "worker terminated");
                    next += 1;
                }
            }
        }

        if next < total {
            tasks.shutdown().await;
            summary.cancelled_fragments.extend(ids[next..].iter().cloned());
            info!(
                applied = next,
                cancelled = total - next,
                "synthesis run cancelled"
            );
        }

        self.checkpoint()?;
        summary.checkpoints += 1;
        summary.finish(self.state.codebook.len(), self.state.ledger.len());
        info!(
            run = %summary.run_id,
            merged = summary.merged,
            created = summary.created,
            skipped = summary.skipped,
            unresolved = summary.unresolved.len(),
            ties = summary.ties.len(),
            codes = summary.codes_after,
            "synthesis run finished"
        );
        Ok(summary)
    }

    /// Apply one fragment's result. Returns whether candidates were applied.
    fn apply_fragment(
        &mut self,
        work: FragmentWork,
        summary: &mut RunSummary,
    ) -> Result<bool, SynthesisError> {
        match work {
            FragmentWork::Ready {
                fragment_id,
                candidates,
            } => {
                for prepared in candidates {
                    let report = self.apply_candidate(&fragment_id, prepared)?;
                    summary.record(report);
                }
                summary.fragments_applied += 1;
                Ok(true)
            }
            FragmentWork::Failed { fragment_id, error } => {
                summary.fail_fragment(&fragment_id, error.to_string());
                Ok(false)
            }
            FragmentWork::Cancelled { fragment_id } => {
                summary.cancelled_fragments.push(fragment_id);
                Ok(false)
            }
        }
    }

    fn apply_candidate(
        &mut self,
        fragment_id: &str,
        prepared: Prepared,
    ) -> Result<CandidateReport, SynthesisError> {
        debug!(fragment = fragment_id, state = ?prepared.state(), "applying candidate");
        let candidate = match &prepared {
            Prepared::Invalid(e) => {
                return Ok(CandidateReport {
                    evidence_id: fragment_id.to_string(),
                    label: String::new(),
                    index: e.index(),
                    outcome: CandidateOutcome::Invalid {
                        reason: e.to_string(),
                    },
                });
            }
            Prepared::Pending(c) | Prepared::Embedded(c, _) | Prepared::Unresolved(c, _) => {
                c.clone()
            }
        };

        let report = |outcome| CandidateReport {
            evidence_id: candidate.evidence_id.clone(),
            label: candidate.label.clone(),
            index: candidate.index,
            outcome,
        };

        if let Some(record) = self.state.ledger.get(&candidate.ingest_key()) {
            return Ok(report(CandidateOutcome::AlreadyIngested {
                code_id: record.code_id,
            }));
        }

        let outcome = match prepared {
            Prepared::Embedded(_, vector) => self.merge_or_create(&candidate, &vector)?,
            Prepared::Unresolved(_, e) => CandidateOutcome::Unresolved {
                reason: e.to_string(),
            },
            Prepared::Pending(_) | Prepared::Invalid(_) => CandidateOutcome::Unresolved {
                reason: "candidate was never embedded".to_string(),
            },
        };
        Ok(report(outcome))
    }

    fn merge_or_create(
        &mut self,
        candidate: &Candidate,
        vector: &[f32],
    ) -> Result<CandidateOutcome, SynthesisError> {
        if let Err(e) = self.state.codebook.check_dimension(vector) {
            warn!(label = %candidate.label, error = %e, "embedding rejected");
            return Ok(CandidateOutcome::Unresolved {
                reason: e.to_string(),
            });
        }

        let decision = self
            .resolver
            .decide(self.index.as_ref(), &self.state.codebook, vector)?;
        let outcome = match decision {
            MergeDecision::Merge {
                code_id,
                similarity,
                tied_with,
            } => {
                let entry = self.state.codebook.merge(
                    code_id,
                    &candidate.label,
                    &candidate.evidence_id,
                    self.config.relabel,
                )?;
                debug!(
                    label = %candidate.label,
                    code = %code_id,
                    canonical = %entry.canonical_label,
                    similarity,
                    ties = tied_with.len(),
                    "merged candidate"
                );
                CandidateOutcome::Merged {
                    code_id,
                    similarity,
                    tied_with,
                }
            }
            MergeDecision::Create { best } => {
                let code_id = self.state.codebook.create(
                    &candidate.label,
                    &candidate.evidence_id,
                    vector.to_vec(),
                )?;
                self.index.insert(code_id, vector)?;
                debug!(label = %candidate.label, code = %code_id, best = ?best, "created code");
                CandidateOutcome::NewEntry { code_id }
            }
        };

        if let Some(code_id) = outcome.code_id() {
            self.state
                .ledger
                .record(&candidate.evidence_id, &candidate.label, code_id);
        }
        Ok(outcome)
    }
}
