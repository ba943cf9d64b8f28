//! Codebook state across process restarts
//!
//! Every test reopens the store from disk between runs, the way two
//! invocations of the CLI would.

mod common;

use codebook::{
    CancellationToken, CodeId, CodebookStore, JsonFileStore, OpenStore, PrecodedGenerator,
    SqliteStore, SynthesisError, Synthesizer,
};
use common::{
    at_similarity, fragment, open_synthesizer, test_config, CountingStore, FailAfterStore,
    VectorEmbedder,
};
use std::sync::Arc;
use tempfile::TempDir;

fn embedder() -> VectorEmbedder {
    VectorEmbedder::new()
        .with("trust in the institution", vec![1.0, 0.0])
        .with("trusting the institution", at_similarity(0.95))
        .with("fear of relapse", vec![0.0, 1.0])
        .with("afraid of relapsing", vec![0.1, 0.99])
}

/// First run: two distinct concepts. Second run: one synonym of each.
async fn two_runs(open: impl Fn() -> Arc<dyn CodebookStore>) {
    let first_embedder = Arc::new(embedder());
    let mut synth = open_synthesizer(
        test_config(0.85),
        open(),
        Arc::new(PrecodedGenerator::new()),
        first_embedder.clone(),
    );
    synth
        .run(
            vec![
                fragment("interview-1", &["trust in the institution"]),
                fragment("interview-2", &["fear of relapse"]),
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let first_pairs = synth.codebook().canonical_pairs();
    drop(synth);

    let second_embedder = Arc::new(embedder());
    let mut synth = open_synthesizer(
        test_config(0.85),
        open(),
        Arc::new(PrecodedGenerator::new()),
        second_embedder.clone(),
    );
    assert_eq!(synth.codebook().canonical_pairs(), first_pairs);
    assert_eq!(synth.ledger().len(), 2);

    let summary = synth
        .run(
            vec![
                // already ingested in the first run
                fragment("interview-1", &["trust in the institution"]),
                fragment("interview-3", &["trusting the institution", "afraid of relapsing"]),
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.merged, 2);
    assert_eq!(summary.created, 0);
    assert_eq!(synth.codebook().canonical_pairs(), first_pairs, "ids are stable");
    assert_eq!(
        synth.ledger().assignments_for("interview-3"),
        &[CodeId::from_raw(1), CodeId::from_raw(2)]
    );
    assert_eq!(
        second_embedder.embedded_texts(),
        vec!["trusting the institution", "afraid of relapsing"],
        "labels embedded in an earlier run come from the cache"
    );

    drop(synth);
    let reloaded = open().load().unwrap();
    let entry = reloaded.codebook.get(&CodeId::from_raw(1)).unwrap();
    assert_eq!(entry.occurrence_count, 2);
    assert_eq!(entry.synonym_labels.distinct(), 2);
    assert_eq!(reloaded.ledger.len(), 4);
    assert!(reloaded.label_cache.contains_key("afraid of relapsing"));
}

#[tokio::test]
async fn sqlite_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("codebook.db");
    two_runs(|| -> Arc<dyn CodebookStore> {
        Arc::new(SqliteStore::open(&path).unwrap())
    })
    .await;
}

#[tokio::test]
async fn json_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("codebook.json");
    two_runs(|| -> Arc<dyn CodebookStore> { Arc::new(JsonFileStore::new(&path)) }).await;
}

#[tokio::test]
async fn new_codes_after_restart_continue_the_id_sequence() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("codebook.db");
    let cancel = CancellationToken::new();

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let mut synth = open_synthesizer(
        test_config(0.85),
        store,
        Arc::new(PrecodedGenerator::new()),
        Arc::new(embedder()),
    );
    synth
        .run(vec![fragment("F1", &["trust in the institution"])], &cancel)
        .await
        .unwrap();
    drop(synth);

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let mut synth = open_synthesizer(
        test_config(0.85),
        store,
        Arc::new(PrecodedGenerator::new()),
        Arc::new(embedder()),
    );
    synth
        .run(vec![fragment("F2", &["fear of relapse"])], &cancel)
        .await
        .unwrap();

    assert_eq!(synth.ledger().assignments_for("F2"), &[CodeId::from_raw(2)]);
}

#[tokio::test]
async fn checkpoints_follow_the_configured_cadence() {
    let store = Arc::new(CountingStore::new(SqliteStore::open_in_memory().unwrap()));
    let labels = ["trust in the institution", "fear of relapse"];
    let fragments = (1..=5)
        .map(|i| fragment(&format!("F{}", i), &[labels[i % 2]]))
        .collect();

    let mut synth = open_synthesizer(
        test_config(0.85).with_checkpoint_every(2),
        store.clone(),
        Arc::new(PrecodedGenerator::new()),
        Arc::new(embedder()),
    );
    let summary = synth.run(fragments, &CancellationToken::new()).await.unwrap();

    // after F2, after F4 and the final save
    assert_eq!(store.saves(), 3);
    assert_eq!(summary.checkpoints, 3);
    assert_eq!(store.inner().load().unwrap().ledger.len(), 5);
}

#[tokio::test]
async fn failed_save_aborts_and_keeps_last_checkpoint() {
    let store = Arc::new(FailAfterStore::new(SqliteStore::open_in_memory().unwrap(), 1));
    let fragments = vec![
        fragment("F1", &["trust in the institution"]),
        fragment("F2", &["fear of relapse"]),
        fragment("F3", &["trusting the institution"]),
        fragment("F4", &["afraid of relapsing"]),
    ];

    let mut synth = open_synthesizer(
        test_config(0.85).with_checkpoint_every(2),
        store.clone(),
        Arc::new(PrecodedGenerator::new()),
        Arc::new(embedder()),
    );
    let result = synth.run(fragments, &CancellationToken::new()).await;

    assert!(matches!(result, Err(SynthesisError::Persistence(_))));
    let saved = store.inner().load().unwrap();
    assert_eq!(saved.codebook.len(), 2);
    assert_eq!(saved.ledger.len(), 2, "only the first checkpoint reached disk");
    assert!(saved.ledger.assignments_for("F3").is_empty());
}

/// One run with the default mock model, then a reopen under another name.
async fn reopen_with_other_model(open: impl Fn() -> Arc<dyn CodebookStore>) {
    let mut synth = open_synthesizer(
        test_config(0.85),
        open(),
        Arc::new(PrecodedGenerator::new()),
        Arc::new(embedder()),
    );
    synth
        .run(
            vec![fragment("interview-1", &["trust in the institution"])],
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    drop(synth);
    assert_eq!(open().load().unwrap().embedding_model.as_deref(), Some("vector-mock"));

    let other = Arc::new(embedder().named("other-model"));
    let result = Synthesizer::open(
        test_config(0.85),
        open(),
        Arc::new(PrecodedGenerator::new()),
        other.clone(),
    );

    match result {
        Err(SynthesisError::EmbeddingModelMismatch { stored, current }) => {
            assert_eq!(stored, "vector-mock");
            assert_eq!(current, "other-model");
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("vectors from another model were accepted"),
    }
    assert_eq!(other.calls(), 0);
    let stored = open().load().unwrap();
    assert_eq!(stored.codebook.len(), 1);
    assert_eq!(stored.embedding_model.as_deref(), Some("vector-mock"));
}

#[tokio::test]
async fn sqlite_store_rejects_another_embedding_model() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("codebook.db");
    reopen_with_other_model(|| -> Arc<dyn CodebookStore> {
        Arc::new(SqliteStore::open(&path).unwrap())
    })
    .await;
}

#[tokio::test]
async fn json_store_rejects_another_embedding_model() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("codebook.json");
    reopen_with_other_model(|| -> Arc<dyn CodebookStore> { Arc::new(JsonFileStore::new(&path)) })
        .await;
}

#[tokio::test]
async fn empty_store_adopts_the_current_model() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("codebook.db");

    // a run that embedded nothing leaves no vectors behind
    let mut synth = open_synthesizer(
        test_config(0.85),
        Arc::new(SqliteStore::open(&path).unwrap()),
        Arc::new(PrecodedGenerator::new()),
        Arc::new(embedder().named("first-model")),
    );
    synth.run(Vec::new(), &CancellationToken::new()).await.unwrap();
    drop(synth);

    let mut synth = open_synthesizer(
        test_config(0.85),
        Arc::new(SqliteStore::open(&path).unwrap()),
        Arc::new(PrecodedGenerator::new()),
        Arc::new(embedder().named("second-model")),
    );
    synth
        .run(vec![fragment("F1", &["fear of relapse"])], &CancellationToken::new())
        .await
        .unwrap();
    drop(synth);

    let stored = SqliteStore::open(&path).unwrap().load().unwrap();
    assert_eq!(stored.embedding_model.as_deref(), Some("second-model"));
}

#[test]
fn corrupt_json_is_reported_not_replaced() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("codebook.json");
    std::fs::write(&path, "{ not json").unwrap();

    let store = JsonFileStore::new(&path);
    assert!(store.load().is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
}
