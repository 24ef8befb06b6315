//! End-to-end pipeline tests with deterministic stub components
//!
//! These drive the full build-index -> retrieve -> generate -> validate ->
//! retry pipeline without any network access: a hash-based stub embedder and
//! a scripted stub language model stand in for the real endpoints.

use askdb_rs::{
    AskDbError, Config, Embedder, Embedding, FailureReason, LanguageModel, Result, SchemaColumn,
    SchemaIndex, SchemaRecord, SchemaRetriever, SqlSynthesizer, ValidationOutcome, build_index,
    synthesize_question,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const DIMENSION: usize = 16;

/// Deterministic embedder: characters hash into fixed buckets, so identical
/// text always embeds identically and similar text overlaps.
struct StubEmbedder;

impl Embedder for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; DIMENSION];
                for (i, byte) in text.to_lowercase().bytes().enumerate() {
                    vector[(byte as usize + i) % DIMENSION] += 1.0;
                }
                vector
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "stub-embedder"
    }
}

/// Embedder that always fails, for index-build error paths.
struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Embedding>> {
        Err(AskDbError::ModelInvocation(
            "embedding endpoint unreachable".to_string(),
        ))
    }

    fn model_name(&self) -> &str {
        "broken-embedder"
    }
}

/// Scripted language model returning canned responses in order.
///
/// The call counter is shared so tests can assert on it after the model
/// moves into a synthesizer.
struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedModel {
    fn new(responses: &[&str]) -> Self {
        Self::with_counter(responses, Arc::new(AtomicUsize::new(0)))
    }

    fn with_counter(responses: &[&str], calls: Arc<AtomicUsize>) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            calls,
        }
    }
}

impl LanguageModel for ScriptedModel {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .expect("scripted model mutex poisoned")
            .pop_front()
            .ok_or_else(|| AskDbError::ModelInvocation("script exhausted".to_string()))
    }
}

fn column(name: &str, data_type: &str) -> SchemaColumn {
    SchemaColumn {
        name: name.to_string(),
        data_type: data_type.to_string(),
        description: None,
        nullable: true,
        primary_key: false,
        foreign_key: None,
    }
}

fn sample_records() -> Vec<SchemaRecord> {
    vec![
        SchemaRecord {
            id: 0,
            table_name: "Customers".to_string(),
            description: Some("Customer master data.".to_string()),
            columns: vec![
                column("customer_id", "int"),
                column("name", "varchar"),
                column("org_id", "int"),
            ],
        },
        SchemaRecord {
            id: 1,
            table_name: "Orders".to_string(),
            description: Some("One row per placed order.".to_string()),
            columns: vec![
                column("order_id", "int"),
                column("customer_id", "int"),
                column("amount", "decimal"),
            ],
        },
        SchemaRecord {
            id: 2,
            table_name: "Invoices".to_string(),
            description: Some("Billing documents.".to_string()),
            columns: vec![
                column("invoice_id", "int"),
                column("order_id", "int"),
                column("billed_amount", "decimal"),
            ],
        },
    ]
}

async fn built_index(dir: &Path) -> SchemaIndex {
    build_index(&sample_records(), &StubEmbedder, dir)
        .await
        .expect("index build should succeed");
    SchemaIndex::open(dir).expect("freshly built index should open")
}

fn test_config(index_dir: &Path) -> Config {
    let mut config = Config::default();
    config.index_dir = index_dir.to_path_buf();
    config
}

fn synthesizer_with(
    config: Config,
    index: SchemaIndex,
    model: ScriptedModel,
) -> SqlSynthesizer<StubEmbedder, ScriptedModel> {
    SqlSynthesizer::with_components(config, index, StubEmbedder, model)
}

#[tokio::test]
async fn retrieval_returns_min_k_results_sorted_by_similarity() {
    let dir = tempfile::tempdir().unwrap();
    let index = built_index(&dir.path().join("idx")).await;
    let retriever = SchemaRetriever::new(index, StubEmbedder);

    for k in [1, 2, 3, 10] {
        let results = retriever
            .retrieve("billed amount for orders", k)
            .await
            .unwrap();
        assert_eq!(results.len(), k.min(3));
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}

#[tokio::test]
async fn retrieval_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let index = built_index(&dir.path().join("idx")).await;
    let retriever = SchemaRetriever::new(index, StubEmbedder);

    let first = retriever.retrieve("customer names", 3).await.unwrap();
    let second = retriever.retrieve("customer names", 3).await.unwrap();

    let ids: Vec<usize> = first.iter().map(|r| r.record.id).collect();
    let ids_again: Vec<usize> = second.iter().map(|r| r.record.id).collect();
    assert_eq!(ids, ids_again);
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.score, b.score);
    }
}

#[tokio::test]
async fn accept_on_first_try() {
    let dir = tempfile::tempdir().unwrap();
    let index = built_index(&dir.path().join("idx")).await;
    let model = ScriptedModel::new(&["```sql\nSELECT * FROM Customers\n```"]);
    let synthesizer = synthesizer_with(test_config(&dir.path().join("idx")), index, model);

    let synthesis = synthesizer.synthesize("List all customers").await.unwrap();
    assert_eq!(synthesis.sql, "SELECT * FROM Customers");
    assert_eq!(synthesis.attempts.len(), 1);
    assert!(synthesis.attempts[0].validation.is_accepted());
    assert!(!synthesis.retrieval.is_empty());
}

#[tokio::test]
async fn one_retry_then_accept_with_feedback_in_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let index = built_index(&dir.path().join("idx")).await;
    let model = ScriptedModel::new(&[
        "```sql\nSELECT * FROM Client\n```",
        "```sql\nSELECT * FROM Customers\n```",
    ]);
    let synthesizer = synthesizer_with(test_config(&dir.path().join("idx")), index, model);

    let synthesis = synthesizer.synthesize("List all customers").await.unwrap();
    assert_eq!(synthesis.attempts.len(), 2);

    match &synthesis.attempts[0].validation {
        ValidationOutcome::RejectedSchema(reason) => assert!(reason.contains("Client")),
        other => panic!("expected RejectedSchema, got {other:?}"),
    }
    assert!(synthesis.attempts[1].prompt.contains("Client"));
    assert_eq!(synthesis.sql, "SELECT * FROM Customers");
}

#[tokio::test]
async fn exhaustion_records_every_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let index = built_index(&dir.path().join("idx")).await;
    let model = ScriptedModel::new(&[
        "```sql\nSELECT * FROM\n```",
        "```sql\nSELECT WHERE\n```",
        "```sql\nGROUP BY nothing\n```",
    ]);
    let synthesizer = synthesizer_with(test_config(&dir.path().join("idx")), index, model);

    let failure = synthesizer
        .synthesize("List all customers")
        .await
        .unwrap_err();
    assert!(matches!(failure.reason, FailureReason::Exhausted));
    assert_eq!(failure.attempts.len(), 3);
    for attempt in &failure.attempts {
        assert!(!attempt.validation.is_accepted());
        assert!(attempt.validation.feedback_reason().is_some());
    }
}

#[tokio::test]
async fn missing_index_fails_before_any_model_call() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir.path().join("does_not_exist"));

    let failure = synthesize_question(&config, "List all customers")
        .await
        .unwrap_err();
    match failure.reason {
        FailureReason::IndexUnavailable(reason) => {
            assert!(reason.contains("build-index"), "reason was: {reason}");
        }
        other => panic!("expected IndexUnavailable, got {other:?}"),
    }
    assert!(failure.attempts.is_empty());
}

#[tokio::test]
async fn model_transport_failure_aborts_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let index = built_index(&dir.path().join("idx")).await;
    // An empty script makes every call fail with a transport-style error.
    let model = ScriptedModel::new(&[]);
    let synthesizer = synthesizer_with(test_config(&dir.path().join("idx")), index, model);

    let failure = synthesizer
        .synthesize("List all customers")
        .await
        .unwrap_err();
    assert!(matches!(failure.reason, FailureReason::ModelInvocation(_)));
    assert!(failure.attempts.is_empty());
}

#[tokio::test]
async fn controller_never_exceeds_max_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let index = built_index(&dir.path().join("idx")).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let model = ScriptedModel::with_counter(&["not sql"; 10], calls.clone());
    let mut config = test_config(&dir.path().join("idx"));
    config.max_attempts = 2;
    let synthesizer = synthesizer_with(config, index, model);

    let failure = synthesizer.synthesize("anything").await.unwrap_err();
    assert_eq!(failure.attempts.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rebuild_replaces_index_contents() {
    let dir = tempfile::tempdir().unwrap();
    let index_dir = dir.path().join("idx");

    build_index(&sample_records(), &StubEmbedder, &index_dir)
        .await
        .unwrap();
    assert_eq!(SchemaIndex::open(&index_dir).unwrap().len(), 3);

    let smaller = vec![sample_records().remove(0)];
    build_index(&smaller, &StubEmbedder, &index_dir)
        .await
        .unwrap();

    let index = SchemaIndex::open(&index_dir).unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index.records()[0].table_name, "Customers");
}

#[tokio::test]
async fn failed_build_leaves_no_readable_index() {
    let dir = tempfile::tempdir().unwrap();
    let index_dir = dir.path().join("idx");

    let result = build_index(&sample_records(), &BrokenEmbedder, &index_dir).await;
    assert!(matches!(result, Err(AskDbError::IndexBuild(_))));
    assert!(matches!(
        SchemaIndex::open(&index_dir),
        Err(AskDbError::IndexUnavailable { .. })
    ));
}

#[tokio::test]
async fn failed_build_preserves_previous_index() {
    let dir = tempfile::tempdir().unwrap();
    let index_dir = dir.path().join("idx");

    build_index(&sample_records(), &StubEmbedder, &index_dir)
        .await
        .unwrap();

    let result = build_index(&sample_records(), &BrokenEmbedder, &index_dir).await;
    assert!(result.is_err());

    // The old index must still open: a failed rebuild never tears it down.
    let index = SchemaIndex::open(&index_dir).unwrap();
    assert_eq!(index.len(), 3);
}
