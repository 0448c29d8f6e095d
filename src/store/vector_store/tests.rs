use super::*;
use crate::embeddings::HashingEmbedder;
use serde_json::json;
use tempfile::TempDir;

const TEST_DIM: usize = 128;

fn create_test_store() -> (VectorStore, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store_at(temp_dir.path());
    (store, temp_dir)
}

fn open_store_at(dir: &std::path::Path) -> VectorStore {
    let embedder = HashingEmbedder::new(TEST_DIM).expect("should create embedder");
    VectorStore::new(dir.join("vectorstore"), Box::new(embedder))
}

fn meta(pairs: &[(&str, serde_json::Value)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn add_chunks(store: &VectorStore, chunks: &[(&str, &str, Metadata)]) {
    let documents: Vec<String> = chunks.iter().map(|(_, text, _)| (*text).to_string()).collect();
    let metadatas: Vec<Metadata> = chunks.iter().map(|(_, _, md)| md.clone()).collect();
    let ids: Vec<String> = chunks.iter().map(|(id, _, _)| (*id).to_string()).collect();
    store
        .add_documents(&documents, &metadatas, &ids)
        .expect("should add documents");
}

#[test]
fn mismatched_lengths_rejected_before_mutation() {
    let (store, _temp_dir) = create_test_store();

    let result = store.add_documents(
        &["one".to_string(), "two".to_string()],
        &[meta(&[])],
        &["a".to_string(), "b".to_string()],
    );
    assert!(matches!(result, Err(RagError::Validation(_))));

    let stats = store.get_collection_stats().expect("should get stats");
    assert_eq!(stats.count, 0);
}

#[test]
fn parallel_arrays_stay_in_lock_step() {
    let (store, _temp_dir) = create_test_store();

    add_chunks(
        &store,
        &[
            ("a", "drum not spinning", meta(&[("source", json!("washer.pdf"))])),
            ("b", "screen flickers", meta(&[("source", json!("tv.pdf"))])),
        ],
    );
    add_chunks(
        &store,
        &[("c", "compressor noise", meta(&[("source", json!("ac.pdf"))]))],
    );

    let state = store.read_state().expect("should read state");
    let rows = state.meta.ids.len();
    assert_eq!(rows, 3);
    assert_eq!(state.meta.texts.len(), rows);
    assert_eq!(state.meta.metadatas.len(), rows);
    assert_eq!(state.embeddings.len(), rows * TEST_DIM);
}

#[test]
fn empty_batch_is_a_noop() {
    let (store, _temp_dir) = create_test_store();
    store
        .add_documents(&[], &[], &[])
        .expect("should handle empty batch");
    let stats = store.get_collection_stats().expect("should get stats");
    assert_eq!(stats.count, 0);
    assert_eq!(stats.dimension, 0);
}

#[test]
fn empty_store_search_returns_empty_result() {
    let (store, _temp_dir) = create_test_store();
    let hits = store
        .search("anything at all", 5, None)
        .expect("search should not error on an empty store");
    assert!(hits.is_empty());
}

#[test]
fn search_ranks_by_similarity() {
    let (store, _temp_dir) = create_test_store();

    add_chunks(
        &store,
        &[
            ("washer", "drum not spinning, check belt tension", meta(&[])),
            ("tv", "backlight inverter failure causes dark screen", meta(&[])),
            ("ac", "compressor refrigerant leak", meta(&[])),
        ],
    );

    let hits = store
        .search("drum not spinning, check belt tension", 3, None)
        .expect("search should succeed");

    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].id, "washer");
    assert!(hits[0].score > hits[1].score);
    assert!((hits[0].score - 1.0).abs() < 1e-4);
}

#[test]
fn n_results_caps_and_is_capped_by_candidates() {
    let (store, _temp_dir) = create_test_store();

    add_chunks(
        &store,
        &[
            ("a", "first chunk about pumps", meta(&[])),
            ("b", "second chunk about pumps", meta(&[])),
        ],
    );

    let hits = store.search("pumps", 10, None).expect("search");
    assert_eq!(hits.len(), 2);

    let hits = store.search("pumps", 1, None).expect("search");
    assert_eq!(hits.len(), 1);
}

#[test]
fn metadata_filter_excludes_non_matching_chunks() {
    let (store, _temp_dir) = create_test_store();

    add_chunks(
        &store,
        &[
            (
                "tv-e4",
                "error E4 signals a backlight fault",
                meta(&[("source", json!("tv.pdf"))]),
            ),
            (
                "washer-e4",
                "error E4 signals a drainage fault",
                meta(&[("source", json!("washer.pdf"))]),
            ),
        ],
    );

    let filter = meta(&[("source", json!("washer.pdf"))]);
    let hits = store
        .search("error E4", 10, Some(&filter))
        .expect("search should succeed");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "washer-e4");
}

#[test]
fn filter_matching_nothing_returns_empty_result() {
    let (store, _temp_dir) = create_test_store();
    add_chunks(
        &store,
        &[("a", "some content here", meta(&[("source", json!("washer.pdf"))]))],
    );

    let filter = meta(&[("source", json!("missing.pdf"))]);
    let hits = store.search("content", 5, Some(&filter)).expect("search");
    assert!(hits.is_empty());
}

#[test]
fn filter_requires_every_pair_to_match() {
    let (store, _temp_dir) = create_test_store();
    add_chunks(
        &store,
        &[(
            "a",
            "drain pump replacement steps",
            meta(&[("source", json!("washer.pdf")), ("page", json!(3))]),
        )],
    );

    let matching = meta(&[("source", json!("washer.pdf")), ("page", json!(3))]);
    assert_eq!(store.search("pump", 5, Some(&matching)).expect("search").len(), 1);

    let wrong_page = meta(&[("source", json!("washer.pdf")), ("page", json!(4))]);
    assert!(store.search("pump", 5, Some(&wrong_page)).expect("search").is_empty());
}

#[test]
fn duplicate_ids_create_two_rows() {
    let (store, _temp_dir) = create_test_store();

    add_chunks(&store, &[("dup", "first body", meta(&[]))]);
    add_chunks(&store, &[("dup", "second body", meta(&[]))]);

    let stats = store.get_collection_stats().expect("stats");
    assert_eq!(stats.count, 2);
}

#[test]
fn dimension_fixed_by_first_add() {
    let (store, _temp_dir) = create_test_store();

    add_chunks(&store, &[("a", "first", meta(&[]))]);
    let stats = store.get_collection_stats().expect("stats");
    assert_eq!(stats.dimension, TEST_DIM);

    add_chunks(&store, &[("b", "second", meta(&[]))]);
    let stats = store.get_collection_stats().expect("stats");
    assert_eq!(stats.dimension, TEST_DIM);
    assert_eq!(stats.count, 2);
}

#[test]
fn connect_is_idempotent() {
    let (store, _temp_dir) = create_test_store();

    store.connect().expect("first connect");
    add_chunks(&store, &[("a", "persisted chunk", meta(&[]))]);
    store.connect().expect("second connect");

    let stats = store.get_collection_stats().expect("stats");
    assert_eq!(stats.count, 1);
}

#[test]
fn persisted_store_survives_reload() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let store = open_store_at(temp_dir.path());
    add_chunks(
        &store,
        &[
            (
                "washer-1",
                "drum not spinning, check belt tension",
                meta(&[("source", json!("washer.pdf")), ("page", json!(3))]),
            ),
            (
                "tv-1",
                "no picture, inspect the backlight inverter",
                meta(&[("source", json!("tv.pdf")), ("page", json!(12))]),
            ),
        ],
    );
    let before: Vec<String> = store
        .search("machine not spinning", 2, None)
        .expect("search")
        .into_iter()
        .map(|hit| hit.id)
        .collect();
    drop(store);

    let reloaded = open_store_at(temp_dir.path());
    let after: Vec<String> = reloaded
        .search("machine not spinning", 2, None)
        .expect("search after reload")
        .into_iter()
        .map(|hit| hit.id)
        .collect();

    assert_eq!(before, after);
    let stats = reloaded.get_collection_stats().expect("stats");
    assert_eq!(stats.count, 2);
    assert_eq!(stats.dimension, TEST_DIM);
}

#[test]
fn corrupt_matrix_header_is_a_store_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store_dir = temp_dir.path().join("vectorstore");

    let store = open_store_at(temp_dir.path());
    add_chunks(&store, &[("a", "some chunk text", meta(&[]))]);
    drop(store);

    std::fs::write(store_dir.join("embeddings.bin"), b"garbage").expect("should overwrite");

    let reloaded = open_store_at(temp_dir.path());
    assert!(matches!(reloaded.connect(), Err(RagError::Store(_))));
}

#[test]
fn error_code_report_carries_source_attribution() {
    let (store, _temp_dir) = create_test_store();

    add_chunks(
        &store,
        &[(
            "washer-e4",
            "Error E4 indicates a drainage fault. Clean the drain filter and check the hose.",
            meta(&[("source", json!("washer.pdf")), ("page", json!(7))]),
        )],
    );

    let report = store.search_by_error_code("E4").expect("should build report");
    assert!(report.starts_with("Error code information:"));
    assert!(report.contains("washer.pdf"));
    assert!(report.contains("Page 7"));
}

#[test]
fn error_code_report_not_found_sentinel() {
    let (store, _temp_dir) = create_test_store();
    let report = store.search_by_error_code("E99").expect("should not error");
    assert_eq!(report, "No information found for this error code.");
}

#[test]
fn stats_report_backend_and_location() {
    let (store, temp_dir) = create_test_store();
    let stats = store.get_collection_stats().expect("stats");
    assert_eq!(stats.backend, "local-hash");
    assert_eq!(stats.store_dir, temp_dir.path().join("vectorstore"));
}

/// Backend that fails every embed call, standing in for an unreachable
/// remote endpoint.
struct UnreachableEmbedder;

impl Embedder for UnreachableEmbedder {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::Retrieval(
            "embedding endpoint unreachable".to_string(),
        ))
    }
}

/// Backend that returns one vector regardless of batch size.
struct ShortBatchEmbedder;

impl Embedder for ShortBatchEmbedder {
    fn name(&self) -> &'static str {
        "short-batch"
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(vec![vec![1.0, 0.0]])
    }
}

#[test]
fn empty_store_search_skips_the_embedding_backend() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = VectorStore::new(
        temp_dir.path().join("vectorstore"),
        Box::new(UnreachableEmbedder),
    );

    let hits = store
        .search("anything at all", 5, None)
        .expect("an empty store should answer without embedding the query");
    assert!(hits.is_empty());
}

#[test]
fn reopened_store_rejects_different_dimension_backend() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let store = open_store_at(temp_dir.path());
    add_chunks(&store, &[("a", "persisted chunk text", meta(&[]))]);
    drop(store);

    let embedder = HashingEmbedder::new(TEST_DIM / 2).expect("should create embedder");
    let reopened = VectorStore::new(temp_dir.path().join("vectorstore"), Box::new(embedder));

    let result = reopened.add_documents(
        &["another chunk".to_string()],
        &[meta(&[])],
        &["b".to_string()],
    );
    assert!(matches!(result, Err(RagError::Store(_))));

    let result = reopened.search("persisted", 3, None);
    assert!(matches!(result, Err(RagError::Store(_))));

    // The rejected add leaves the persisted corpus untouched.
    let stats = reopened.get_collection_stats().expect("stats");
    assert_eq!(stats.count, 1);
    assert_eq!(stats.dimension, TEST_DIM);
}

#[test]
fn short_embedding_batch_rejected_before_append() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = VectorStore::new(
        temp_dir.path().join("vectorstore"),
        Box::new(ShortBatchEmbedder),
    );

    let result = store.add_documents(
        &["one".to_string(), "two".to_string()],
        &[meta(&[]), meta(&[])],
        &["a".to_string(), "b".to_string()],
    );
    assert!(matches!(result, Err(RagError::Store(_))));

    let stats = store.get_collection_stats().expect("stats");
    assert_eq!(stats.count, 0);
}

#[test]
fn cosine_similarity_of_zero_vector_is_finite() {
    let zero = vec![0.0f32; 4];
    let other = vec![1.0f32, 0.0, 0.0, 0.0];
    let score = cosine_similarity(&zero, &other);
    assert!(score.is_finite());
    assert_eq!(score, 0.0);
}
