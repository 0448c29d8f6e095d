#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end tests for the ingest -> store -> retrieve pipeline

use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use kb_rag::config::MatchStrategy;
use kb_rag::embeddings::HashingEmbedder;
use kb_rag::ingest::{ChunkingConfig, DocumentIngester};
use kb_rag::retriever::{KnowledgeRetriever, SourceCatalog};
use kb_rag::store::{Metadata, VectorStore};

const DIM: usize = 256;

fn open_store(dir: &std::path::Path) -> VectorStore {
    let embedder = HashingEmbedder::new(DIM).expect("can create embedder");
    VectorStore::new(dir.join("vectorstore"), Box::new(embedder))
}

fn meta(source: &str, page: u64) -> Metadata {
    [
        ("source".to_string(), json!(source)),
        ("page".to_string(), json!(page)),
    ]
    .into_iter()
    .collect()
}

fn seed_manuals(store: &VectorStore) {
    let documents = vec![
        "Error code E4 on the washing machine indicates a drainage problem. \
         Check the drain filter for lint and clean it. Check the drain hose for kinks. \
         Replace the drain pump if the error persists after cleaning the filter."
            .to_string(),
        "If the television shows no picture but the power light is on, the backlight \
         inverter has likely failed. Check the inverter fuse and replace the inverter \
         board if the fuse is intact but the screen stays dark."
            .to_string(),
        "Air conditioner compressor short cycling is usually caused by low refrigerant \
         or a dirty condenser coil. Check the refrigerant pressure and clean the coil \
         before replacing any parts."
            .to_string(),
    ];
    let metadatas = vec![
        meta("washing_maching.pdf", 7),
        meta("lcd_colour_television.pdf", 12),
        meta("c5e0f2.pdf", 33),
    ];
    let ids = vec!["washer-e4".to_string(), "tv-dark".to_string(), "ac-cycle".to_string()];
    store
        .add_documents(&documents, &metadatas, &ids)
        .expect("can seed manuals");
}

fn retriever_over(store: VectorStore) -> KnowledgeRetriever {
    KnowledgeRetriever::new(
        Arc::new(store),
        SourceCatalog::appliance_manuals(),
        MatchStrategy::FirstMatch,
    )
    .expect("can create retriever")
}

#[test]
fn washer_query_surfaces_washer_manual_first() {
    let temp_dir = TempDir::new().expect("can create temp dir");
    let store = open_store(temp_dir.path());
    seed_manuals(&store);

    let hits = store
        .search("washing machine drainage error drain filter", 3, None)
        .expect("can search");

    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].id, "washer-e4");
}

#[test]
fn source_filter_restricts_eligibility() {
    let temp_dir = TempDir::new().expect("can create temp dir");
    let store = open_store(temp_dir.path());
    seed_manuals(&store);

    // Without a filter the TV chunk is reachable for a vague query.
    let unfiltered = store.search("check and replace", 10, None).expect("can search");
    assert_eq!(unfiltered.len(), 3);

    // With a source filter only the washer chunk is eligible.
    let filter: Metadata =
        std::iter::once(("source".to_string(), json!("washing_maching.pdf"))).collect();
    let filtered = store
        .search("check and replace", 10, Some(&filter))
        .expect("can search");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, "washer-e4");
}

#[test]
fn empty_knowledge_base_reports_not_found() {
    let temp_dir = TempDir::new().expect("can create temp dir");
    let retriever = retriever_over(open_store(temp_dir.path()));

    let outcome = retriever
        .search_symptom("washing machine will not drain")
        .expect("can search");
    assert!(!outcome.is_found());

    let outcome = retriever.search_error_code("E4").expect("can search");
    assert!(!outcome.is_found());
}

#[test]
fn target_chunk_stays_findable_in_a_large_corpus() {
    let temp_dir = TempDir::new().expect("can create temp dir");
    let store = open_store(temp_dir.path());

    // Synthetic filler corpus from a deterministic generator, vocabulary
    // disjoint from the query.
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    let mut documents = Vec::new();
    let mut metadatas = Vec::new();
    let mut ids = Vec::new();
    for i in 0..5000 {
        let words: Vec<String> = (0..30).map(|_| format!("filler{}", next() % 2000)).collect();
        documents.push(words.join(" "));
        metadatas.push(meta("noise.pdf", 1));
        ids.push(format!("noise-{i}"));
    }
    documents.push(
        "The drain pump impeller can jam with lint and coins, causing drainage failure \
         and error code E4 on the washing machine."
            .to_string(),
    );
    metadatas.push(meta("washing_maching.pdf", 9));
    ids.push("target".to_string());

    store
        .add_documents(&documents, &metadatas, &ids)
        .expect("can add corpus");

    let hits = store
        .search("washing machine drain pump error E4 drainage", 3, None)
        .expect("can search");
    assert!(
        hits.iter().any(|hit| hit.id == "target"),
        "target chunk should rank in the top results"
    );
}

#[test]
fn corpus_survives_process_restart() {
    let temp_dir = TempDir::new().expect("can create temp dir");

    let store = open_store(temp_dir.path());
    seed_manuals(&store);
    drop(store);

    // A fresh handle over the same directory sees the same corpus.
    let reopened = open_store(temp_dir.path());
    let stats = reopened.get_collection_stats().expect("can get stats");
    assert_eq!(stats.count, 3);
    assert_eq!(stats.dimension, DIM);

    let retriever = retriever_over(reopened);
    let outcome = retriever
        .search_error_code("washing machine E4")
        .expect("can search");
    assert!(outcome.is_found());
    let report = outcome.into_text();
    assert!(report.contains("washing_maching.pdf"));
    assert!(report.contains("Page 7"));
}

#[test]
fn ingested_files_are_retrievable_end_to_end() {
    let temp_dir = TempDir::new().expect("can create temp dir");
    let docs_dir = temp_dir.path().join("docs");
    std::fs::create_dir_all(&docs_dir).expect("can create docs dir");

    let manual = "Error code E4 on the washing machine indicates a drainage problem. \
                  Check the drain filter for lint and clean it thoroughly. \
                  Check the drain hose for kinks and straighten it. \
                  Replace the drain pump if the error persists after cleaning.";
    std::fs::write(docs_dir.join("washing_maching.txt"), manual).expect("can write manual");

    let store = open_store(temp_dir.path());
    let ingester = DocumentIngester::new(ChunkingConfig {
        chunk_size: 500,
        chunk_overlap: 50,
        min_chunk_chars: 50,
        min_page_chars: 20,
    })
    .expect("can create ingester");
    let report = ingester
        .ingest_directory(&store, &docs_dir)
        .expect("can ingest");
    assert_eq!(report.files, 1);
    assert!(report.chunks >= 1);

    // No appliance keyword in the query, so no source filter applies and the
    // ingested .txt source is reachable.
    let retriever = retriever_over(store);
    let outcome = retriever
        .search_symptom("drainage problem, lint in drain filter")
        .expect("can search");
    assert!(outcome.is_found());
    let text = outcome.into_text();
    assert!(text.contains("washing_maching.txt"));
    assert!(text.contains("drain"));
}
