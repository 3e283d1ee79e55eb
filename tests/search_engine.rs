//! Search engine contract tests with handcrafted embedding vectors.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;

use hansard_rag::{
    Backend, ChunkRecord, EmbeddingProvider, MetadataPredicate, RagError, SearchEngine,
    SearchFilter, SqliteChunkStore,
};

/// Provider whose vectors are fixed by the test, so similarity ordering is
/// known exactly. Unknown text maps to a vector orthogonal to everything
/// the tests query for.
struct StaticEmbeddingProvider {
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl StaticEmbeddingProvider {
    fn new(entries: &[(&str, [f32; 2])]) -> Self {
        Self {
            vectors: entries
                .iter()
                .map(|(text, v)| (text.to_string(), v.to_vec()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for StaticEmbeddingProvider {
    fn id(&self) -> String {
        "static-2".into()
    }

    fn dimensions(&self) -> usize {
        2
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                self.vectors
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0, 1.0])
            })
            .collect())
    }
}

fn record(id: &str, ext_id: &str, index: usize, content: &str) -> ChunkRecord {
    ChunkRecord::new(id, ext_id, index, content)
        .with_member_id(Some(172))
        .with_house(Some("Commons".into()))
        .with_sitting_date(NaiveDate::from_ymd_opt(2024, 3, 12))
        .with_metadata(serde_json::json!({"title": "Fixture"}))
}

async fn seeded_engine(
    provider: Arc<StaticEmbeddingProvider>,
    records: Vec<ChunkRecord>,
) -> (SearchEngine, Arc<SqliteChunkStore>) {
    let store = Arc::new(
        SqliteChunkStore::open_in_memory(provider.as_ref())
            .await
            .unwrap(),
    );
    store.upsert_chunks(records).await.unwrap();
    (
        SearchEngine::new(store.clone() as Arc<dyn Backend>, provider, 10),
        store,
    )
}

#[tokio::test]
async fn ranks_by_similarity_with_id_tiebreak() {
    let provider = Arc::new(StaticEmbeddingProvider::new(&[
        ("pensions", [1.0, 0.0]),
        ("close match", [0.9, 0.4359]),
        ("twin b", [1.0, 0.0]),
        ("twin a", [1.0, 0.0]),
    ]));

    let records = vec![
        record("X-00000", "X", 0, "close match")
            .with_embedding(vec![0.9, 0.4359]),
        record("Z-00000", "Z", 0, "twin b").with_embedding(vec![1.0, 0.0]),
        record("Y-00000", "Y", 0, "twin a").with_embedding(vec![1.0, 0.0]),
    ];
    let (engine, _store) = seeded_engine(provider, records).await;

    let response = engine
        .search("pensions", 3, &SearchFilter::none())
        .await
        .unwrap();
    assert!(response.populated);
    assert_eq!(response.count, 3);

    // The two exact matches tie on distance and come back in id order.
    assert_eq!(response.results[0].id, "Y-00000");
    assert_eq!(response.results[1].id, "Z-00000");
    assert_eq!(response.results[2].id, "X-00000");
    assert!(response.results[0].score >= response.results[2].score);
}

#[tokio::test]
async fn top_k_bounds_the_result_set() {
    let provider = Arc::new(StaticEmbeddingProvider::new(&[("q", [1.0, 0.0])]));
    let records = (0..5)
        .map(|i| {
            record(&format!("A-{i:05}"), "A", i, &format!("chunk {i}"))
                .with_embedding(vec![1.0, i as f32 * 0.1])
        })
        .collect();
    let (engine, _store) = seeded_engine(provider, records).await;

    let response = engine.search("q", 2, &SearchFilter::none()).await.unwrap();
    assert_eq!(response.count, 2);
    assert_eq!(response.results.len(), 2);
}

#[tokio::test]
async fn invalid_queries_are_rejected_before_any_embedding() {
    let provider = Arc::new(StaticEmbeddingProvider::new(&[]));
    let (engine, _store) = seeded_engine(
        provider.clone(),
        vec![record("A-00000", "A", 0, "text").with_embedding(vec![1.0, 0.0])],
    )
    .await;
    // Seeding upserts do not call the provider.
    let baseline = provider.call_count();

    assert!(matches!(
        engine.search("   ", 5, &SearchFilter::none()).await,
        Err(RagError::InvalidQuery(_))
    ));
    assert!(matches!(
        engine.search("q", 0, &SearchFilter::none()).await,
        Err(RagError::InvalidQuery(_))
    ));
    assert!(matches!(
        engine.search("q", 11, &SearchFilter::none()).await,
        Err(RagError::InvalidQuery(_))
    ));
    let bad_filter = SearchFilter::none().with_contains("   ");
    assert!(matches!(
        engine.search("q", 5, &bad_filter).await,
        Err(RagError::InvalidQuery(_))
    ));
    assert_eq!(provider.call_count(), baseline);
}

#[tokio::test]
async fn empty_store_is_a_defined_result() {
    let provider = Arc::new(StaticEmbeddingProvider::new(&[]));
    let (engine, _store) = seeded_engine(provider.clone(), vec![]).await;

    let response = engine
        .search("anything", 5, &SearchFilter::none())
        .await
        .unwrap();
    assert!(!response.populated);
    assert_eq!(response.count, 0);
    assert!(response.results.is_empty());
    // No query embedding is computed for an empty store.
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn filters_narrow_the_candidate_set() {
    let provider = Arc::new(StaticEmbeddingProvider::new(&[("q", [1.0, 0.0])]));
    let records = vec![
        record("A-00000", "A", 0, "spoken by one member")
            .with_member_id(Some(172))
            .with_embedding(vec![1.0, 0.0]),
        record("B-00000", "B", 0, "spoken by another")
            .with_member_id(Some(999))
            .with_embedding(vec![1.0, 0.0]),
        record("C-00000", "C", 0, "older debate")
            .with_member_id(Some(172))
            .with_sitting_date(NaiveDate::from_ymd_opt(2019, 1, 10))
            .with_embedding(vec![1.0, 0.0]),
    ];
    let (engine, _store) = seeded_engine(provider, records).await;

    let member = SearchFilter::none().with_predicate(MetadataPredicate::MemberIs(172));
    let response = engine.search("q", 10, &member).await.unwrap();
    let ids: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["A-00000", "C-00000"]);

    let recent = member.with_predicate(MetadataPredicate::SatOnOrAfter(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
    ));
    let response = engine.search("q", 10, &recent).await.unwrap();
    assert_eq!(response.count, 1);
    assert_eq!(response.results[0].debate_ext_id, "A");
}
