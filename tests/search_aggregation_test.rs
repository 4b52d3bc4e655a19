// Multi-source search aggregation: hybrid fan-out, degraded success when a
// subset of sources fails, AllSourcesFailed when none succeed, client-side
// path filtering, and quality-weighted ranking.

use std::collections::BTreeMap;
use std::sync::Arc;

use kortex::{
    CorrelationId, ErrorKind, IndexingOptions, IndexingRequest, KortexConfig, PipelineError,
    RagSource, Runtime, ScoredPoint, SearchFilters, SearchKind, SearchRequest, SearchResultItem,
    VectorFilter, VectorPoint, VectorStore,
};

fn test_config() -> KortexConfig {
    KortexConfig {
        embedding_dimension: 32,
        ..KortexConfig::default()
    }
}

fn search_request(query: &str, kind: SearchKind) -> SearchRequest {
    SearchRequest {
        query: query.to_string(),
        kind,
        filters: SearchFilters::default(),
        max_results: 10,
        quality_weight: None,
        include_context: true,
        correlation_id: CorrelationId::new(),
    }
}

/// Static RAG source returning canned lexical hits.
struct StaticRag {
    items: Vec<SearchResultItem>,
}

#[async_trait::async_trait]
impl RagSource for StaticRag {
    async fn search(
        &self,
        _query: &str,
        limit: usize,
        _filters: &SearchFilters,
    ) -> Result<Vec<SearchResultItem>, PipelineError> {
        Ok(self.items.iter().take(limit).cloned().collect())
    }
}

struct FailingRag;

#[async_trait::async_trait]
impl RagSource for FailingRag {
    async fn search(
        &self,
        _: &str,
        _: usize,
        _: &SearchFilters,
    ) -> Result<Vec<SearchResultItem>, PipelineError> {
        Err(PipelineError::InternalError("rag down".into()))
    }
}

struct FailingVectorStore;

#[async_trait::async_trait]
impl VectorStore for FailingVectorStore {
    async fn upsert(&self, _: &str, _: Vec<VectorPoint>) -> Result<(), PipelineError> {
        Err(PipelineError::VectorStoreUnavailable("down".into()))
    }

    async fn search(
        &self,
        _: &str,
        _: &[f32],
        _: Option<&VectorFilter>,
        _: usize,
    ) -> Result<Vec<ScoredPoint>, PipelineError> {
        Err(PipelineError::VectorStoreUnavailable("down".into()))
    }
}

fn rag_item(path: &str, score: f64, quality: Option<f64>) -> SearchResultItem {
    let mut metadata = BTreeMap::new();
    if let Some(q) = quality {
        metadata.insert("quality_score".to_string(), serde_json::json!(q));
    }
    SearchResultItem {
        source_path: path.to_string(),
        score,
        content: Some("excerpt".to_string()),
        metadata,
    }
}

/// Index a couple of documents so the vector and graph sources have data.
async fn seed_corpus(runtime: &Runtime) {
    for (path, content) in [
        (
            "svc/cache.py",
            "class CacheEviction:\n    def evict(self):\n        pass\n",
        ),
        ("svc/io.py", "def read_blob(): pass\n"),
    ] {
        let outcome = runtime
            .orchestrator
            .process(IndexingRequest {
                source_path: path.to_string(),
                content: content.to_string(),
                language: Some("python".to_string()),
                project_id: None,
                project_name: "svc".to_string(),
                repository_url: None,
                commit_sha: None,
                indexing_options: IndexingOptions::default(),
                user_id: None,
                correlation_id: CorrelationId::new(),
            })
            .await;
        assert!(outcome.is_completed(), "seeding must succeed");
    }
}

#[tokio::test]
async fn test_scenario_hybrid_search_with_quality_weight() {
    let runtime = Runtime::builder(test_config())
        .with_rag_source(Arc::new(StaticRag {
            items: vec![
                rag_item("svc/cache.py", 0.9, Some(0.4)),
                rag_item("svc/notes.md", 0.5, Some(0.9)),
            ],
        }))
        .build()
        .unwrap();
    seed_corpus(&runtime).await;

    let mut request = search_request("cache eviction", SearchKind::Hybrid);
    request.max_results = 5;
    request.quality_weight = Some(0.3);

    let receipt = runtime.search.search(&request).await.unwrap();

    assert!(receipt.total_results <= 5);
    assert!(!receipt.results.is_empty());
    for source in &receipt.sources_queried {
        assert!(["rag", "vector", "knowledge_graph"].contains(&source.as_str()));
    }

    // Sorted descending, no duplicate paths.
    let mut seen = std::collections::HashSet::new();
    for window in receipt.results.windows(2) {
        assert!(window[0].score >= window[1].score);
    }
    for item in &receipt.results {
        assert!(seen.insert(item.source_path.clone()), "duplicate path");
    }
    assert_eq!(receipt.aggregation_strategy, "weighted_score");
}

#[tokio::test]
async fn test_all_sources_failing_is_an_error() {
    struct FailingGraph;

    #[async_trait::async_trait]
    impl kortex::GraphStore for FailingGraph {
        async fn upsert_node(
            &self,
            _: &kortex::NodeKey,
            _: kortex::NodeLabel,
            _: serde_json::Map<String, serde_json::Value>,
        ) -> Result<(), PipelineError> {
            Err(PipelineError::GraphStoreUnavailable("down".into()))
        }

        async fn upsert_edge(
            &self,
            _: &kortex::NodeKey,
            _: &kortex::NodeKey,
            _: kortex::RelationKind,
            _: serde_json::Map<String, serde_json::Value>,
        ) -> Result<(), PipelineError> {
            Err(PipelineError::GraphStoreUnavailable("down".into()))
        }

        async fn get_node(
            &self,
            _: &kortex::NodeKey,
        ) -> Result<Option<kortex::NodeRecord>, PipelineError> {
            Err(PipelineError::GraphStoreUnavailable("down".into()))
        }

        async fn node_exists(&self, _: &kortex::NodeKey) -> Result<bool, PipelineError> {
            Err(PipelineError::GraphStoreUnavailable("down".into()))
        }

        async fn substring_search(
            &self,
            _: &str,
            _: Option<&str>,
            _: usize,
        ) -> Result<Vec<kortex::NodeRecord>, PipelineError> {
            Err(PipelineError::GraphStoreUnavailable("down".into()))
        }
    }

    let runtime = Runtime::builder(test_config())
        .with_rag_source(Arc::new(FailingRag))
        .with_vector_store(Arc::new(FailingVectorStore))
        .with_graph_store(Arc::new(FailingGraph))
        .build()
        .unwrap();

    let err = runtime
        .search
        .search(&search_request("anything", SearchKind::Hybrid))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AllSourcesFailed);
    assert!(err.retry_allowed());
}

#[tokio::test]
async fn test_single_source_failure_degrades_gracefully() {
    let runtime = Runtime::builder(test_config())
        .with_rag_source(Arc::new(FailingRag))
        .build()
        .unwrap();
    seed_corpus(&runtime).await;

    let receipt = runtime
        .search
        .search(&search_request("cache", SearchKind::Hybrid))
        .await
        .unwrap();

    assert!(receipt.failed_sources.contains(&"rag".to_string()));
    assert!(!receipt.sources_queried.contains(&"rag".to_string()));
    assert!(!receipt.sources_queried.is_empty());
}

#[tokio::test]
async fn test_semantic_kind_only_queries_rag() {
    let runtime = Runtime::builder(test_config())
        .with_rag_source(Arc::new(StaticRag {
            items: vec![rag_item("svc/a.py", 0.8, None)],
        }))
        .build()
        .unwrap();

    let receipt = runtime
        .search
        .search(&search_request("query", SearchKind::Semantic))
        .await
        .unwrap();

    assert_eq!(receipt.sources_queried, vec!["rag"]);
    assert_eq!(receipt.results.len(), 1);
    assert_eq!(receipt.results[0].source(), Some("rag"));
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let runtime = Runtime::in_memory(test_config()).unwrap();
    let err = runtime
        .search
        .search(&search_request("   ", SearchKind::Hybrid))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(!err.retry_allowed());
}

#[tokio::test]
async fn test_path_pattern_filters_client_side() {
    let runtime = Runtime::builder(test_config())
        .with_rag_source(Arc::new(StaticRag {
            items: vec![
                rag_item("services/api/app.py", 0.9, None),
                rag_item("tests/test_app.py", 0.8, None),
                rag_item("services/worker/run.py", 0.7, None),
            ],
        }))
        .build()
        .unwrap();

    let mut request = search_request("app", SearchKind::Semantic);
    request.filters.path_pattern = Some("services/**/*.py".to_string());

    let receipt = runtime.search.search(&request).await.unwrap();
    let paths: Vec<&str> = receipt.results.iter().map(|r| r.source_path.as_str()).collect();
    assert!(paths.contains(&"services/api/app.py"));
    assert!(paths.contains(&"services/worker/run.py"));
    assert!(!paths.contains(&"tests/test_app.py"));
}

#[tokio::test]
async fn test_vector_search_finds_indexed_documents() {
    let runtime = Runtime::in_memory(test_config()).unwrap();
    seed_corpus(&runtime).await;

    let mut request = search_request("CacheEviction evict", SearchKind::Vector);
    request.filters.project_name = Some("svc".to_string());

    let receipt = runtime.search.search(&request).await.unwrap();
    assert_eq!(receipt.sources_queried, vec!["vector"]);
    assert!(!receipt.results.is_empty());
    for item in &receipt.results {
        assert_eq!(item.metadata["project_name"], serde_json::json!("svc"));
    }
}

#[tokio::test]
async fn test_graph_search_scores_name_matches_higher() {
    let runtime = Runtime::in_memory(test_config()).unwrap();
    seed_corpus(&runtime).await;

    let receipt = runtime
        .search
        .search(&search_request("CacheEviction", SearchKind::KnowledgeGraph))
        .await
        .unwrap();

    assert_eq!(receipt.sources_queried, vec!["knowledge_graph"]);
    assert!(!receipt.results.is_empty());
    // Name-substring matches carry the higher fixed score.
    assert!((receipt.results[0].score - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_configured_quality_weight_applies_when_request_omits_it() {
    let mut config = test_config();
    config.quality_weight_default = Some(0.5);

    let runtime = Runtime::builder(config)
        .with_rag_source(Arc::new(StaticRag {
            items: vec![
                rag_item("high_semantic.py", 0.9, Some(0.1)),
                rag_item("high_quality.py", 0.6, Some(1.0)),
            ],
        }))
        .build()
        .unwrap();

    // No per-request weight: the configured default drives the fusion.
    let receipt = runtime
        .search
        .search(&search_request("query", SearchKind::Semantic))
        .await
        .unwrap();

    assert_eq!(receipt.aggregation_strategy, "weighted_score");
    // 0.5*0.6 + 0.5*1.0 = 0.8 beats 0.5*0.9 + 0.5*0.1 = 0.5.
    assert_eq!(receipt.results[0].source_path, "high_quality.py");
    assert!((receipt.results[0].score - 0.8).abs() < 1e-9);

    // An explicit request weight still wins over the default.
    let mut request = search_request("query", SearchKind::Semantic);
    request.quality_weight = Some(0.0);
    let receipt = runtime.search.search(&request).await.unwrap();
    assert_eq!(receipt.results[0].source_path, "high_semantic.py");
    assert!((receipt.results[0].score - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_include_context_false_strips_excerpts() {
    let runtime = Runtime::builder(test_config())
        .with_rag_source(Arc::new(StaticRag {
            items: vec![rag_item("svc/a.py", 0.8, None)],
        }))
        .build()
        .unwrap();

    let mut request = search_request("query", SearchKind::Semantic);
    request.include_context = false;

    let receipt = runtime.search.search(&request).await.unwrap();
    assert!(receipt.results[0].content.is_none());
}
