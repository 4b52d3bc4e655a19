// End-to-end pipeline tests: a full in-memory runtime processing indexing
// requests through the event transport, covering the happy path, duplicate
// handling, validation failures, and degraded completion when collaborating
// services are down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kortex::{
    topics, CorrelationId, DocumentIndexingHandler, ErrorKind, EventEnvelope,
    IndexingOptions, IndexingRequest, KortexConfig, PipelineError, Runtime,
};

fn test_config() -> KortexConfig {
    KortexConfig {
        embedding_dimension: 32,
        ..KortexConfig::default()
    }
}

fn request(source_path: &str, content: &str, project: &str) -> IndexingRequest {
    IndexingRequest {
        source_path: source_path.to_string(),
        content: content.to_string(),
        language: Some("python".to_string()),
        project_id: None,
        project_name: project.to_string(),
        repository_url: None,
        commit_sha: None,
        indexing_options: IndexingOptions::default(),
        user_id: None,
        correlation_id: CorrelationId::new(),
    }
}

async fn handle_through_transport(
    runtime: &Runtime,
    request: IndexingRequest,
) -> (Vec<EventEnvelope>, Vec<EventEnvelope>) {
    let handler = DocumentIndexingHandler::new(
        runtime.orchestrator.clone(),
        runtime.transport.clone(),
        runtime.metrics.clone(),
    );

    let mut completed_rx = runtime.transport.subscribe(topics::DOCUMENT_INDEX_COMPLETED);
    let mut failed_rx = runtime.transport.subscribe(topics::DOCUMENT_INDEX_FAILED);

    let correlation_id = request.correlation_id;
    let envelope = EventEnvelope::new(
        topics::DOCUMENT_INDEX_REQUESTED,
        correlation_id,
        serde_json::to_value(&request).unwrap(),
        "test-producer",
    );

    use kortex::EventHandler;
    handler.handle(envelope).await.expect("handler publishes");

    let mut completed = Vec::new();
    let mut failed = Vec::new();
    while let Ok(event) = completed_rx.try_recv() {
        completed.push(event);
    }
    while let Ok(event) = failed_rx.try_recv() {
        failed.push(event);
    }
    (completed, failed)
}

#[tokio::test]
async fn test_scenario_happy_path() {
    let runtime = Runtime::in_memory(test_config()).unwrap();
    let req = request("svc/app.py", "def f(): pass", "svc");
    let correlation_id = req.correlation_id;

    let (completed, failed) = handle_through_transport(&runtime, req).await;

    // Exactly one response event, on the completed topic, with the same
    // correlation id as the request.
    assert_eq!(completed.len(), 1);
    assert!(failed.is_empty());
    let event = &completed[0];
    assert_eq!(event.correlation_id, correlation_id);

    let payload = &event.payload;
    assert!(!payload["document_hash"].as_str().unwrap().is_empty());
    assert!(payload["entities_extracted"].as_u64().unwrap() >= 1);
    assert_eq!(payload["chunks_indexed"].as_u64().unwrap(), 1);

    let timings = payload["service_timings"].as_object().unwrap();
    assert!(timings.contains_key("metadata_stamping_ms"));
    assert!(
        timings.contains_key("entity_extraction_ms")
            || timings.contains_key("vector_indexing_ms")
            || timings.contains_key("knowledge_graph_ms")
    );
}

#[tokio::test]
async fn test_scenario_duplicate_and_force_reindex() {
    let runtime = Runtime::in_memory(test_config()).unwrap();

    let (first, _) =
        handle_through_transport(&runtime, request("svc/app.py", "def f(): pass", "svc")).await;
    let first = &first[0].payload;
    assert_eq!(first["cache_hit"], false);
    let first_entities = first["entities_extracted"].as_u64().unwrap();
    let first_chunks = first["chunks_indexed"].as_u64().unwrap();

    // Same content again: cache hit, nothing re-done.
    let (second, _) =
        handle_through_transport(&runtime, request("svc/app.py", "def f(): pass", "svc")).await;
    let second = &second[0].payload;
    assert_eq!(second["cache_hit"], true);
    assert_eq!(second["entities_extracted"], 0);
    assert_eq!(second["chunks_indexed"], 0);

    // force_reindex overrides the dedup verdict.
    let mut forced = request("svc/app.py", "def f(): pass", "svc");
    forced.indexing_options.force_reindex = true;
    let (third, _) = handle_through_transport(&runtime, forced).await;
    let third = &third[0].payload;
    assert_eq!(third["cache_hit"], false);
    assert_eq!(third["entities_extracted"].as_u64().unwrap(), first_entities);
    assert_eq!(third["chunks_indexed"].as_u64().unwrap(), first_chunks);
}

#[tokio::test]
async fn test_scenario_missing_content_fails_fast() {
    let runtime = Runtime::in_memory(test_config()).unwrap();
    let req = request("a.py", "", "svc");
    let correlation_id = req.correlation_id;

    let started = Instant::now();
    let (completed, failed) = handle_through_transport(&runtime, req).await;
    let elapsed = started.elapsed();

    assert!(completed.is_empty());
    assert_eq!(failed.len(), 1);
    let payload = &failed[0].payload;
    assert_eq!(failed[0].correlation_id, correlation_id);
    assert_eq!(payload["error_kind"], "InvalidInput");
    assert_eq!(payload["retry_allowed"], false);
    assert!(elapsed < Duration::from_millis(100), "validation must not block");
}

#[tokio::test]
async fn test_scenario_extractor_down_scorer_up() {
    struct DownExtractor;

    #[async_trait::async_trait]
    impl kortex::EntityExtractor for DownExtractor {
        async fn extract(
            &self,
            _: &str,
            _: &str,
            _: Option<&str>,
            _: &kortex::ExtractionOptions,
        ) -> Result<kortex::ExtractionOutcome, PipelineError> {
            Err(PipelineError::ExtractionUnavailable(
                "connection refused".into(),
            ))
        }
    }

    let runtime = Runtime::builder(test_config())
        .with_extractor(Arc::new(DownExtractor))
        .build()
        .unwrap();

    let (completed, failed) =
        handle_through_transport(&runtime, request("svc/app.py", "def f(): pass", "svc")).await;

    assert_eq!(completed.len(), 1);
    assert!(failed.is_empty());
    let payload = &completed[0].payload;
    assert_eq!(payload["entities_extracted"], 0);
    assert_eq!(payload["chunks_indexed"], 0);
    assert!(payload["quality_score"].is_number());
    assert!(payload["service_failures"]["entity_extraction"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_stamping_failure_aborts_request() {
    struct TimingOutIndex;

    #[async_trait::async_trait]
    impl kortex::FingerprintIndex for TimingOutIndex {
        async fn observe(
            &self,
            _: &str,
            _: &str,
        ) -> Result<kortex::DedupVerdict, PipelineError> {
            // Longer than the stamping deadline; the degradation path never
            // gets a chance to run.
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(kortex::DedupVerdict::New)
        }
    }

    let config = KortexConfig {
        embedding_dimension: 32,
        stamping_timeout: Duration::from_millis(100),
        ..KortexConfig::default()
    };
    let runtime = Runtime::builder(config)
        .with_fingerprint_index(Arc::new(TimingOutIndex))
        .build()
        .unwrap();

    let (completed, failed) =
        handle_through_transport(&runtime, request("svc/app.py", "def f(): pass", "svc")).await;

    assert!(completed.is_empty());
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload["error_kind"], "StampingUnavailable");
    assert_eq!(failed[0].payload["retry_allowed"], true);
}

#[tokio::test]
async fn test_pipeline_idempotence_law() {
    // Running the orchestrator twice on the same request (with force_reindex
    // so the second run is not short-circuited) yields graph and vector
    // states that differ only in timestamps, and identical vector ids.
    let graph = Arc::new(kortex::NativeGraphStore::new());
    let vectors = Arc::new(kortex::NativeVectorStore::new());

    let runtime = Runtime::builder(test_config())
        .with_graph_store(graph.clone())
        .with_vector_store(vectors.clone())
        .build()
        .unwrap();

    let mut req = request("svc/app.py", "import os\n\ndef f(): pass\n", "svc");
    req.indexing_options.force_reindex = true;

    let first = runtime.orchestrator.process(req.clone()).await;
    let first = first.receipt().unwrap().clone();
    let nodes = graph.node_count();
    let edges = graph.edge_count();
    let points = vectors.point_count("kortex_documents");

    let second = runtime.orchestrator.process(req).await;
    let second = second.receipt().unwrap().clone();

    assert_eq!(graph.node_count(), nodes);
    assert_eq!(graph.edge_count(), edges);
    assert_eq!(vectors.point_count("kortex_documents"), points);
    assert_eq!(first.vector_ids, second.vector_ids);
    assert_eq!(first.entity_ids, second.entity_ids);
}

#[tokio::test]
async fn test_malformed_payload_produces_failed_event() {
    let runtime = Runtime::in_memory(test_config()).unwrap();
    let handler = DocumentIndexingHandler::new(
        runtime.orchestrator.clone(),
        runtime.transport.clone(),
        runtime.metrics.clone(),
    );
    let mut failed_rx = runtime.transport.subscribe(topics::DOCUMENT_INDEX_FAILED);

    let envelope = EventEnvelope::new(
        topics::DOCUMENT_INDEX_REQUESTED,
        CorrelationId::new(),
        serde_json::json!({"garbage": true}),
        "test-producer",
    );

    use kortex::EventHandler;
    handler.handle(envelope).await.unwrap();

    let event = failed_rx.try_recv().expect("failed event published");
    assert_eq!(event.payload["error_kind"], "InvalidInput");
}

#[tokio::test]
async fn test_invalid_project_rejected_at_gate() {
    let runtime = Runtime::in_memory(test_config()).unwrap();
    let (completed, failed) =
        handle_through_transport(&runtime, request("a.py", "content", "   ")).await;

    assert!(completed.is_empty());
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload["error_kind"], ErrorKind::InvalidProject.as_str());
    assert_eq!(failed[0].payload["retry_allowed"], false);
}
