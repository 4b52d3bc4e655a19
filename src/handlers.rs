// Event Handlers
// Bridge between the transport and the pipeline components. Each handler
// consumes one request topic and publishes exactly one completed or failed
// response per request, with the request's correlation id.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

const TREE_INDEX_PARALLELISM: usize = 8;

use crate::errors::{ErrorEnvelope, PipelineError};
use crate::events::{self, topics, EventEnvelope};
use crate::metrics::PipelineMetrics;
use crate::models::{IndexingRequest, SearchRequest, TreeIndexRequest};
use crate::orchestrator::{IndexingOrchestrator, IndexingOutcome};
use crate::search_aggregator::SearchAggregator;
use crate::transport::{EventHandler, EventTransport};
use crate::types::CorrelationId;

/// Handles `document-index-requested` events.
pub struct DocumentIndexingHandler {
    orchestrator: Arc<IndexingOrchestrator>,
    transport: Arc<dyn EventTransport>,
    metrics: Arc<PipelineMetrics>,
}

impl DocumentIndexingHandler {
    pub fn new(
        orchestrator: Arc<IndexingOrchestrator>,
        transport: Arc<dyn EventTransport>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            orchestrator,
            transport,
            metrics,
        }
    }

    async fn publish_outcome(
        &self,
        correlation_id: CorrelationId,
        outcome: IndexingOutcome,
    ) -> Result<(), PipelineError> {
        match outcome {
            IndexingOutcome::Completed(receipt) => {
                info!(
                    correlation_id = %correlation_id,
                    source_path = %receipt.source_path,
                    entities = receipt.entities_extracted,
                    chunks = receipt.chunks_indexed,
                    cache_hit = receipt.cache_hit,
                    "publishing document-index-completed"
                );
                self.metrics.record_event_handled(receipt.processing_time_ms);
                self.transport
                    .publish(
                        topics::DOCUMENT_INDEX_COMPLETED,
                        events::indexing_completed(correlation_id, &receipt),
                    )
                    .await
            }
            IndexingOutcome::Failed(failure) => {
                warn!(
                    correlation_id = %correlation_id,
                    source_path = %failure.source_path,
                    error_kind = %failure.error.error_kind,
                    "publishing document-index-failed"
                );
                self.metrics.record_event_failed();
                self.transport
                    .publish(
                        topics::DOCUMENT_INDEX_FAILED,
                        events::indexing_failed(
                            correlation_id,
                            &failure.source_path,
                            failure.error,
                            failure.processing_time_ms,
                        ),
                    )
                    .await
            }
        }
    }
}

#[async_trait]
impl EventHandler for DocumentIndexingHandler {
    fn name(&self) -> &'static str {
        "document-indexing"
    }

    fn can_handle(&self, event_type: &str) -> bool {
        event_type == topics::DOCUMENT_INDEX_REQUESTED
            || event_type == "DOCUMENT_INDEX_REQUESTED"
    }

    async fn handle(&self, envelope: EventEnvelope) -> Result<(), PipelineError> {
        let started = Instant::now();
        let correlation_id = envelope.correlation_id;

        let outcome = match IndexingRequest::from_payload(&envelope.payload) {
            Ok(mut request) => {
                // The envelope's correlation id is authoritative.
                request.correlation_id = correlation_id;
                self.orchestrator.process(request).await
            }
            Err(e) => {
                let source_path = envelope
                    .payload
                    .get("source_path")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                IndexingOutcome::Failed(crate::orchestrator::IndexingFailure {
                    source_path,
                    error: ErrorEnvelope::from_error(&e),
                    processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                })
            }
        };

        self.publish_outcome(correlation_id, outcome).await
    }
}

/// Handles bulk `tree-index` batches by expanding each file record into an
/// individual document task. Every expanded task gets its own correlation id
/// and its own response event; the batch id is logged for tracing.
pub struct TreeIndexHandler {
    orchestrator: Arc<IndexingOrchestrator>,
    transport: Arc<dyn EventTransport>,
    metrics: Arc<PipelineMetrics>,
}

impl TreeIndexHandler {
    pub fn new(
        orchestrator: Arc<IndexingOrchestrator>,
        transport: Arc<dyn EventTransport>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            orchestrator,
            transport,
            metrics,
        }
    }
}

#[async_trait]
impl EventHandler for TreeIndexHandler {
    fn name(&self) -> &'static str {
        "tree-index"
    }

    fn can_handle(&self, event_type: &str) -> bool {
        event_type == topics::TREE_INDEX
    }

    async fn handle(&self, envelope: EventEnvelope) -> Result<(), PipelineError> {
        let batch = match TreeIndexRequest::from_payload(&envelope.payload) {
            Ok(batch) => batch,
            Err(e) => {
                error!(
                    correlation_id = %envelope.correlation_id,
                    error = %e,
                    "malformed tree-index batch, dropping"
                );
                return Err(e);
            }
        };

        info!(
            batch_correlation_id = %envelope.correlation_id,
            project_name = %batch.project_name,
            files = batch.files.len(),
            "expanding tree-index batch"
        );

        let indexing_handler = DocumentIndexingHandler::new(
            self.orchestrator.clone(),
            self.transport.clone(),
            self.metrics.clone(),
        );

        // Bounded fan-out: the router's inflight ceiling bounds whole
        // batches, this bounds documents within one batch.
        let results = futures::stream::iter(batch.files.into_iter().map(|record| {
            let correlation_id = CorrelationId::new();
            let request = IndexingRequest {
                source_path: record.path,
                content: record.content,
                language: record.language,
                project_id: batch.project_id.clone(),
                project_name: batch.project_name.clone(),
                repository_url: None,
                commit_sha: None,
                indexing_options: Default::default(),
                user_id: None,
                correlation_id,
            };
            let orchestrator = self.orchestrator.clone();
            async move { (correlation_id, orchestrator.process(request).await) }
        }))
        .buffer_unordered(TREE_INDEX_PARALLELISM)
        .collect::<Vec<_>>()
        .await;

        for (correlation_id, outcome) in results {
            indexing_handler
                .publish_outcome(correlation_id, outcome)
                .await?;
        }
        Ok(())
    }
}

/// Handles `search-requested` events.
pub struct SearchHandler {
    aggregator: Arc<SearchAggregator>,
    transport: Arc<dyn EventTransport>,
    metrics: Arc<PipelineMetrics>,
}

impl SearchHandler {
    pub fn new(
        aggregator: Arc<SearchAggregator>,
        transport: Arc<dyn EventTransport>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            aggregator,
            transport,
            metrics,
        }
    }
}

#[async_trait]
impl EventHandler for SearchHandler {
    fn name(&self) -> &'static str {
        "search"
    }

    fn can_handle(&self, event_type: &str) -> bool {
        event_type == topics::SEARCH_REQUESTED || event_type == "SEARCH_REQUESTED"
    }

    async fn handle(&self, envelope: EventEnvelope) -> Result<(), PipelineError> {
        let started = Instant::now();
        let correlation_id = envelope.correlation_id;

        let request = match SearchRequest::from_payload(&envelope.payload) {
            Ok(mut request) => {
                request.correlation_id = correlation_id;
                request
            }
            Err(e) => {
                self.metrics.record_search_failed();
                return self
                    .transport
                    .publish(
                        topics::SEARCH_FAILED,
                        events::search_failed(
                            correlation_id,
                            "",
                            ErrorEnvelope::from_error(&e),
                            started.elapsed().as_secs_f64() * 1000.0,
                        ),
                    )
                    .await;
            }
        };

        match self.aggregator.search(&request).await {
            Ok(receipt) => {
                info!(
                    correlation_id = %correlation_id,
                    total_results = receipt.total_results,
                    sources = ?receipt.sources_queried,
                    "publishing search-completed"
                );
                self.metrics.record_search_completed();
                self.transport
                    .publish(
                        topics::SEARCH_COMPLETED,
                        events::search_completed(correlation_id, &receipt),
                    )
                    .await
            }
            Err(e) => {
                warn!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "publishing search-failed"
                );
                self.metrics.record_search_failed();
                self.transport
                    .publish(
                        topics::SEARCH_FAILED,
                        events::search_failed(
                            correlation_id,
                            &request.query,
                            ErrorEnvelope::from_error(&e),
                            started.elapsed().as_secs_f64() * 1000.0,
                        ),
                    )
                    .await
            }
        }
    }
}
