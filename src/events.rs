// Event Model
// Topic names, the transport envelope, and constructors for the response
// events the pipeline publishes. The envelope is opaque to the transport
// except for its five named fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ErrorEnvelope, PipelineError};
use crate::models::{IndexingReceipt, SearchReceipt};
use crate::types::CorrelationId;

/// Logical topic names.
pub mod topics {
    pub const DOCUMENT_INDEX_REQUESTED: &str = "intelligence.document-index-requested";
    pub const DOCUMENT_INDEX_COMPLETED: &str = "intelligence.document-index-completed";
    pub const DOCUMENT_INDEX_FAILED: &str = "intelligence.document-index-failed";
    pub const SEARCH_REQUESTED: &str = "intelligence.search-requested";
    pub const SEARCH_COMPLETED: &str = "intelligence.search-completed";
    pub const SEARCH_FAILED: &str = "intelligence.search-failed";
    pub const TREE_INDEX: &str = "intelligence.tree-index";
}

/// Transport envelope. Delivery is at-least-once; handlers are idempotent
/// with respect to `correlation_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    pub correlation_id: CorrelationId,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
    pub source_component: String,
}

impl EventEnvelope {
    pub fn new(
        event_type: impl Into<String>,
        correlation_id: CorrelationId,
        payload: Value,
        source_component: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            correlation_id,
            payload,
            emitted_at: Utc::now(),
            source_component: source_component.into(),
        }
    }

    /// Boundary parse of a raw transport value into an envelope.
    pub fn parse(raw: &Value) -> Result<Self, PipelineError> {
        serde_json::from_value(raw.clone())
            .map_err(|e| PipelineError::InvalidInput(format!("malformed event envelope: {e}")))
    }
}

/// Payload of a `*-failed` response event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePayload {
    pub source_path: String,
    #[serde(flatten)]
    pub error: ErrorEnvelope,
    pub processing_time_ms: f64,
}

/// Build the `document-index-completed` envelope for a receipt.
pub fn indexing_completed(correlation_id: CorrelationId, receipt: &IndexingReceipt) -> EventEnvelope {
    EventEnvelope::new(
        topics::DOCUMENT_INDEX_COMPLETED,
        correlation_id,
        serde_json::to_value(receipt).unwrap_or(Value::Null),
        "indexing-orchestrator",
    )
}

/// Build the `document-index-failed` envelope for a typed failure.
pub fn indexing_failed(
    correlation_id: CorrelationId,
    source_path: &str,
    error: ErrorEnvelope,
    processing_time_ms: f64,
) -> EventEnvelope {
    let payload = FailurePayload {
        source_path: source_path.to_string(),
        error,
        processing_time_ms,
    };
    EventEnvelope::new(
        topics::DOCUMENT_INDEX_FAILED,
        correlation_id,
        serde_json::to_value(&payload).unwrap_or(Value::Null),
        "indexing-orchestrator",
    )
}

/// Build the `search-completed` envelope for a receipt.
pub fn search_completed(correlation_id: CorrelationId, receipt: &SearchReceipt) -> EventEnvelope {
    EventEnvelope::new(
        topics::SEARCH_COMPLETED,
        correlation_id,
        serde_json::to_value(receipt).unwrap_or(Value::Null),
        "search-aggregator",
    )
}

/// Build the `search-failed` envelope for a typed failure.
pub fn search_failed(
    correlation_id: CorrelationId,
    query: &str,
    error: ErrorEnvelope,
    processing_time_ms: f64,
) -> EventEnvelope {
    let payload = serde_json::json!({
        "query": query,
        "processing_time_ms": processing_time_ms,
        "error_kind": error.error_kind,
        "error_message": error.error_message,
        "failed_component": error.failed_component,
        "retry_allowed": error.retry_allowed,
        "retry_count": error.retry_count,
    });
    EventEnvelope::new(
        topics::SEARCH_FAILED,
        correlation_id,
        payload,
        "search-aggregator",
    )
}
