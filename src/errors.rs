// Pipeline Error Taxonomy
// Every in-process failure mode in the indexing and search pipelines is a
// typed value from the closed set below. Response events carry the kind as a
// string; retryability is a property of the kind, not of the call site.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Closed error set carried on response events.
///
/// # Invariants
/// - `InvalidInput`, `InvalidProject`, and `ExtractionRejected` are never
///   retryable; everything else is.
/// - The wire form of each kind is its variant name (`"InvalidInput"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidInput,
    InvalidProject,
    StampingUnavailable,
    ExtractionUnavailable,
    ExtractionTimeout,
    ExtractionRejected,
    EmbeddingUnavailable,
    EmbeddingTimeout,
    EmbeddingMalformed,
    VectorStoreUnavailable,
    GraphStoreUnavailable,
    AllSourcesFailed,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::InvalidProject => "InvalidProject",
            ErrorKind::StampingUnavailable => "StampingUnavailable",
            ErrorKind::ExtractionUnavailable => "ExtractionUnavailable",
            ErrorKind::ExtractionTimeout => "ExtractionTimeout",
            ErrorKind::ExtractionRejected => "ExtractionRejected",
            ErrorKind::EmbeddingUnavailable => "EmbeddingUnavailable",
            ErrorKind::EmbeddingTimeout => "EmbeddingTimeout",
            ErrorKind::EmbeddingMalformed => "EmbeddingMalformed",
            ErrorKind::VectorStoreUnavailable => "VectorStoreUnavailable",
            ErrorKind::GraphStoreUnavailable => "GraphStoreUnavailable",
            ErrorKind::AllSourcesFailed => "AllSourcesFailed",
            ErrorKind::InternalError => "InternalError",
        }
    }

    pub fn retry_allowed(&self) -> bool {
        !matches!(
            self,
            ErrorKind::InvalidInput | ErrorKind::InvalidProject | ErrorKind::ExtractionRejected
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure value used throughout the pipeline.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid project name: {0}")]
    InvalidProject(String),

    #[error("metadata stamping unavailable: {0}")]
    StampingUnavailable(String),

    #[error("entity extraction unavailable: {0}")]
    ExtractionUnavailable(String),

    #[error("entity extraction timed out after {0:?}")]
    ExtractionTimeout(Duration),

    #[error("entity extraction rejected the request: {0}")]
    ExtractionRejected(String),

    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("embedding call timed out after {0:?}")]
    EmbeddingTimeout(Duration),

    #[error("embedding response malformed: {0}")]
    EmbeddingMalformed(String),

    #[error("vector store unavailable: {0}")]
    VectorStoreUnavailable(String),

    #[error("graph store unavailable: {0}")]
    GraphStoreUnavailable(String),

    #[error("all search sources failed: {0:?}")]
    AllSourcesFailed(Vec<String>),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInput(_) => ErrorKind::InvalidInput,
            PipelineError::InvalidProject(_) => ErrorKind::InvalidProject,
            PipelineError::StampingUnavailable(_) => ErrorKind::StampingUnavailable,
            PipelineError::ExtractionUnavailable(_) => ErrorKind::ExtractionUnavailable,
            PipelineError::ExtractionTimeout(_) => ErrorKind::ExtractionTimeout,
            PipelineError::ExtractionRejected(_) => ErrorKind::ExtractionRejected,
            PipelineError::EmbeddingUnavailable(_) => ErrorKind::EmbeddingUnavailable,
            PipelineError::EmbeddingTimeout(_) => ErrorKind::EmbeddingTimeout,
            PipelineError::EmbeddingMalformed(_) => ErrorKind::EmbeddingMalformed,
            PipelineError::VectorStoreUnavailable(_) => ErrorKind::VectorStoreUnavailable,
            PipelineError::GraphStoreUnavailable(_) => ErrorKind::GraphStoreUnavailable,
            PipelineError::AllSourcesFailed(_) => ErrorKind::AllSourcesFailed,
            PipelineError::InternalError(_) => ErrorKind::InternalError,
        }
    }

    pub fn retry_allowed(&self) -> bool {
        self.kind().retry_allowed()
    }

    /// Component name recorded in per-service failure counters, when the
    /// error is attributable to a single collaborator.
    pub fn failed_component(&self) -> Option<&'static str> {
        match self {
            PipelineError::StampingUnavailable(_) => Some("metadata_stamping"),
            PipelineError::ExtractionUnavailable(_)
            | PipelineError::ExtractionTimeout(_)
            | PipelineError::ExtractionRejected(_) => Some("entity_extraction"),
            PipelineError::EmbeddingUnavailable(_)
            | PipelineError::EmbeddingTimeout(_)
            | PipelineError::EmbeddingMalformed(_) => Some("embedding"),
            PipelineError::VectorStoreUnavailable(_) => Some("vector_indexing"),
            PipelineError::GraphStoreUnavailable(_) => Some("knowledge_graph"),
            _ => None,
        }
    }
}

/// Error block attached to `*-failed` response events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error_kind: ErrorKind,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_component: Option<String>,
    pub retry_allowed: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_results: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorEnvelope {
    pub fn from_error(error: &PipelineError) -> Self {
        Self {
            error_kind: error.kind(),
            error_message: error.to_string(),
            failed_component: error.failed_component().map(str::to_string),
            retry_allowed: error.retry_allowed(),
            retry_count: 0,
            partial_results: None,
            suggested_action: None,
        }
    }

    pub fn with_partial_results(mut self, partial: serde_json::Value) -> Self {
        self.partial_results = Some(partial);
        self
    }

    pub fn with_suggested_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability_of_validation_errors() {
        assert!(!PipelineError::InvalidInput("missing content".into()).retry_allowed());
        assert!(!PipelineError::InvalidProject("empty".into()).retry_allowed());
        assert!(!PipelineError::ExtractionRejected("400".into()).retry_allowed());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(PipelineError::StampingUnavailable("conn refused".into()).retry_allowed());
        assert!(PipelineError::EmbeddingTimeout(Duration::from_secs(60)).retry_allowed());
        assert!(PipelineError::AllSourcesFailed(vec!["rag".into()]).retry_allowed());
        assert!(PipelineError::InternalError("oops".into()).retry_allowed());
    }

    #[test]
    fn test_error_kind_wire_format() {
        let kind = PipelineError::VectorStoreUnavailable("down".into()).kind();
        let json = serde_json::to_string(&kind).expect("kind serializes");
        assert_eq!(json, "\"VectorStoreUnavailable\"");
    }

    #[test]
    fn test_error_envelope_carries_component() {
        let err = PipelineError::ExtractionTimeout(Duration::from_secs(10));
        let envelope = ErrorEnvelope::from_error(&err);
        assert_eq!(envelope.error_kind, ErrorKind::ExtractionTimeout);
        assert_eq!(envelope.failed_component.as_deref(), Some("entity_extraction"));
        assert!(envelope.retry_allowed);
    }
}
