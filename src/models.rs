// Pipeline Data Model
// The record kinds that flow through the indexing and search pipelines. All
// of them are immutable once emitted; mutation happens by producing a new
// record. Every boundary payload is parsed into one of these shapes before
// internal code touches it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::PipelineError;
use crate::types::{Confidence, CorrelationId, EntityKind, RelationKind};

/// Per-request indexing options carried in the request payload. Chunk
/// geometry falls back to the process configuration when a request does not
/// override it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexingOptions {
    #[serde(default)]
    pub force_reindex: bool,
    #[serde(default)]
    pub skip_entity_extraction: bool,
    #[serde(default)]
    pub skip_quality_assessment: bool,
    #[serde(default)]
    pub skip_vector_indexing: bool,
    #[serde(default)]
    pub skip_knowledge_graph: bool,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub chunk_overlap: Option<usize>,
}

/// A single-document unit of work driving the orchestrator.
///
/// Owned by exactly one task for the duration of one processing attempt and
/// discarded after the response event is published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingRequest {
    pub source_path: String,
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    pub project_name: String,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub indexing_options: IndexingOptions,
    #[serde(default)]
    pub user_id: Option<String>,
    pub correlation_id: CorrelationId,
}

impl IndexingRequest {
    /// Boundary parse from an event payload. Missing required fields are
    /// `InvalidInput`; internal code only ever sees parsed requests.
    pub fn from_payload(payload: &Value) -> Result<Self, PipelineError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| PipelineError::InvalidInput(format!("malformed indexing request: {e}")))
    }

    /// Validation gate applied before any side effect.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.source_path.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "missing required field: source_path".to_string(),
            ));
        }
        if self.content.is_empty() {
            return Err(PipelineError::InvalidInput(
                "missing required field: content".to_string(),
            ));
        }
        if self.project_name.trim().is_empty() {
            return Err(PipelineError::InvalidProject(
                "missing required field: project_name".to_string(),
            ));
        }
        Ok(())
    }
}

/// One record of a bulk tree-index batch; expanded into an individual
/// document-index task per record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// Bulk ingestion request consumed from the tree-index topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeIndexRequest {
    pub project_name: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub files: Vec<FileRecord>,
    pub correlation_id: CorrelationId,
}

impl TreeIndexRequest {
    pub fn from_payload(payload: &Value) -> Result<Self, PipelineError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| PipelineError::InvalidInput(format!("malformed tree-index request: {e}")))
    }
}

/// Digest algorithm recorded alongside every digest so that readers never
/// compare digests across algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Blake3,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

/// Dedup verdict for a stamped document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupVerdict {
    New,
    Duplicate,
}

/// Content fingerprint produced by the stamper.
///
/// The digest is a pure function of the content bytes; the verdict depends on
/// the seen-hash index and degrades to `New` when that index is unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFingerprint {
    pub digest: String,
    pub algorithm: HashAlgorithm,
    pub verdict: DedupVerdict,
    pub stamped_at: DateTime<Utc>,
}

impl ContentFingerprint {
    pub fn is_duplicate(&self) -> bool {
        self.verdict == DedupVerdict::Duplicate
    }
}

/// Canonical entity record stored in the knowledge graph and referenced by
/// vector payloads.
///
/// Entity ids are stable across re-ingestion of the same
/// `(project, source_path, name, kind)` tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub name: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub description: String,
    pub source_path: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub source_line: Option<u32>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Canonical relationship record between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub relationship_id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub kind: RelationKind,
    pub confidence: Confidence,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

/// One ranked item of a search response. Ephemeral; held only for the
/// duration of one query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub source_path: String,
    pub score: f64,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl SearchResultItem {
    /// Provenance tag recorded under `metadata.source`.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }

    pub fn quality_score(&self) -> Option<f64> {
        self.metadata.get("quality_score").and_then(Value::as_f64)
    }
}

/// Per-service wall-clock timings, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceTimings {
    entries: BTreeMap<String, f64>,
}

impl ServiceTimings {
    pub fn record(&mut self, service: impl Into<String>, millis: f64) {
        self.entries.insert(service.into(), millis);
    }

    pub fn get(&self, service: &str) -> Option<f64> {
        self.entries.get(service).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Per-service failure counts for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceFailures {
    entries: BTreeMap<String, u32>,
}

impl ServiceFailures {
    pub fn record(&mut self, service: impl Into<String>) {
        *self.entries.entry(service.into()).or_insert(0) += 1;
    }

    pub fn get(&self, service: &str) -> u32 {
        self.entries.get(service).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Payload of a `document-index-completed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingReceipt {
    pub source_path: String,
    pub document_hash: String,
    pub hash_algorithm: HashAlgorithm,
    pub entity_ids: Vec<String>,
    pub vector_ids: Vec<String>,
    pub entities_extracted: usize,
    pub relationships_created: usize,
    pub chunks_indexed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<BTreeMap<String, bool>>,
    pub service_timings: ServiceTimings,
    #[serde(default)]
    pub service_failures: ServiceFailures,
    pub cache_hit: bool,
    pub processing_time_ms: f64,
}

/// Payload of a `search-completed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReceipt {
    pub query: String,
    pub kind: SearchKind,
    pub total_results: usize,
    pub results: Vec<SearchResultItem>,
    pub sources_queried: Vec<String>,
    #[serde(default)]
    pub failed_sources: Vec<String>,
    pub service_timings: ServiceTimings,
    pub aggregation_strategy: String,
    pub processing_time_ms: f64,
}

/// Which sources a search fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Semantic,
    Vector,
    KnowledgeGraph,
    Hybrid,
}

impl SearchKind {
    /// Lenient parse used at the event boundary; unknown kinds fall back to
    /// `Hybrid`, matching the widest fan-out.
    pub fn parse_or_hybrid(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "semantic" => SearchKind::Semantic,
            "vector" => SearchKind::Vector,
            "knowledge_graph" | "graph" => SearchKind::KnowledgeGraph,
            _ => SearchKind::Hybrid,
        }
    }
}

/// Search filters applied across all sources. Exact-match and range filters
/// are pushed down to the stores; the path glob is applied client-side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub min_quality: Option<f64>,
    #[serde(default)]
    pub max_quality: Option<f64>,
    #[serde(default)]
    pub path_pattern: Option<String>,
}

/// Query request consumed from the search-requested topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_search_kind")]
    pub kind: SearchKind,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub quality_weight: Option<f64>,
    #[serde(default = "default_true")]
    pub include_context: bool,
    pub correlation_id: CorrelationId,
}

fn default_search_kind() -> SearchKind {
    SearchKind::Hybrid
}

fn default_max_results() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl SearchRequest {
    pub fn from_payload(payload: &Value) -> Result<Self, PipelineError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| PipelineError::InvalidInput(format!("malformed search request: {e}")))
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.query.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "missing required field: query".to_string(),
            ));
        }
        if let Some(weight) = self.quality_weight {
            if !(0.0..=1.0).contains(&weight) {
                return Err(PipelineError::InvalidInput(format!(
                    "quality_weight must be in [0, 1], got {weight}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_indexing_request_parse_with_defaults() {
        let payload = json!({
            "source_path": "svc/app.py",
            "content": "def f(): pass",
            "language": "python",
            "project_name": "svc",
            "correlation_id": "7f9e8d7c-6b5a-4c3d-2e1f-0a9b8c7d6e5f",
        });

        let request = IndexingRequest::from_payload(&payload).expect("payload parses");
        assert_eq!(request.source_path, "svc/app.py");
        assert!(!request.indexing_options.force_reindex);
        // Chunk geometry defers to process config unless the request sets it.
        assert_eq!(request.indexing_options.chunk_size, None);
        assert_eq!(request.indexing_options.chunk_overlap, None);
        request.validate().expect("valid request");
    }

    #[test]
    fn test_indexing_request_missing_content() {
        let payload = json!({
            "source_path": "a.py",
            "content": "",
            "project_name": "svc",
            "correlation_id": "7f9e8d7c-6b5a-4c3d-2e1f-0a9b8c7d6e5f",
        });

        let request = IndexingRequest::from_payload(&payload).expect("shape parses");
        let err = request.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(!err.retry_allowed());
    }

    #[test]
    fn test_indexing_request_empty_project() {
        let payload = json!({
            "source_path": "a.py",
            "content": "x",
            "project_name": "  ",
            "correlation_id": "7f9e8d7c-6b5a-4c3d-2e1f-0a9b8c7d6e5f",
        });

        let request = IndexingRequest::from_payload(&payload).expect("shape parses");
        assert_eq!(
            request.validate().unwrap_err().kind(),
            ErrorKind::InvalidProject
        );
    }

    #[test]
    fn test_search_kind_lenient_parse() {
        assert_eq!(SearchKind::parse_or_hybrid("semantic"), SearchKind::Semantic);
        assert_eq!(
            SearchKind::parse_or_hybrid("KNOWLEDGE_GRAPH"),
            SearchKind::KnowledgeGraph
        );
        assert_eq!(SearchKind::parse_or_hybrid("???"), SearchKind::Hybrid);
    }

    #[test]
    fn test_search_request_quality_weight_bounds() {
        let mut request = SearchRequest {
            query: "cache eviction".to_string(),
            kind: SearchKind::Hybrid,
            filters: SearchFilters::default(),
            max_results: 5,
            quality_weight: Some(0.3),
            include_context: true,
            correlation_id: CorrelationId::new(),
        };
        request.validate().expect("weight in range");

        request.quality_weight = Some(1.3);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_service_failures_accumulate() {
        let mut failures = ServiceFailures::default();
        failures.record("entity_extraction");
        failures.record("entity_extraction");
        failures.record("vector_indexing");
        assert_eq!(failures.get("entity_extraction"), 2);
        assert_eq!(failures.get("vector_indexing"), 1);
        assert_eq!(failures.get("quality_assessment"), 0);
    }
}
