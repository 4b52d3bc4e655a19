// Operation Contracts
// The core depends on its three backends and four external services only
// through the traits below. Real drivers (Qdrant, Memgraph, the bridge) and
// the in-process reference backends both implement these; the pipeline never
// names a concrete store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::errors::PipelineError;
use crate::models::{DedupVerdict, SearchFilters, SearchResultItem};
use crate::types::RelationKind;

/// Stable key of a graph node. Containment nodes use structured keys
/// (`project:<name>`, `dir:<project>:<path>`, `file:<project>:<path>`);
/// entities use their deterministic entity id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(String);

impl NodeKey {
    pub fn entity(entity_id: &str) -> Self {
        Self(entity_id.to_string())
    }

    pub fn project(project_name: &str) -> Self {
        Self(format!("project:{project_name}"))
    }

    pub fn directory(project_name: &str, path: &str) -> Self {
        Self(format!("dir:{project_name}:{path}"))
    }

    pub fn file(project_name: &str, path: &str) -> Self {
        Self(format!("file:{project_name}:{path}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Node label in the property graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLabel {
    Project,
    Directory,
    File,
    Entity,
}

/// A node as read back from the graph store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub key: NodeKey,
    pub label: NodeLabel,
    pub properties: Map<String, Value>,
}

impl NodeRecord {
    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }
}

/// Property-graph backend.
///
/// # Postconditions
/// - `upsert_node` merges by key: new properties overwrite same-named ones,
///   properties the write omits are preserved. Re-running the same write is
///   a no-op.
/// - `upsert_edge` is keyed on `(from, to, kind)`; repeated writes merge
///   edge properties the same way.
/// - Both endpoints of an edge must exist when `upsert_edge` is called;
///   the store rejects dangling edges rather than inventing nodes.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_node(
        &self,
        key: &NodeKey,
        label: NodeLabel,
        properties: Map<String, Value>,
    ) -> Result<(), PipelineError>;

    async fn upsert_edge(
        &self,
        from: &NodeKey,
        to: &NodeKey,
        kind: RelationKind,
        properties: Map<String, Value>,
    ) -> Result<(), PipelineError>;

    async fn get_node(&self, key: &NodeKey) -> Result<Option<NodeRecord>, PipelineError>;

    async fn node_exists(&self, key: &NodeKey) -> Result<bool, PipelineError>;

    /// Case-insensitive substring match over node name, description, and
    /// content properties, optionally scoped to one project.
    async fn substring_search(
        &self,
        query: &str,
        project_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<NodeRecord>, PipelineError>;
}

/// One point to upsert into the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// One scored hit from a vector search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

/// Payload filter conditions the store evaluates natively: exact match,
/// numeric range, and any-of-list. Path globs are not part of this contract;
/// they are applied client-side after retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FilterCondition {
    Exact {
        key: String,
        value: Value,
    },
    Range {
        key: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    AnyOf {
        key: String,
        values: Vec<Value>,
    },
}

/// Conjunction of filter conditions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorFilter {
    pub must: Vec<FilterCondition>,
}

impl VectorFilter {
    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    /// Evaluate the filter against a payload. Reference implementation used
    /// by the native store; real drivers push this down.
    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        self.must.iter().all(|condition| match condition {
            FilterCondition::Exact { key, value } => payload.get(key) == Some(value),
            FilterCondition::Range { key, min, max } => {
                let Some(actual) = payload.get(key).and_then(Value::as_f64) else {
                    return false;
                };
                min.map_or(true, |m| actual >= m) && max.map_or(true, |m| actual <= m)
            }
            FilterCondition::AnyOf { key, values } => payload
                .get(key)
                .map_or(false, |actual| values.contains(actual)),
        })
    }
}

/// Vector backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>)
        -> Result<(), PipelineError>;

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&VectorFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, PipelineError>;
}

/// Seen-hash index behind the stamper. May be unavailable; callers degrade
/// the verdict to `New` and record a warning.
#[async_trait]
pub trait FingerprintIndex: Send + Sync {
    /// Record the digest and report whether it had been seen before.
    async fn observe(&self, digest: &str, source_path: &str)
        -> Result<DedupVerdict, PipelineError>;
}

/// Lexical/RAG search collaborator.
#[async_trait]
pub trait RagSource: Send + Sync {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResultItem>, PipelineError>;
}

/// Raw embedding backend. The rate limit, retry, and dimension check live in
/// the embedding client, not here.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError>;
}

/// Options forwarded to the entity extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOptions {
    pub extract_code_patterns: bool,
    pub extract_documentation_concepts: bool,
    pub include_semantic_analysis: bool,
    pub include_relationship_extraction: bool,
    #[serde(default)]
    pub semantic_context: String,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            extract_code_patterns: true,
            extract_documentation_concepts: true,
            include_semantic_analysis: true,
            include_relationship_extraction: true,
            semantic_context: String::new(),
        }
    }
}

/// Entity as returned by an extractor, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEntity {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Relationship as returned by an extractor, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRelationship {
    #[serde(default)]
    pub relationship_id: Option<String>,
    #[serde(default)]
    pub source_entity_id: String,
    #[serde(default)]
    pub target_entity_id: String,
    #[serde(default)]
    pub relationship_type: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

/// Un-normalized extraction result.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub entities: Vec<RawEntity>,
    pub relationships: Vec<RawRelationship>,
}

/// Entity/relationship extraction collaborator.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(
        &self,
        source_path: &str,
        content: &str,
        language: Option<&str>,
        options: &ExtractionOptions,
    ) -> Result<ExtractionOutcome, PipelineError>;
}

/// Quality assessment of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub quality_score: f64,
    #[serde(default)]
    pub compliance: BTreeMap<String, bool>,
}

/// Quality scoring collaborator. Non-critical: the orchestrator proceeds
/// without a score when this fails.
#[async_trait]
pub trait QualityScorer: Send + Sync {
    async fn assess(
        &self,
        content: &str,
        source_path: &str,
        language: Option<&str>,
    ) -> Result<QualityAssessment, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_node_key_shapes() {
        assert_eq!(NodeKey::project("svc").as_str(), "project:svc");
        assert_eq!(NodeKey::directory("svc", "src").as_str(), "dir:svc:src");
        assert_eq!(NodeKey::file("svc", "src/a.py").as_str(), "file:svc:src/a.py");
        assert_eq!(NodeKey::entity("entity-abc").as_str(), "entity-abc");
    }

    #[test]
    fn test_vector_filter_exact_and_range() {
        let filter = VectorFilter {
            must: vec![
                FilterCondition::Exact {
                    key: "project_name".into(),
                    value: json!("svc"),
                },
                FilterCondition::Range {
                    key: "quality_score".into(),
                    min: Some(0.5),
                    max: None,
                },
            ],
        };

        assert!(filter.matches(&payload(&[
            ("project_name", json!("svc")),
            ("quality_score", json!(0.8)),
        ])));
        assert!(!filter.matches(&payload(&[
            ("project_name", json!("other")),
            ("quality_score", json!(0.8)),
        ])));
        assert!(!filter.matches(&payload(&[
            ("project_name", json!("svc")),
            ("quality_score", json!(0.2)),
        ])));
        // Missing range key fails the range condition.
        assert!(!filter.matches(&payload(&[("project_name", json!("svc"))])));
    }

    #[test]
    fn test_vector_filter_any_of() {
        let filter = VectorFilter {
            must: vec![FilterCondition::AnyOf {
                key: "language".into(),
                values: vec![json!("python"), json!("rust")],
            }],
        };
        assert!(filter.matches(&payload(&[("language", json!("rust"))])));
        assert!(!filter.matches(&payload(&[("language", json!("go"))])));
    }
}
