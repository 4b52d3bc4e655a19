// Entity Extraction
// Client for the external extractor plus the normalization layer that turns
// its raw schema into canonical entity and relationship records. The raw
// schema never escapes this module.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::warn;
use xxhash_rust::xxh3::xxh3_64;

use crate::contracts::{
    EntityExtractor, ExtractionOptions, ExtractionOutcome, RawEntity, RawRelationship,
};
use crate::errors::PipelineError;
use crate::models::{Entity, Relationship};
use crate::types::{Confidence, EntityKind, ProjectName, RelationKind};

/// Deterministic entity id over the identity tuple. Stable across
/// re-ingestion of the same `(project, source_path, name, kind)`.
pub fn deterministic_entity_id(
    project: &ProjectName,
    source_path: &str,
    name: &str,
    kind: EntityKind,
) -> String {
    let identity = format!(
        "{}\x1f{}\x1f{}\x1f{}",
        project.as_str(),
        source_path,
        name,
        kind.as_str()
    );
    format!("entity-{:016x}", xxh3_64(identity.as_bytes()))
}

fn deterministic_relationship_id(source: &str, target: &str, kind: RelationKind) -> String {
    let identity = format!("{source}\x1f{target}\x1f{}", kind.as_str());
    format!("rel-{:016x}", xxh3_64(identity.as_bytes()))
}

/// Extraction result after normalization into the canonical shapes.
#[derive(Debug, Clone, Default)]
pub struct NormalizedExtraction {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    /// Normalization anomalies (unknown kinds, dropped relationships).
    pub warnings: Vec<String>,
}

/// Normalize a raw extractor response.
///
/// - Entities without a service-assigned id get a deterministic 64-bit id.
/// - Unknown entity kinds become `Concept` with a recorded warning.
/// - Confidence scores are clamped to [0, 1].
/// - Relationship endpoints are remapped through the raw-id/name table;
///   endpoints the extractor did not return are kept verbatim (they may
///   pre-exist in the graph), empty endpoints drop the relationship.
pub fn normalize_extraction(
    project: &ProjectName,
    source_path: &str,
    outcome: ExtractionOutcome,
) -> NormalizedExtraction {
    let mut normalized = NormalizedExtraction::default();
    // Raw id and raw name both resolve to the canonical id.
    let mut id_table: HashMap<String, String> = HashMap::new();

    for raw in outcome.entities {
        if raw.name.trim().is_empty() {
            normalized
                .warnings
                .push("dropped entity with empty name".to_string());
            continue;
        }

        let kind = match raw.entity_type.as_deref() {
            Some(raw_kind) => EntityKind::parse(raw_kind).unwrap_or_else(|| {
                let message = format!("unknown entity kind {raw_kind:?}, defaulting to concept");
                warn!(source_path = source_path, "{message}");
                normalized.warnings.push(message);
                EntityKind::Concept
            }),
            None => EntityKind::Concept,
        };

        let entity_id = raw
            .entity_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| deterministic_entity_id(project, source_path, &raw.name, kind));

        if let Some(raw_id) = &raw.entity_id {
            id_table.insert(raw_id.clone(), entity_id.clone());
        }
        id_table.insert(raw.name.clone(), entity_id.clone());

        normalized.entities.push(Entity {
            entity_id,
            name: raw.name,
            kind,
            description: raw.description,
            source_path: source_path.to_string(),
            confidence: Confidence::clamped(raw.confidence_score.unwrap_or(0.5)),
            source_line: raw.line_number,
            properties: raw.properties,
            embedding: raw.embedding,
        });
    }

    for raw in outcome.relationships {
        let source = resolve_endpoint(&id_table, &raw.source_entity_id);
        let target = resolve_endpoint(&id_table, &raw.target_entity_id);

        let (source, target) = match (source, target) {
            (Some(s), Some(t)) => (s, t),
            _ => {
                let message = format!(
                    "dropped relationship with missing endpoint ({:?} -> {:?})",
                    raw.source_entity_id, raw.target_entity_id
                );
                warn!(source_path = source_path, "{message}");
                normalized.warnings.push(message);
                continue;
            }
        };

        let kind = match raw.relationship_type.as_deref() {
            Some(raw_kind) => RelationKind::parse(raw_kind).unwrap_or_else(|| {
                let message =
                    format!("unknown relationship kind {raw_kind:?}, defaulting to relates_to");
                warn!(source_path = source_path, "{message}");
                normalized.warnings.push(message);
                RelationKind::RelatesTo
            }),
            None => RelationKind::RelatesTo,
        };

        let relationship_id = raw
            .relationship_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| deterministic_relationship_id(&source, &target, kind));

        normalized.relationships.push(Relationship {
            relationship_id,
            source_entity_id: source,
            target_entity_id: target,
            kind,
            confidence: Confidence::clamped(raw.confidence_score.unwrap_or(0.5)),
            properties: raw.properties,
        });
    }

    normalized
}

fn resolve_endpoint(id_table: &HashMap<String, String>, raw_endpoint: &str) -> Option<String> {
    let trimmed = raw_endpoint.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(
        id_table
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_string()),
    )
}

/// HTTP client for the external extraction service:
/// `POST {endpoint}/extract/document`.
pub struct HttpEntityExtractor {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpEntityExtractor {
    pub fn new(endpoint: url::Url) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(20)
            .build()
            .map_err(|e| PipelineError::InternalError(format!("http client: {e}")))?;
        Ok(Self { client, endpoint })
    }

    fn extract_url(&self) -> Result<url::Url, PipelineError> {
        self.endpoint
            .join("extract/document")
            .map_err(|e| PipelineError::InternalError(format!("extractor url: {e}")))
    }
}

#[derive(serde::Deserialize, Default)]
struct RawExtractionResponse {
    #[serde(default, alias = "enriched_entities")]
    entities: Vec<RawEntity>,
    #[serde(default)]
    relationships: Vec<RawRelationship>,
}

#[async_trait::async_trait]
impl EntityExtractor for HttpEntityExtractor {
    async fn extract(
        &self,
        source_path: &str,
        content: &str,
        language: Option<&str>,
        options: &ExtractionOptions,
    ) -> Result<ExtractionOutcome, PipelineError> {
        let body = serde_json::json!({
            "document_path": source_path,
            "content": content,
            "language": language,
            "extraction_options": options,
        });

        let response = self
            .client
            .post(self.extract_url()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::ExtractionTimeout(Duration::from_secs(30))
                } else {
                    PipelineError::ExtractionUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(PipelineError::ExtractionRejected(format!(
                "extractor returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(PipelineError::ExtractionUnavailable(format!(
                "extractor returned {status}"
            )));
        }

        // A response that fails to parse is indistinguishable from a broken
        // service; surface it as unavailable.
        let parsed: RawExtractionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::ExtractionUnavailable(format!("malformed response: {e}")))?;

        Ok(ExtractionOutcome {
            entities: parsed.entities,
            relationships: parsed.relationships,
        })
    }
}
