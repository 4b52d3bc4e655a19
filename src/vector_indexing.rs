// Vector Index Writer
// Chunks document content into overlapping character windows, embeds each
// chunk through the rate-limited client, and upserts points with a payload
// rich enough for the search aggregator's native filters. Chunk ids are
// deterministic over (content hash, ordinal) so re-ingestion reuses ids.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::config::PartialWritePolicy;
use crate::contracts::{VectorPoint, VectorStore};
use crate::embeddings::EmbeddingClient;
use crate::errors::PipelineError;
use crate::models::ContentFingerprint;

/// Split content into overlapping character windows. The last chunk may be
/// shorter; empty content produces zero chunks. Operates on characters, not
/// bytes, so multi-byte text never splits inside a code point.
pub fn chunk_content(content: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if content.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    // Config validation keeps overlap < size; guard anyway so a bad caller
    // cannot loop forever.
    let step = chunk_size.saturating_sub(chunk_overlap).max(1);

    let chars: Vec<char> = content.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Deterministic per-chunk point id.
pub fn chunk_point_id(digest: &str, ordinal: usize) -> String {
    let prefix = &digest[..digest.len().min(16)];
    format!("{prefix}-{ordinal:04}")
}

/// Document-level context attached to every chunk payload.
#[derive(Debug, Clone)]
pub struct VectorDocumentContext<'a> {
    pub source_path: &'a str,
    pub project_name: &'a str,
    pub project_id: Option<&'a str>,
    pub language: Option<&'a str>,
    pub quality_score: Option<f64>,
    pub entity_type: &'a str,
}

/// Result of one vector write.
#[derive(Debug, Clone, Default)]
pub struct VectorWriteOutcome {
    pub vector_ids: Vec<String>,
    pub chunks_attempted: usize,
}

/// Writes chunked document embeddings into the vector store.
pub struct VectorIndexWriter {
    store: Arc<dyn VectorStore>,
    embeddings: Arc<EmbeddingClient>,
    collection: String,
    upsert_timeout: Duration,
    partial_write_policy: PartialWritePolicy,
}

impl VectorIndexWriter {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embeddings: Arc<EmbeddingClient>,
        collection: impl Into<String>,
        upsert_timeout: Duration,
        partial_write_policy: PartialWritePolicy,
    ) -> Self {
        Self {
            store,
            embeddings,
            collection: collection.into(),
            upsert_timeout,
            partial_write_policy,
        }
    }

    /// Index one document's content.
    ///
    /// A failure on any individual chunk aborts the remainder. Chunks
    /// already written stay written; under the default policy the partial
    /// result is returned as success with the achieved count, otherwise the
    /// error propagates. Zero successful chunks is always an error.
    pub async fn index_document(
        &self,
        content: &str,
        fingerprint: &ContentFingerprint,
        context: &VectorDocumentContext<'_>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<VectorWriteOutcome, PipelineError> {
        let chunks = chunk_content(content, chunk_size, chunk_overlap);
        let mut outcome = VectorWriteOutcome {
            vector_ids: Vec::new(),
            chunks_attempted: chunks.len(),
        };
        if chunks.is_empty() {
            return Ok(outcome);
        }

        for (ordinal, chunk) in chunks.iter().enumerate() {
            let result = self
                .write_chunk(chunk, ordinal, fingerprint, context)
                .await;

            match result {
                Ok(point_id) => outcome.vector_ids.push(point_id),
                Err(error) => {
                    warn!(
                        source_path = context.source_path,
                        ordinal = ordinal,
                        succeeded = outcome.vector_ids.len(),
                        error = %error,
                        "vector indexing aborted mid-document"
                    );
                    if outcome.vector_ids.is_empty()
                        || self.partial_write_policy == PartialWritePolicy::TreatAsFailure
                    {
                        return Err(error);
                    }
                    return Ok(outcome);
                }
            }
        }

        Ok(outcome)
    }

    async fn write_chunk(
        &self,
        chunk: &str,
        ordinal: usize,
        fingerprint: &ContentFingerprint,
        context: &VectorDocumentContext<'_>,
    ) -> Result<String, PipelineError> {
        let vector = self.embeddings.embed(chunk).await?;
        let point_id = chunk_point_id(&fingerprint.digest, ordinal);

        let point = VectorPoint {
            id: point_id.clone(),
            vector,
            payload: chunk_payload(chunk, ordinal, fingerprint, context),
        };

        match timeout(
            self.upsert_timeout,
            self.store.upsert(&self.collection, vec![point]),
        )
        .await
        {
            Ok(Ok(())) => Ok(point_id),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PipelineError::VectorStoreUnavailable(format!(
                "upsert timed out after {:?}",
                self.upsert_timeout
            ))),
        }
    }
}

fn chunk_payload(
    chunk: &str,
    ordinal: usize,
    fingerprint: &ContentFingerprint,
    context: &VectorDocumentContext<'_>,
) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("content".to_string(), json!(chunk));
    payload.insert("chunk_number".to_string(), json!(ordinal));
    payload.insert("source_path".to_string(), json!(context.source_path));
    payload.insert("project_name".to_string(), json!(context.project_name));
    payload.insert("content_hash".to_string(), json!(fingerprint.digest));
    payload.insert(
        "hash_algorithm".to_string(),
        json!(fingerprint.algorithm.as_str()),
    );
    payload.insert("entity_type".to_string(), json!(context.entity_type));
    payload.insert(
        "language".to_string(),
        json!(context.language.unwrap_or("unknown")),
    );
    if let Some(project_id) = context.project_id {
        payload.insert("project_id".to_string(), json!(project_id));
    }
    if let Some(quality) = context.quality_score {
        payload.insert("quality_score".to_string(), json!(quality));
    }
    payload
}
