// Embedding Client
// Semaphore-gated access to the external embedding service. Admission is
// bounded at the caller so bulk indexing stalls producers instead of piling
// requests up inside the backend, where tail latency collapses.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::warn;

use crate::config::KortexConfig;
use crate::contracts::EmbeddingBackend;
use crate::errors::PipelineError;

const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const MAX_ATTEMPTS: u32 = 2;

/// Rate-limited embedding client shared process-wide.
pub struct EmbeddingClient {
    backend: Arc<dyn EmbeddingBackend>,
    semaphore: Arc<Semaphore>,
    dimension: usize,
    call_timeout: Duration,
}

impl EmbeddingClient {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, config: &KortexConfig) -> Self {
        // Capacity is validated at config load; clamp again so a hand-built
        // config cannot disable the gate.
        let capacity = config.embedding_max_concurrent.clamp(1, 32);
        Self {
            backend,
            semaphore: Arc::new(Semaphore::new(capacity)),
            dimension: config.embedding_dimension,
            call_timeout: config.embedding_generation_timeout,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Generate one embedding under the concurrency gate.
    ///
    /// Two attempts total with a short fixed backoff; transport failures and
    /// timeouts are retried, malformed responses are not (they are
    /// deterministic). On final failure the typed error is returned and the
    /// caller decides whether to proceed without an embedding.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PipelineError::InternalError("embedding semaphore closed".into()))?;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let error = match timeout(self.call_timeout, self.backend.embed(text)).await {
                Ok(Ok(vector)) => {
                    if vector.len() != self.dimension {
                        return Err(PipelineError::EmbeddingMalformed(format!(
                            "expected dimension {}, got {}",
                            self.dimension,
                            vector.len()
                        )));
                    }
                    return Ok(vector);
                }
                Ok(Err(e @ PipelineError::EmbeddingMalformed(_))) => return Err(e),
                Ok(Err(e)) => e,
                Err(_) => PipelineError::EmbeddingTimeout(self.call_timeout),
            };

            if attempt >= MAX_ATTEMPTS {
                return Err(error);
            }
            warn!(
                attempt = attempt,
                error = %error,
                "embedding call failed, retrying"
            );
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
    }
}

/// HTTP backend for an embedding service with an Ollama-style API:
/// `POST {endpoint} {"model", "prompt"}` returning `{"embedding": [..]}`.
pub struct HttpEmbeddingBackend {
    client: reqwest::Client,
    endpoint: url::Url,
    model: String,
}

impl HttpEmbeddingBackend {
    pub fn new(endpoint: url::Url, model: impl Into<String>) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .pool_max_idle_per_host(20)
            .build()
            .map_err(|e| PipelineError::InternalError(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            model: model.into(),
        })
    }
}

#[derive(serde::Deserialize)]
struct EmbeddingResponse {
    embedding: Option<Vec<f32>>,
}

#[async_trait::async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::EmbeddingTimeout(Duration::from_secs(120))
                } else {
                    PipelineError::EmbeddingUnavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(PipelineError::EmbeddingUnavailable(format!(
                "embedding service returned {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::EmbeddingMalformed(e.to_string()))?;

        parsed.embedding.ok_or_else(|| {
            PipelineError::EmbeddingMalformed("response missing embedding field".into())
        })
    }
}

/// Deterministic offline backend: pseudo-embeddings seeded from a hash of
/// the text. Used by tests and the in-memory runtime so the full pipeline
/// runs without an external model.
pub struct HashEmbeddingBackend {
    dimension: usize,
}

impl HashEmbeddingBackend {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait::async_trait]
impl EmbeddingBackend for HashEmbeddingBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let mut state = xxhash_rust::xxh3::xxh3_64(text.as_bytes());
        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            // Simple xorshift over the seed; values land in [-0.5, 0.5).
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            vector.push(((state % 1000) as f32 / 1000.0) - 0.5);
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}
