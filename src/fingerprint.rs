// Content Fingerprinting
// Stable content hashing plus the dedup verdict that gates the rest of the
// pipeline. The digest is a pure function of the content bytes; the verdict
// comes from a seen-hash index that may be unreachable, in which case the
// verdict degrades to `New` rather than failing the request.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

use crate::contracts::FingerprintIndex;
use crate::errors::PipelineError;
use crate::models::{ContentFingerprint, DedupVerdict, HashAlgorithm};

/// Computes fingerprints and consults the seen-hash index for verdicts.
pub struct Stamper {
    algorithm: HashAlgorithm,
    index: Arc<dyn FingerprintIndex>,
}

impl Stamper {
    pub fn new(algorithm: HashAlgorithm, index: Arc<dyn FingerprintIndex>) -> Self {
        Self { algorithm, index }
    }

    /// Pure digest of the content bytes under the configured algorithm.
    pub fn digest(&self, content: &str) -> String {
        match self.algorithm {
            HashAlgorithm::Blake3 => blake3::hash(content.as_bytes()).to_hex().to_string(),
            HashAlgorithm::Sha256 => {
                use sha2::{Digest, Sha256};
                let mut hasher = Sha256::new();
                hasher.update(content.as_bytes());
                hex::encode(hasher.finalize())
            }
        }
    }

    /// Stamp one document: digest plus dedup verdict plus timestamp.
    ///
    /// An unreachable seen-hash index downgrades the verdict to `New` with a
    /// warning instead of failing; duplicate work is cheaper than dropped
    /// work.
    pub async fn stamp(
        &self,
        content: &str,
        source_path: &str,
    ) -> Result<ContentFingerprint, PipelineError> {
        let digest = self.digest(content);

        let verdict = match self.index.observe(&digest, source_path).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(
                    source_path = source_path,
                    error = %e,
                    "fingerprint index unreachable, defaulting verdict to new"
                );
                DedupVerdict::New
            }
        };

        Ok(ContentFingerprint {
            digest,
            algorithm: self.algorithm,
            verdict,
            stamped_at: Utc::now(),
        })
    }
}

/// HTTP client for an external seen-hash index:
/// `POST {endpoint}/api/observe {"hash", "source_path"}` returning
/// `{"dedupe_status": "new" | "duplicate"}`.
pub struct HttpFingerprintIndex {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpFingerprintIndex {
    pub fn new(endpoint: url::Url) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .pool_max_idle_per_host(20)
            .build()
            .map_err(|e| PipelineError::InternalError(format!("http client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

#[derive(serde::Deserialize)]
struct ObserveResponse {
    dedupe_status: String,
}

#[async_trait::async_trait]
impl FingerprintIndex for HttpFingerprintIndex {
    async fn observe(
        &self,
        digest: &str,
        source_path: &str,
    ) -> Result<DedupVerdict, PipelineError> {
        let url = self
            .endpoint
            .join("api/observe")
            .map_err(|e| PipelineError::InternalError(format!("fingerprint url: {e}")))?;

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "hash": digest,
                "source_path": source_path,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::StampingUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::StampingUnavailable(format!(
                "fingerprint index returned {}",
                response.status()
            )));
        }

        let parsed: ObserveResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::StampingUnavailable(format!("malformed response: {e}")))?;

        match parsed.dedupe_status.as_str() {
            "duplicate" => Ok(DedupVerdict::Duplicate),
            _ => Ok(DedupVerdict::New),
        }
    }
}

/// In-process seen-hash index. Maps digest to the path that first produced
/// it; observing a known digest yields `Duplicate`.
#[derive(Debug, Default)]
pub struct MemoryFingerprintIndex {
    seen: DashMap<String, String>,
}

impl MemoryFingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[async_trait::async_trait]
impl FingerprintIndex for MemoryFingerprintIndex {
    async fn observe(
        &self,
        digest: &str,
        source_path: &str,
    ) -> Result<DedupVerdict, PipelineError> {
        // Single atomic insert: under concurrent delivery of the same
        // content, exactly one caller sees `New`.
        match self
            .seen
            .insert(digest.to_string(), source_path.to_string())
        {
            Some(_) => Ok(DedupVerdict::Duplicate),
            None => Ok(DedupVerdict::New),
        }
    }
}
