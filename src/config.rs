// Process Configuration
// Read once at startup and threaded through the runtime; nothing below
// re-reads the environment after construction. Defaults follow the deployed
// service; every knob can be overridden with a KORTEX_* environment variable.

use anyhow::{ensure, Context, Result};
use std::time::Duration;
use url::Url;

/// Policy for a vector write where some chunks were upserted and some were
/// not. The default treats partial success as success and reports the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialWritePolicy {
    TreatAsSuccess,
    TreatAsFailure,
}

impl std::str::FromStr for PartialWritePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "treat_as_success" => Ok(PartialWritePolicy::TreatAsSuccess),
            "failure" | "treat_as_failure" => Ok(PartialWritePolicy::TreatAsFailure),
            other => Err(format!(
                "expected \"success\" or \"failure\", got {other:?}"
            )),
        }
    }
}

/// Endpoints of the external collaborators. Any of them may be absent, in
/// which case the runtime wires the built-in fallback for that concern.
#[derive(Debug, Clone, Default)]
pub struct ServiceEndpoints {
    pub embedding: Option<Url>,
    pub extractor: Option<Url>,
    pub quality: Option<Url>,
    pub rag: Option<Url>,
    pub fingerprint: Option<Url>,
}

/// Process-level configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct KortexConfig {
    /// Semaphore capacity for the embedding client (1..=32).
    pub embedding_max_concurrent: usize,
    /// Fixed embedding dimension, checked on every response.
    pub embedding_dimension: usize,
    /// Per-call budget for one embedding generation.
    pub embedding_generation_timeout: Duration,

    /// Default chunk geometry for vector indexing.
    pub chunk_size: usize,
    pub chunk_overlap: usize,

    /// Global kill-switch for the enrichment stages.
    pub skip_intelligence_enrichment: bool,
    /// Hand enrichment off to a background task and complete immediately.
    pub enable_async_enrichment: bool,

    /// Ceiling on concurrently processed requests; above it, transport
    /// events are simply not consumed.
    pub max_inflight_requests: usize,

    /// Per-call deadlines.
    pub stamping_timeout: Duration,
    pub extraction_timeout: Duration,
    pub quality_timeout: Duration,
    pub vector_upsert_timeout: Duration,
    pub graph_upsert_timeout: Duration,
    pub rag_search_timeout: Duration,
    pub vector_search_timeout: Duration,
    pub graph_search_timeout: Duration,

    /// Soft budget: exceeded time is recorded, the request continues.
    pub soft_request_budget: Duration,
    /// Hard budget: the request is cancelled and fails.
    pub hard_request_budget: Duration,

    pub partial_write_policy: PartialWritePolicy,
    pub vector_collection: String,
    pub quality_weight_default: Option<f64>,

    pub endpoints: ServiceEndpoints,

    /// Request-surface concern; parsed for completeness, ignored by the core.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for KortexConfig {
    fn default() -> Self {
        Self {
            embedding_max_concurrent: 3,
            embedding_dimension: 1536,
            embedding_generation_timeout: Duration::from_secs(60),
            chunk_size: 1000,
            chunk_overlap: 200,
            skip_intelligence_enrichment: false,
            enable_async_enrichment: false,
            max_inflight_requests: num_cpus::get() * 4,
            stamping_timeout: Duration::from_secs(5),
            extraction_timeout: Duration::from_secs(10),
            quality_timeout: Duration::from_secs(10),
            vector_upsert_timeout: Duration::from_secs(10),
            graph_upsert_timeout: Duration::from_secs(10),
            rag_search_timeout: Duration::from_secs(5),
            vector_search_timeout: Duration::from_secs(10),
            graph_search_timeout: Duration::from_secs(10),
            soft_request_budget: Duration::from_secs(60),
            hard_request_budget: Duration::from_secs(300),
            partial_write_policy: PartialWritePolicy::TreatAsSuccess,
            vector_collection: "kortex_documents".to_string(),
            quality_weight_default: None,
            endpoints: ServiceEndpoints::default(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl KortexConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("KORTEX_EMBEDDING_MAX_CONCURRENT")? {
            config.embedding_max_concurrent = v;
        }
        if let Some(v) = env_parse::<usize>("KORTEX_EMBEDDING_DIMENSION")? {
            config.embedding_dimension = v;
        }
        if let Some(v) = env_parse::<u64>("KORTEX_EMBEDDING_GENERATION_TIMEOUT_S")? {
            config.embedding_generation_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<usize>("KORTEX_CHUNK_SIZE")? {
            config.chunk_size = v;
        }
        if let Some(v) = env_parse::<usize>("KORTEX_CHUNK_OVERLAP")? {
            config.chunk_overlap = v;
        }
        if let Some(v) = env_parse::<bool>("KORTEX_SKIP_INTELLIGENCE_ENRICHMENT")? {
            config.skip_intelligence_enrichment = v;
        }
        if let Some(v) = env_parse::<bool>("KORTEX_ENABLE_ASYNC_ENRICHMENT")? {
            config.enable_async_enrichment = v;
        }
        if let Some(v) = env_parse::<usize>("KORTEX_MAX_INFLIGHT_REQUESTS")? {
            config.max_inflight_requests = v;
        }
        if let Some(v) = env_parse::<u64>("KORTEX_STAMPING_TIMEOUT_S")? {
            config.stamping_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("KORTEX_EXTRACTION_TIMEOUT_S")? {
            config.extraction_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("KORTEX_QUALITY_TIMEOUT_S")? {
            config.quality_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("KORTEX_VECTOR_UPSERT_TIMEOUT_S")? {
            config.vector_upsert_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("KORTEX_GRAPH_UPSERT_TIMEOUT_S")? {
            config.graph_upsert_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("KORTEX_RAG_SEARCH_TIMEOUT_S")? {
            config.rag_search_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("KORTEX_VECTOR_SEARCH_TIMEOUT_S")? {
            config.vector_search_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("KORTEX_GRAPH_SEARCH_TIMEOUT_S")? {
            config.graph_search_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("KORTEX_SOFT_REQUEST_BUDGET_S")? {
            config.soft_request_budget = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("KORTEX_HARD_REQUEST_BUDGET_S")? {
            config.hard_request_budget = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<PartialWritePolicy>("KORTEX_PARTIAL_WRITE_POLICY")? {
            config.partial_write_policy = v;
        }
        if let Some(v) = env_parse::<f64>("KORTEX_QUALITY_WEIGHT_DEFAULT")? {
            config.quality_weight_default = Some(v);
        }
        if let Some(v) = std::env::var_os("KORTEX_VECTOR_COLLECTION") {
            config.vector_collection = v.to_string_lossy().into_owned();
        }
        if let Some(v) = std::env::var_os("KORTEX_CORS_ALLOWED_ORIGINS") {
            config.cors_allowed_origins = v
                .to_string_lossy()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config.endpoints.embedding = env_url("KORTEX_EMBEDDING_URL")?;
        config.endpoints.extractor = env_url("KORTEX_EXTRACTOR_URL")?;
        config.endpoints.quality = env_url("KORTEX_QUALITY_URL")?;
        config.endpoints.rag = env_url("KORTEX_RAG_URL")?;
        config.endpoints.fingerprint = env_url("KORTEX_FINGERPRINT_URL")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants. Called by `from_env`; callers that
    /// assemble a config by hand should call it themselves.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=32).contains(&self.embedding_max_concurrent),
            "embedding_max_concurrent must be in 1..=32, got {}",
            self.embedding_max_concurrent
        );
        ensure!(
            self.embedding_dimension > 0,
            "embedding_dimension must be positive"
        );
        ensure!(self.chunk_size > 0, "chunk_size must be positive");
        ensure!(
            self.chunk_overlap < self.chunk_size,
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            self.chunk_overlap,
            self.chunk_size
        );
        ensure!(
            self.max_inflight_requests > 0,
            "max_inflight_requests must be positive"
        );
        ensure!(
            self.soft_request_budget <= self.hard_request_budget,
            "soft budget must not exceed hard budget"
        );
        if let Some(weight) = self.quality_weight_default {
            ensure!(
                (0.0..=1.0).contains(&weight),
                "quality_weight_default must be in [0, 1]"
            );
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

fn env_url(key: &str) -> Result<Option<Url>> {
    match std::env::var(key) {
        Ok(raw) => {
            let url = Url::parse(raw.trim()).with_context(|| format!("invalid URL in {key}"))?;
            Ok(Some(url))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = KortexConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.embedding_max_concurrent, 3);
        assert_eq!(config.embedding_dimension, 1536);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.max_inflight_requests, num_cpus::get() * 4);
    }

    #[test]
    fn test_semaphore_capacity_bounds() {
        let mut config = KortexConfig::default();
        config.embedding_max_concurrent = 0;
        assert!(config.validate().is_err());

        config.embedding_max_concurrent = 33;
        assert!(config.validate().is_err());

        config.embedding_max_concurrent = 32;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chunk_geometry_validation() {
        let mut config = KortexConfig::default();
        config.chunk_overlap = config.chunk_size;
        assert!(config.validate().is_err());

        config.chunk_overlap = config.chunk_size - 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_write_policy_parse() {
        assert_eq!(
            "success".parse::<PartialWritePolicy>().unwrap(),
            PartialWritePolicy::TreatAsSuccess
        );
        assert_eq!(
            "TREAT_AS_FAILURE".parse::<PartialWritePolicy>().unwrap(),
            PartialWritePolicy::TreatAsFailure
        );
        assert!("sometimes".parse::<PartialWritePolicy>().is_err());
    }

    #[test]
    fn test_quality_weight_default_bounds() {
        let mut config = KortexConfig::default();
        config.quality_weight_default = Some(0.3);
        assert!(config.validate().is_ok());

        config.quality_weight_default = Some(1.5);
        assert!(config.validate().is_err());
    }
}
