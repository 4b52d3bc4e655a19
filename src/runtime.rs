// Runtime Context
// Explicit wiring of config, metrics, stores, and service clients,
// constructed once at startup and threaded through all components. Tests
// build an isolated in-memory runtime per test; nothing in this crate is a
// process-wide singleton.

use anyhow::Result;
use std::sync::Arc;

use crate::config::KortexConfig;
use crate::contracts::{
    EmbeddingBackend, EntityExtractor, FingerprintIndex, GraphStore, QualityScorer, RagSource,
    VectorStore,
};
use crate::embeddings::{EmbeddingClient, HashEmbeddingBackend, HttpEmbeddingBackend};
use crate::entity_extraction::HttpEntityExtractor;
use crate::fingerprint::{HttpFingerprintIndex, MemoryFingerprintIndex, Stamper};
use crate::graph_indexing::GraphIndexWriter;
use crate::heuristic_extractor::HeuristicExtractor;
use crate::metrics::PipelineMetrics;
use crate::models::HashAlgorithm;
use crate::native_graph_store::NativeGraphStore;
use crate::native_vector_store::NativeVectorStore;
use crate::orchestrator::IndexingOrchestrator;
use crate::quality_assessment::{HeuristicQualityScorer, HttpQualityScorer};
use crate::search_aggregator::{HttpRagSource, SearchAggregator};
use crate::transport::{EventTransport, InMemoryTransport};
use crate::vector_indexing::VectorIndexWriter;

/// Fully wired pipeline context.
pub struct Runtime {
    pub config: Arc<KortexConfig>,
    pub metrics: Arc<PipelineMetrics>,
    pub transport: Arc<dyn EventTransport>,
    pub graph_store: Arc<dyn GraphStore>,
    pub vector_store: Arc<dyn VectorStore>,
    pub embeddings: Arc<EmbeddingClient>,
    pub orchestrator: Arc<IndexingOrchestrator>,
    pub search: Arc<SearchAggregator>,
}

impl Runtime {
    pub fn builder(config: KortexConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// Fully in-memory runtime: native stores, heuristic services,
    /// deterministic embeddings. The default for tests and offline use.
    pub fn in_memory(config: KortexConfig) -> Result<Self> {
        RuntimeBuilder::new(config).build()
    }
}

/// Builder that fills unset components with configured HTTP clients where
/// endpoints exist, and in-memory fallbacks otherwise.
pub struct RuntimeBuilder {
    config: KortexConfig,
    transport: Option<Arc<dyn EventTransport>>,
    graph_store: Option<Arc<dyn GraphStore>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    fingerprint_index: Option<Arc<dyn FingerprintIndex>>,
    embedding_backend: Option<Arc<dyn EmbeddingBackend>>,
    extractor: Option<Arc<dyn EntityExtractor>>,
    scorer: Option<Arc<dyn QualityScorer>>,
    rag: Option<Arc<dyn RagSource>>,
}

impl RuntimeBuilder {
    pub fn new(config: KortexConfig) -> Self {
        Self {
            config,
            transport: None,
            graph_store: None,
            vector_store: None,
            fingerprint_index: None,
            embedding_backend: None,
            extractor: None,
            scorer: None,
            rag: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn EventTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_graph_store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.graph_store = Some(store);
        self
    }

    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn with_fingerprint_index(mut self, index: Arc<dyn FingerprintIndex>) -> Self {
        self.fingerprint_index = Some(index);
        self
    }

    pub fn with_embedding_backend(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.embedding_backend = Some(backend);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn QualityScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_rag_source(mut self, rag: Arc<dyn RagSource>) -> Self {
        self.rag = Some(rag);
        self
    }

    pub fn build(self) -> Result<Runtime> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let metrics = Arc::new(PipelineMetrics::new());

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(InMemoryTransport::new()));
        let graph_store = self
            .graph_store
            .unwrap_or_else(|| Arc::new(NativeGraphStore::new()));
        let vector_store = self
            .vector_store
            .unwrap_or_else(|| Arc::new(NativeVectorStore::new()));
        let fingerprint_index: Arc<dyn FingerprintIndex> = match self.fingerprint_index {
            Some(index) => index,
            None => match &config.endpoints.fingerprint {
                Some(endpoint) => Arc::new(
                    HttpFingerprintIndex::new(endpoint.clone())
                        .map_err(|e| anyhow::anyhow!("fingerprint index client: {e}"))?,
                ),
                None => Arc::new(MemoryFingerprintIndex::new()),
            },
        };

        let embedding_backend: Arc<dyn EmbeddingBackend> = match self.embedding_backend {
            Some(backend) => backend,
            None => match &config.endpoints.embedding {
                Some(endpoint) => Arc::new(
                    HttpEmbeddingBackend::new(endpoint.clone(), "nomic-embed-text")
                        .map_err(|e| anyhow::anyhow!("embedding backend: {e}"))?,
                ),
                None => Arc::new(HashEmbeddingBackend::new(config.embedding_dimension)),
            },
        };

        let extractor: Arc<dyn EntityExtractor> = match self.extractor {
            Some(extractor) => extractor,
            None => match &config.endpoints.extractor {
                Some(endpoint) => Arc::new(
                    HttpEntityExtractor::new(endpoint.clone())
                        .map_err(|e| anyhow::anyhow!("extractor client: {e}"))?,
                ),
                None => Arc::new(HeuristicExtractor::new()),
            },
        };

        let scorer: Arc<dyn QualityScorer> = match self.scorer {
            Some(scorer) => scorer,
            None => match &config.endpoints.quality {
                Some(endpoint) => Arc::new(
                    HttpQualityScorer::new(endpoint.clone())
                        .map_err(|e| anyhow::anyhow!("quality client: {e}"))?,
                ),
                None => Arc::new(HeuristicQualityScorer::new()),
            },
        };

        let rag: Option<Arc<dyn RagSource>> = match self.rag {
            Some(rag) => Some(rag),
            None => match &config.endpoints.rag {
                Some(endpoint) => Some(Arc::new(
                    HttpRagSource::new(endpoint.clone())
                        .map_err(|e| anyhow::anyhow!("rag client: {e}"))?,
                )),
                None => None,
            },
        };

        let embeddings = Arc::new(EmbeddingClient::new(embedding_backend, &config));
        let stamper = Arc::new(Stamper::new(HashAlgorithm::Blake3, fingerprint_index));

        let vector_writer = Arc::new(VectorIndexWriter::new(
            vector_store.clone(),
            embeddings.clone(),
            config.vector_collection.clone(),
            config.vector_upsert_timeout,
            config.partial_write_policy,
        ));
        let graph_writer = Arc::new(GraphIndexWriter::new(
            graph_store.clone(),
            config.graph_upsert_timeout,
        ));

        let orchestrator = Arc::new(IndexingOrchestrator::new(
            config.clone(),
            metrics.clone(),
            stamper,
            extractor,
            scorer,
            vector_writer,
            graph_writer,
        ));

        let search = Arc::new(SearchAggregator::new(
            config.clone(),
            metrics.clone(),
            rag,
            vector_store.clone(),
            graph_store.clone(),
            embeddings.clone(),
        ));

        Ok(Runtime {
            config,
            metrics,
            transport,
            graph_store,
            vector_store,
            embeddings,
            orchestrator,
            search,
        })
    }
}
