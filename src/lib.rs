// Kortex - Event-driven knowledge-intelligence pipeline
// Root library module

pub mod config;
pub mod contracts;
pub mod directory_tree;
pub mod embeddings;
pub mod entity_extraction;
pub mod errors;
pub mod events;
pub mod fingerprint;
pub mod graph_indexing;
pub mod handlers;
pub mod heuristic_extractor;
pub mod metrics;
pub mod models;
pub mod native_graph_store;
pub mod native_vector_store;
pub mod observability;
pub mod orchestrator;
pub mod quality_assessment;
pub mod runtime;
pub mod search_aggregator;
pub mod transport;
pub mod types;
pub mod vector_indexing;

// Re-export the observability entry points
pub use observability::{init_logging, init_logging_with_level, with_trace_id};

// Re-export the error taxonomy
pub use errors::{ErrorEnvelope, ErrorKind, PipelineError};

// Re-export validated types
pub use types::{Confidence, CorrelationId, EntityKind, ProjectName, RelationKind, SourcePath};

// Re-export the data model
pub use models::{
    ContentFingerprint, DedupVerdict, Entity, FileRecord, HashAlgorithm, IndexingOptions,
    IndexingReceipt, IndexingRequest, Relationship, SearchFilters, SearchKind, SearchReceipt,
    SearchRequest, SearchResultItem, ServiceFailures, ServiceTimings, TreeIndexRequest,
};

// Re-export configuration
pub use config::{KortexConfig, PartialWritePolicy, ServiceEndpoints};

// Re-export the storage and service contracts
pub use contracts::{
    EmbeddingBackend, EntityExtractor, ExtractionOptions, ExtractionOutcome, FilterCondition,
    FingerprintIndex, GraphStore, NodeKey, NodeLabel, NodeRecord, QualityAssessment,
    QualityScorer, RagSource, RawEntity, RawRelationship, ScoredPoint, VectorFilter, VectorPoint,
    VectorStore,
};

// Re-export pipeline components
pub use embeddings::{EmbeddingClient, HashEmbeddingBackend, HttpEmbeddingBackend};
pub use entity_extraction::{deterministic_entity_id, normalize_extraction, HttpEntityExtractor};
pub use fingerprint::{HttpFingerprintIndex, MemoryFingerprintIndex, Stamper};
pub use graph_indexing::{GraphIndexWriter, GraphWriteOutcome};
pub use heuristic_extractor::HeuristicExtractor;
pub use quality_assessment::{HeuristicQualityScorer, HttpQualityScorer};
pub use vector_indexing::{chunk_content, chunk_point_id, VectorIndexWriter, VectorWriteOutcome};

// Re-export the containment tree ingestor
pub use directory_tree::{DirectoryTreeIngestor, TreeIngestOutcome};

// Re-export the orchestrator and search front end
pub use orchestrator::{IndexingFailure, IndexingOrchestrator, IndexingOutcome};
pub use search_aggregator::{
    deduplicate_and_rank, glob_to_regex, matches_path_pattern, HttpRagSource, SearchAggregator,
};

// Re-export the transport layer and handlers
pub use events::{topics, EventEnvelope};
pub use handlers::{DocumentIndexingHandler, SearchHandler, TreeIndexHandler};
pub use transport::{EventHandler, EventRouter, EventTransport, InMemoryTransport};

// Re-export the reference backends
pub use native_graph_store::NativeGraphStore;
pub use native_vector_store::NativeVectorStore;

// Re-export runtime wiring
pub use metrics::PipelineMetrics;
pub use runtime::{Runtime, RuntimeBuilder};
