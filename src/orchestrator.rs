// Indexing Orchestrator
// Drives the per-document pipeline: validation, stamping, parallel
// enrichment (extraction + quality), and parallel writes (vector + graph).
// Stage 1 is the only critical stage; everything after it degrades per
// service. Exactly one completed or failed outcome is produced per request,
// carrying the request's correlation id.

use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::KortexConfig;
use crate::contracts::{
    EntityExtractor, ExtractionOptions, QualityAssessment, QualityScorer,
};
use crate::entity_extraction::{normalize_extraction, NormalizedExtraction};
use crate::errors::{ErrorEnvelope, PipelineError};
use crate::fingerprint::Stamper;
use crate::graph_indexing::GraphIndexWriter;
use crate::metrics::PipelineMetrics;
use crate::models::{ContentFingerprint, IndexingReceipt, IndexingRequest, ServiceFailures, ServiceTimings};
use crate::types::{ProjectName, SourcePath};
use crate::vector_indexing::{VectorDocumentContext, VectorIndexWriter};

/// Terminal outcome of one indexing request.
#[derive(Debug, Clone)]
pub enum IndexingOutcome {
    Completed(IndexingReceipt),
    Failed(IndexingFailure),
}

/// Payload of a failed outcome.
#[derive(Debug, Clone)]
pub struct IndexingFailure {
    pub source_path: String,
    pub error: ErrorEnvelope,
    pub processing_time_ms: f64,
}

impl IndexingOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, IndexingOutcome::Completed(_))
    }

    pub fn receipt(&self) -> Option<&IndexingReceipt> {
        match self {
            IndexingOutcome::Completed(receipt) => Some(receipt),
            IndexingOutcome::Failed(_) => None,
        }
    }
}

/// Per-document pipeline driver.
pub struct IndexingOrchestrator {
    config: Arc<KortexConfig>,
    metrics: Arc<PipelineMetrics>,
    stamper: Arc<Stamper>,
    extractor: Arc<dyn EntityExtractor>,
    scorer: Arc<dyn QualityScorer>,
    vector_writer: Arc<VectorIndexWriter>,
    graph_writer: Arc<GraphIndexWriter>,
}

impl IndexingOrchestrator {
    pub fn new(
        config: Arc<KortexConfig>,
        metrics: Arc<PipelineMetrics>,
        stamper: Arc<Stamper>,
        extractor: Arc<dyn EntityExtractor>,
        scorer: Arc<dyn QualityScorer>,
        vector_writer: Arc<VectorIndexWriter>,
        graph_writer: Arc<GraphIndexWriter>,
    ) -> Self {
        Self {
            config,
            metrics,
            stamper,
            extractor,
            scorer,
            vector_writer,
            graph_writer,
        }
    }

    /// Process one request to a terminal outcome. Never panics a task; every
    /// failure mode becomes a typed `Failed` outcome.
    pub async fn process(self: &Arc<Self>, request: IndexingRequest) -> IndexingOutcome {
        let started = Instant::now();

        // Validation gate: no side effects before it passes.
        if let Err(e) = request.validate() {
            self.metrics.record_indexing_failure();
            return fail(&request.source_path, &e, started);
        }

        // The hard budget cancels the request outright; the pipeline holds
        // no locks across awaits, so cancellation is safe at any suspension
        // point.
        let outcome = match timeout(
            self.config.hard_request_budget,
            self.run_pipeline(&request, started),
        )
        .await
        {
            Ok(Ok(receipt)) => IndexingOutcome::Completed(receipt),
            Ok(Err(e)) => fail(&request.source_path, &e, started),
            Err(_) => {
                let e = PipelineError::InternalError(format!(
                    "request exceeded hard budget of {:?}",
                    self.config.hard_request_budget
                ));
                fail(&request.source_path, &e, started)
            }
        };

        match &outcome {
            IndexingOutcome::Completed(receipt) => {
                self.metrics.record_indexing_success();
                if receipt.cache_hit {
                    self.metrics.record_cache_hit();
                }
            }
            IndexingOutcome::Failed(_) => self.metrics.record_indexing_failure(),
        }
        outcome
    }

    async fn run_pipeline(
        self: &Arc<Self>,
        request: &IndexingRequest,
        started: Instant,
    ) -> Result<IndexingReceipt, PipelineError> {
        let mut timings = ServiceTimings::default();
        let mut failures = ServiceFailures::default();

        // Stage 1: stamping. Critical; a failure here aborts the request.
        let stamp_started = Instant::now();
        let fingerprint = match timeout(
            self.config.stamping_timeout,
            self.stamper.stamp(&request.content, &request.source_path),
        )
        .await
        {
            Ok(Ok(fingerprint)) => fingerprint,
            Ok(Err(e)) => {
                self.metrics.record_service_failure("metadata_stamping");
                return Err(PipelineError::StampingUnavailable(e.to_string()));
            }
            Err(_) => {
                self.metrics.record_service_failure("metadata_stamping");
                return Err(PipelineError::StampingUnavailable(format!(
                    "stamping timed out after {:?}",
                    self.config.stamping_timeout
                )));
            }
        };
        timings.record(
            "metadata_stamping_ms",
            stamp_started.elapsed().as_secs_f64() * 1000.0,
        );

        if fingerprint.is_duplicate() && !request.indexing_options.force_reindex {
            info!(
                source_path = %request.source_path,
                digest = %fingerprint.digest,
                "duplicate content, short-circuiting"
            );
            return Ok(cache_hit_receipt(request, &fingerprint, timings, started));
        }

        if self.config.skip_intelligence_enrichment {
            return Ok(empty_receipt(request, &fingerprint, timings, failures, started));
        }

        if self.config.enable_async_enrichment {
            // Hand stages 2-3 to a background task and complete immediately
            // with empty lists. The background run emits no second event;
            // consumers treat list fields as best-effort.
            let orchestrator = Arc::clone(self);
            let background_request = request.clone();
            let background_fingerprint = fingerprint.clone();
            tokio::spawn(async move {
                let mut timings = ServiceTimings::default();
                let mut failures = ServiceFailures::default();
                if let Err(e) = orchestrator
                    .enrich(
                        &background_request,
                        &background_fingerprint,
                        &mut timings,
                        &mut failures,
                    )
                    .await
                {
                    warn!(
                        source_path = %background_request.source_path,
                        error = %e,
                        "async enrichment failed"
                    );
                }
            });
            return Ok(empty_receipt(request, &fingerprint, timings, failures, started));
        }

        let enrichment = self
            .enrich(request, &fingerprint, &mut timings, &mut failures)
            .await?;

        let elapsed = started.elapsed();
        if elapsed > self.config.soft_request_budget {
            // Soft budget overruns are recorded, never cancelled; partial
            // results are worth keeping.
            warn!(
                source_path = %request.source_path,
                elapsed_ms = elapsed.as_millis(),
                "request exceeded soft budget"
            );
        }

        Ok(IndexingReceipt {
            source_path: request.source_path.clone(),
            document_hash: fingerprint.digest.clone(),
            hash_algorithm: fingerprint.algorithm,
            entity_ids: enrichment.entity_ids,
            vector_ids: enrichment.vector_ids,
            entities_extracted: enrichment.entities_extracted,
            relationships_created: enrichment.relationships_created,
            chunks_indexed: enrichment.chunks_indexed,
            quality_score: enrichment.quality.as_ref().map(|q| q.quality_score),
            compliance: enrichment.quality.map(|q| q.compliance),
            service_timings: timings,
            service_failures: failures,
            cache_hit: false,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Stages 2 and 3.
    async fn enrich(
        &self,
        request: &IndexingRequest,
        fingerprint: &ContentFingerprint,
        timings: &mut ServiceTimings,
        failures: &mut ServiceFailures,
    ) -> Result<EnrichmentOutcome, PipelineError> {
        let options = &request.indexing_options;
        let mut outcome = EnrichmentOutcome::default();

        // Stage 2: extraction and quality in parallel, each with its own
        // deadline; either may fail without aborting the request.
        let extraction_fut = async {
            if options.skip_entity_extraction {
                return None;
            }
            let stage_started = Instant::now();
            let result = timeout(
                self.config.extraction_timeout,
                self.extractor.extract(
                    &request.source_path,
                    &request.content,
                    request.language.as_deref(),
                    &ExtractionOptions::default(),
                ),
            )
            .await
            .unwrap_or_else(|_| {
                Err(PipelineError::ExtractionTimeout(
                    self.config.extraction_timeout,
                ))
            });
            Some((result, stage_started.elapsed().as_secs_f64() * 1000.0))
        };

        let quality_fut = async {
            if options.skip_quality_assessment {
                return None;
            }
            let stage_started = Instant::now();
            let result = timeout(
                self.config.quality_timeout,
                self.scorer.assess(
                    &request.content,
                    &request.source_path,
                    request.language.as_deref(),
                ),
            )
            .await
            .unwrap_or_else(|_| {
                Err(PipelineError::InternalError(format!(
                    "quality assessment timed out after {:?}",
                    self.config.quality_timeout
                )))
            });
            Some((result, stage_started.elapsed().as_secs_f64() * 1000.0))
        };

        let (extraction_result, quality_result) = tokio::join!(extraction_fut, quality_fut);

        let mut extraction: Option<NormalizedExtraction> = None;
        if let Some((result, elapsed_ms)) = extraction_result {
            match result {
                Ok(raw) => {
                    let project = ProjectName::new(&request.project_name)?;
                    let normalized = normalize_extraction(&project, &request.source_path, raw);
                    timings.record("entity_extraction_ms", elapsed_ms);
                    outcome.entities_extracted = normalized.entities.len();
                    extraction = Some(normalized);
                }
                Err(e) => {
                    warn!(source_path = %request.source_path, error = %e, "entity extraction failed");
                    failures.record("entity_extraction");
                    self.metrics.record_service_failure("entity_extraction");
                }
            }
        }

        if let Some((result, elapsed_ms)) = quality_result {
            match result {
                Ok(assessment) => {
                    timings.record("quality_assessment_ms", elapsed_ms);
                    outcome.quality = Some(assessment);
                }
                Err(e) => {
                    warn!(source_path = %request.source_path, error = %e, "quality assessment failed");
                    failures.record("quality_assessment");
                    self.metrics.record_service_failure("quality_assessment");
                }
            }
        }

        // Stage 3 runs only when extraction succeeded: vector chunking keys
        // off extraction output and graph writes would be empty without it.
        let Some(extraction) = extraction else {
            return Ok(outcome);
        };

        let source_path = SourcePath::new(&request.source_path)?;
        let project = ProjectName::new(&request.project_name)?;
        let quality_score = outcome.quality.as_ref().map(|q| q.quality_score);

        let vector_fut = async {
            if options.skip_vector_indexing {
                return None;
            }
            let stage_started = Instant::now();
            let context = VectorDocumentContext {
                source_path: &request.source_path,
                project_name: project.as_str(),
                project_id: request.project_id.as_deref(),
                language: request.language.as_deref(),
                quality_score,
                entity_type: "document",
            };
            let chunk_size = options.chunk_size.unwrap_or(self.config.chunk_size);
            let chunk_overlap = options.chunk_overlap.unwrap_or(self.config.chunk_overlap);
            let result = self
                .vector_writer
                .index_document(&request.content, fingerprint, &context, chunk_size, chunk_overlap)
                .await;
            Some((result, stage_started.elapsed().as_secs_f64() * 1000.0))
        };

        let graph_fut = async {
            if options.skip_knowledge_graph {
                return None;
            }
            let stage_started = Instant::now();
            let result = self
                .graph_writer
                .index_document(
                    &extraction.entities,
                    &extraction.relationships,
                    &source_path,
                    &project,
                )
                .await;
            Some((result, stage_started.elapsed().as_secs_f64() * 1000.0))
        };

        let (vector_result, graph_result) = tokio::join!(vector_fut, graph_fut);

        if let Some((result, elapsed_ms)) = vector_result {
            match result {
                Ok(write) => {
                    timings.record("vector_indexing_ms", elapsed_ms);
                    outcome.chunks_indexed = write.vector_ids.len();
                    outcome.vector_ids = write.vector_ids;
                }
                Err(e) => {
                    warn!(source_path = %request.source_path, error = %e, "vector indexing failed");
                    failures.record("vector_indexing");
                    self.metrics.record_service_failure("vector_indexing");
                }
            }
        }

        if let Some((result, elapsed_ms)) = graph_result {
            match result {
                Ok(write) => {
                    timings.record("knowledge_graph_ms", elapsed_ms);
                    outcome.relationships_created = write.relationships_created;
                    outcome.entity_ids = write.entity_ids;
                }
                Err(e) => {
                    warn!(source_path = %request.source_path, error = %e, "knowledge graph indexing failed");
                    failures.record("knowledge_graph");
                    self.metrics.record_service_failure("knowledge_graph");
                }
            }
        }

        Ok(outcome)
    }
}

#[derive(Debug, Default)]
struct EnrichmentOutcome {
    entity_ids: Vec<String>,
    vector_ids: Vec<String>,
    entities_extracted: usize,
    relationships_created: usize,
    chunks_indexed: usize,
    quality: Option<QualityAssessment>,
}

fn fail(source_path: &str, error: &PipelineError, started: Instant) -> IndexingOutcome {
    IndexingOutcome::Failed(IndexingFailure {
        source_path: source_path.to_string(),
        error: ErrorEnvelope::from_error(error),
        processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    })
}

fn cache_hit_receipt(
    request: &IndexingRequest,
    fingerprint: &ContentFingerprint,
    timings: ServiceTimings,
    started: Instant,
) -> IndexingReceipt {
    IndexingReceipt {
        source_path: request.source_path.clone(),
        document_hash: fingerprint.digest.clone(),
        hash_algorithm: fingerprint.algorithm,
        entity_ids: Vec::new(),
        vector_ids: Vec::new(),
        entities_extracted: 0,
        relationships_created: 0,
        chunks_indexed: 0,
        quality_score: None,
        compliance: None,
        service_timings: timings,
        service_failures: ServiceFailures::default(),
        cache_hit: true,
        processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    }
}

fn empty_receipt(
    request: &IndexingRequest,
    fingerprint: &ContentFingerprint,
    timings: ServiceTimings,
    failures: ServiceFailures,
    started: Instant,
) -> IndexingReceipt {
    IndexingReceipt {
        source_path: request.source_path.clone(),
        document_hash: fingerprint.digest.clone(),
        hash_algorithm: fingerprint.algorithm,
        entity_ids: Vec::new(),
        vector_ids: Vec::new(),
        entities_extracted: 0,
        relationships_created: 0,
        chunks_indexed: 0,
        quality_score: None,
        compliance: None,
        service_timings: timings,
        service_failures: failures,
        cache_hit: false,
        processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    }
}
