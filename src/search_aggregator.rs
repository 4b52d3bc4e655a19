// Search Aggregator
// Fans a query out across the lexical/RAG service, the vector store, and the
// knowledge graph, tolerates any subset failing, and produces one ranked,
// deduplicated result list. Path globs are applied client-side because the
// vector store cannot evaluate them natively.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::warn;

use crate::config::KortexConfig;
use crate::contracts::{FilterCondition, GraphStore, RagSource, VectorFilter, VectorStore};
use crate::embeddings::EmbeddingClient;
use crate::errors::PipelineError;
use crate::metrics::PipelineMetrics;
use crate::models::{SearchFilters, SearchKind, SearchReceipt, SearchRequest, SearchResultItem};

/// Translate a glob path pattern to a regular expression:
/// `**/` matches zero or more directory levels, `*` anything but `/`,
/// `?` a single character.
pub fn glob_to_regex(pattern: &str) -> String {
    // Protect glob tokens before escaping regex metacharacters; `**/` is
    // handled as one unit so it can match zero levels without doubling
    // slashes.
    let mut escaped = pattern
        .replace("**/", "\u{1}")
        .replace("**", "\u{2}")
        .replace('*', "\u{3}")
        .replace('?', "\u{4}");

    for ch in ['\\', '.', '+', '^', '$', '(', ')', '[', ']', '{', '}', '|'] {
        escaped = escaped.replace(ch, &format!("\\{ch}"));
    }

    escaped
        .replace('\u{1}', "(?:.*/)?")
        .replace('\u{2}', ".*")
        .replace('\u{3}', "[^/]*")
        .replace('\u{4}', ".")
}

/// Whether a path matches a glob pattern. Patterns without `**` are anchored
/// to the whole path, so `*.py` matches `app.py` but not `services/app.py`.
pub fn matches_path_pattern(path: &str, pattern: &str) -> bool {
    let anchored = format!("^{}$", glob_to_regex(pattern));
    match regex::Regex::new(&anchored) {
        Ok(re) => re.is_match(path),
        Err(e) => {
            warn!(pattern = pattern, error = %e, "invalid path pattern, skipping filter");
            true
        }
    }
}

/// Deduplicate by source path (best score wins), fuse in the quality score,
/// sort descending, truncate.
pub fn deduplicate_and_rank(
    results: Vec<SearchResultItem>,
    max_results: usize,
    quality_weight: Option<f64>,
) -> Vec<SearchResultItem> {
    let mut best: HashMap<String, SearchResultItem> = HashMap::new();

    for mut item in results {
        if let Some(weight) = quality_weight {
            let quality = item.quality_score().unwrap_or(0.0);
            item.score = (1.0 - weight) * item.score + weight * quality;
        }

        match best.get(&item.source_path) {
            Some(existing) if existing.score >= item.score => {}
            _ => {
                best.insert(item.source_path.clone(), item);
            }
        }
    }

    let mut ranked: Vec<SearchResultItem> = best.into_values().collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(max_results);
    ranked
}

/// HTTP client for the lexical/RAG search service:
/// `POST {endpoint} {"query", "limit", "filters"}` returning
/// `{"results": [{"source_path" | "path", "score", "content", "metadata"}]}`.
pub struct HttpRagSource {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpRagSource {
    pub fn new(endpoint: url::Url) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(20)
            .build()
            .map_err(|e| PipelineError::InternalError(format!("http client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

#[derive(serde::Deserialize)]
struct RagResponse {
    #[serde(default)]
    results: Vec<RagHit>,
}

#[derive(serde::Deserialize)]
struct RagHit {
    #[serde(default, alias = "path")]
    source_path: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    metadata: std::collections::BTreeMap<String, Value>,
}

#[async_trait::async_trait]
impl RagSource for HttpRagSource {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResultItem>, PipelineError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&serde_json::json!({
                "query": query,
                "limit": limit,
                "filters": filters,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::InternalError(format!("rag search: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::InternalError(format!(
                "rag service returned {}",
                response.status()
            )));
        }

        let parsed: RagResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::InternalError(format!("malformed rag response: {e}")))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|hit| SearchResultItem {
                source_path: hit.source_path.unwrap_or_else(|| "unknown".to_string()),
                score: hit.score.unwrap_or(0.8).clamp(0.0, 1.0),
                content: hit.content,
                metadata: hit.metadata,
            })
            .collect())
    }
}

/// Multi-source search front end.
pub struct SearchAggregator {
    config: Arc<KortexConfig>,
    metrics: Arc<PipelineMetrics>,
    rag: Option<Arc<dyn RagSource>>,
    vector_store: Arc<dyn VectorStore>,
    graph_store: Arc<dyn GraphStore>,
    embeddings: Arc<EmbeddingClient>,
}

impl SearchAggregator {
    pub fn new(
        config: Arc<KortexConfig>,
        metrics: Arc<PipelineMetrics>,
        rag: Option<Arc<dyn RagSource>>,
        vector_store: Arc<dyn VectorStore>,
        graph_store: Arc<dyn GraphStore>,
        embeddings: Arc<EmbeddingClient>,
    ) -> Self {
        Self {
            config,
            metrics,
            rag,
            vector_store,
            graph_store,
            embeddings,
        }
    }

    /// Run one search request across the selected sources.
    ///
    /// Fails with `InvalidInput` on an empty query and `AllSourcesFailed`
    /// when every selected source failed; any other outcome is a (possibly
    /// degraded) success with `failed_sources` populated.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchReceipt, PipelineError> {
        request.validate()?;
        let started = Instant::now();

        let want_rag = matches!(request.kind, SearchKind::Semantic | SearchKind::Hybrid);
        let want_vector = matches!(request.kind, SearchKind::Vector | SearchKind::Hybrid);
        let want_graph = matches!(request.kind, SearchKind::KnowledgeGraph | SearchKind::Hybrid);

        // Over-fetch per source; deduplication shrinks the pool.
        let per_source_limit = request.max_results.max(1) * 2;

        let rag_fut = async {
            if want_rag {
                Some(self.query_rag(request, per_source_limit).await)
            } else {
                None
            }
        };
        let vector_fut = async {
            if want_vector {
                Some(self.query_vector(request, per_source_limit).await)
            } else {
                None
            }
        };
        let graph_fut = async {
            if want_graph {
                Some(self.query_graph(request, per_source_limit).await)
            } else {
                None
            }
        };

        let (rag_result, vector_result, graph_result) =
            tokio::join!(rag_fut, vector_fut, graph_fut);

        // Per-request weight wins; the configured default applies when the
        // request leaves it unset.
        let quality_weight = request
            .quality_weight
            .or(self.config.quality_weight_default);

        let mut receipt = SearchReceipt {
            query: request.query.clone(),
            kind: request.kind,
            total_results: 0,
            results: Vec::new(),
            sources_queried: Vec::new(),
            failed_sources: Vec::new(),
            service_timings: Default::default(),
            aggregation_strategy: if quality_weight.is_some() {
                "weighted_score".to_string()
            } else {
                "score_based".to_string()
            },
            processing_time_ms: 0.0,
        };

        let mut all_results = Vec::new();
        for (source, timing_key, outcome) in [
            ("rag", "rag_search_ms", rag_result),
            ("vector", "vector_search_ms", vector_result),
            ("knowledge_graph", "knowledge_graph_ms", graph_result),
        ] {
            let Some(outcome) = outcome else { continue };
            match outcome {
                Ok((items, elapsed_ms)) => {
                    all_results.extend(items);
                    receipt.sources_queried.push(source.to_string());
                    receipt.service_timings.record(timing_key, elapsed_ms);
                    self.metrics.record_source_query(source);
                }
                Err(e) => {
                    warn!(source = source, error = %e, "search source failed");
                    receipt.failed_sources.push(source.to_string());
                }
            }
        }

        if receipt.sources_queried.is_empty() {
            return Err(PipelineError::AllSourcesFailed(receipt.failed_sources));
        }

        if let Some(pattern) = request.filters.path_pattern.as_deref() {
            all_results.retain(|item| matches_path_pattern(&item.source_path, pattern));
        }

        let ranking_started = Instant::now();
        let mut ranked = deduplicate_and_rank(all_results, request.max_results, quality_weight);
        if !request.include_context {
            for item in &mut ranked {
                item.content = None;
            }
        }
        receipt
            .service_timings
            .record("ranking_ms", ranking_started.elapsed().as_secs_f64() * 1000.0);

        receipt.total_results = ranked.len();
        receipt.results = ranked;
        receipt.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(receipt)
    }

    async fn query_rag(
        &self,
        request: &SearchRequest,
        limit: usize,
    ) -> Result<(Vec<SearchResultItem>, f64), PipelineError> {
        let Some(rag) = &self.rag else {
            return Err(PipelineError::InternalError(
                "no rag source configured".to_string(),
            ));
        };

        let started = Instant::now();
        let items = self
            .bounded(
                self.config.rag_search_timeout,
                rag.search(&request.query, limit, &request.filters),
            )
            .await?;

        let items = items
            .into_iter()
            .map(|mut item| {
                item.metadata
                    .entry("source".to_string())
                    .or_insert_with(|| json!("rag"));
                item
            })
            .collect();
        Ok((items, started.elapsed().as_secs_f64() * 1000.0))
    }

    async fn query_vector(
        &self,
        request: &SearchRequest,
        limit: usize,
    ) -> Result<(Vec<SearchResultItem>, f64), PipelineError> {
        let started = Instant::now();
        let query_vector = self.embeddings.embed(&request.query).await?;

        let filter = vector_filter_from(&request.filters);
        let hits = self
            .bounded(
                self.config.vector_search_timeout,
                self.vector_store.search(
                    &self.config.vector_collection,
                    &query_vector,
                    filter.as_ref(),
                    limit,
                ),
            )
            .await?;

        let items = hits
            .into_iter()
            .map(|hit| {
                let source_path = hit
                    .payload
                    .get("source_path")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let content = hit
                    .payload
                    .get("content")
                    .and_then(Value::as_str)
                    .map(str::to_string);

                let mut metadata: std::collections::BTreeMap<String, Value> =
                    hit.payload.into_iter().collect();
                metadata.insert("source".to_string(), json!("vector"));
                metadata.remove("content");

                SearchResultItem {
                    source_path,
                    score: f64::from(hit.score).clamp(0.0, 1.0),
                    content,
                    metadata,
                }
            })
            .collect();
        Ok((items, started.elapsed().as_secs_f64() * 1000.0))
    }

    async fn query_graph(
        &self,
        request: &SearchRequest,
        limit: usize,
    ) -> Result<(Vec<SearchResultItem>, f64), PipelineError> {
        let started = Instant::now();
        let project = request
            .filters
            .project_name
            .as_deref()
            .or(request.filters.project_id.as_deref());

        let nodes = self
            .bounded(
                self.config.graph_search_timeout,
                self.graph_store
                    .substring_search(&request.query, project, limit),
            )
            .await?;

        let needle = request.query.to_lowercase();
        let items = nodes
            .into_iter()
            .map(|node| {
                // Name matches rank above description/content matches.
                let name_match = node
                    .property_str("name")
                    .map(|name| name.to_lowercase().contains(&needle))
                    .unwrap_or(false);
                let score = if name_match { 0.9 } else { 0.7 };

                let content = node
                    .property_str("content")
                    .or_else(|| node.property_str("description"))
                    .map(str::to_string);
                let source_path = node
                    .property_str("source_path")
                    .unwrap_or("knowledge_graph")
                    .to_string();

                let mut metadata = std::collections::BTreeMap::new();
                metadata.insert("source".to_string(), json!("knowledge_graph"));
                if let Some(name) = node.property_str("name") {
                    metadata.insert("name".to_string(), json!(name));
                }
                if let Some(kind) = node.property_str("entity_type") {
                    metadata.insert("entity_type".to_string(), json!(kind));
                }
                if let Some(quality) = node.properties.get("quality_score") {
                    metadata.insert("quality_score".to_string(), quality.clone());
                }

                SearchResultItem {
                    source_path,
                    score,
                    content,
                    metadata,
                }
            })
            .collect();
        Ok((items, started.elapsed().as_secs_f64() * 1000.0))
    }

    async fn bounded<T, Fut>(&self, budget: Duration, fut: Fut) -> Result<T, PipelineError>
    where
        Fut: std::future::Future<Output = Result<T, PipelineError>>,
    {
        match timeout(budget, fut).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::InternalError(format!(
                "search source timed out after {budget:?}"
            ))),
        }
    }
}

fn vector_filter_from(filters: &SearchFilters) -> Option<VectorFilter> {
    let mut must = Vec::new();
    if let Some(project_id) = &filters.project_id {
        must.push(FilterCondition::Exact {
            key: "project_id".to_string(),
            value: json!(project_id),
        });
    }
    if let Some(project_name) = &filters.project_name {
        must.push(FilterCondition::Exact {
            key: "project_name".to_string(),
            value: json!(project_name),
        });
    }
    if let Some(language) = &filters.language {
        must.push(FilterCondition::Exact {
            key: "language".to_string(),
            value: json!(language),
        });
    }
    if let Some(entity_type) = &filters.entity_type {
        must.push(FilterCondition::Exact {
            key: "entity_type".to_string(),
            value: json!(entity_type),
        });
    }
    if filters.min_quality.is_some() || filters.max_quality.is_some() {
        must.push(FilterCondition::Range {
            key: "quality_score".to_string(),
            min: filters.min_quality,
            max: filters.max_quality,
        });
    }

    if must.is_empty() {
        None
    } else {
        Some(VectorFilter { must })
    }
}
