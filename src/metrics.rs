// Pipeline Metrics
// Shared counters incremented atomically across request tasks. One instance
// lives in the runtime; tests construct their own so assertions never see
// another test's traffic.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for the indexing and search pipelines.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    events_handled: AtomicU64,
    events_failed: AtomicU64,
    indexing_successes: AtomicU64,
    indexing_failures: AtomicU64,
    cache_hits: AtomicU64,
    searches_completed: AtomicU64,
    searches_failed: AtomicU64,
    total_processing_micros: AtomicU64,

    stamping_failures: AtomicU64,
    extraction_failures: AtomicU64,
    quality_failures: AtomicU64,
    vector_failures: AtomicU64,
    graph_failures: AtomicU64,

    rag_queries: AtomicU64,
    vector_queries: AtomicU64,
    graph_queries: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event_handled(&self, processing_ms: f64) {
        self.events_handled.fetch_add(1, Ordering::Relaxed);
        self.total_processing_micros
            .fetch_add((processing_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn record_event_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_indexing_success(&self) {
        self.indexing_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_indexing_failure(&self) {
        self.indexing_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_search_completed(&self) {
        self.searches_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_search_failed(&self) {
        self.searches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_query(&self, source: &str) {
        match source {
            "rag" => self.rag_queries.fetch_add(1, Ordering::Relaxed),
            "vector" => self.vector_queries.fetch_add(1, Ordering::Relaxed),
            "knowledge_graph" => self.graph_queries.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    /// Increment the failure counter for a named collaborator service.
    pub fn record_service_failure(&self, service: &str) {
        match service {
            "metadata_stamping" => self.stamping_failures.fetch_add(1, Ordering::Relaxed),
            "entity_extraction" => self.extraction_failures.fetch_add(1, Ordering::Relaxed),
            "quality_assessment" => self.quality_failures.fetch_add(1, Ordering::Relaxed),
            "vector_indexing" | "embedding" => self.vector_failures.fetch_add(1, Ordering::Relaxed),
            "knowledge_graph" => self.graph_failures.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    pub fn events_handled(&self) -> u64 {
        self.events_handled.load(Ordering::Relaxed)
    }

    pub fn events_failed(&self) -> u64 {
        self.events_failed.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn service_failures(&self, service: &str) -> u64 {
        match service {
            "metadata_stamping" => self.stamping_failures.load(Ordering::Relaxed),
            "entity_extraction" => self.extraction_failures.load(Ordering::Relaxed),
            "quality_assessment" => self.quality_failures.load(Ordering::Relaxed),
            "vector_indexing" | "embedding" => self.vector_failures.load(Ordering::Relaxed),
            "knowledge_graph" => self.graph_failures.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// Point-in-time snapshot with the derived rates the handlers report.
    pub fn snapshot(&self) -> serde_json::Value {
        let handled = self.events_handled.load(Ordering::Relaxed);
        let failed = self.events_failed.load(Ordering::Relaxed);
        let total = handled + failed;
        let success_rate = if total > 0 {
            handled as f64 / total as f64
        } else {
            1.0
        };
        let avg_processing_ms = if handled > 0 {
            self.total_processing_micros.load(Ordering::Relaxed) as f64 / 1000.0 / handled as f64
        } else {
            0.0
        };
        let cache_hit_rate = if handled > 0 {
            self.cache_hits.load(Ordering::Relaxed) as f64 / handled as f64
        } else {
            0.0
        };

        serde_json::json!({
            "events_handled": handled,
            "events_failed": failed,
            "indexing_successes": self.indexing_successes.load(Ordering::Relaxed),
            "indexing_failures": self.indexing_failures.load(Ordering::Relaxed),
            "cache_hits": self.cache_hits.load(Ordering::Relaxed),
            "searches_completed": self.searches_completed.load(Ordering::Relaxed),
            "searches_failed": self.searches_failed.load(Ordering::Relaxed),
            "success_rate": success_rate,
            "avg_processing_time_ms": avg_processing_ms,
            "cache_hit_rate": cache_hit_rate,
            "service_failures": {
                "metadata_stamping": self.stamping_failures.load(Ordering::Relaxed),
                "entity_extraction": self.extraction_failures.load(Ordering::Relaxed),
                "quality_assessment": self.quality_failures.load(Ordering::Relaxed),
                "vector_indexing": self.vector_failures.load(Ordering::Relaxed),
                "knowledge_graph": self.graph_failures.load(Ordering::Relaxed),
            },
            "source_queries": {
                "rag": self.rag_queries.load(Ordering::Relaxed),
                "vector": self.vector_queries.load(Ordering::Relaxed),
                "knowledge_graph": self.graph_queries.load(Ordering::Relaxed),
            },
            "timestamp": Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_rates() {
        let metrics = PipelineMetrics::new();
        metrics.record_event_handled(10.0);
        metrics.record_event_handled(30.0);
        metrics.record_event_failed();
        metrics.record_cache_hit();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["events_handled"], 2);
        assert_eq!(snapshot["events_failed"], 1);
        let success_rate = snapshot["success_rate"].as_f64().unwrap();
        assert!((success_rate - 2.0 / 3.0).abs() < 1e-9);
        let avg = snapshot["avg_processing_time_ms"].as_f64().unwrap();
        assert!((avg - 20.0).abs() < 0.01);
        assert_eq!(snapshot["cache_hit_rate"].as_f64().unwrap(), 0.5);
    }

    #[test]
    fn test_service_failure_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_service_failure("entity_extraction");
        metrics.record_service_failure("entity_extraction");
        metrics.record_service_failure("knowledge_graph");
        metrics.record_service_failure("unknown_service");

        assert_eq!(metrics.service_failures("entity_extraction"), 2);
        assert_eq!(metrics.service_failures("knowledge_graph"), 1);
        assert_eq!(metrics.service_failures("quality_assessment"), 0);
    }

    #[test]
    fn test_empty_metrics_snapshot() {
        let snapshot = PipelineMetrics::new().snapshot();
        assert_eq!(snapshot["success_rate"].as_f64().unwrap(), 1.0);
        assert_eq!(snapshot["avg_processing_time_ms"].as_f64().unwrap(), 0.0);
    }
}
