// Native Vector Store
// In-process reference implementation of the vector store contract: exact
// cosine scoring over every point, with the same exact/range/any-of payload
// filters a real store evaluates natively. Used by tests and the in-memory
// runtime.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::contracts::{ScoredPoint, VectorFilter, VectorPoint, VectorStore};
use crate::errors::PipelineError;

#[derive(Debug, Default)]
pub struct NativeVectorStore {
    collections: RwLock<HashMap<String, HashMap<String, VectorPoint>>>,
}

impl NativeVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub fn get_point(&self, collection: &str, id: &str) -> Option<VectorPoint> {
        self.collections
            .read()
            .get(collection)
            .and_then(|points| points.get(id))
            .cloned()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}

#[async_trait::async_trait]
impl VectorStore for NativeVectorStore {
    async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<(), PipelineError> {
        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();

        for point in points {
            if let Some(existing) = stored.values().next() {
                if existing.vector.len() != point.vector.len() {
                    return Err(PipelineError::InternalError(format!(
                        "vector dimension mismatch: collection has {}, point {} has {}",
                        existing.vector.len(),
                        point.id,
                        point.vector.len()
                    )));
                }
            }
            stored.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&VectorFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, PipelineError> {
        let collections = self.collections.read();
        let Some(points) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<ScoredPoint> = points
            .values()
            .filter(|point| filter.map_or(true, |f| f.matches(&point.payload)))
            .map(|point| ScoredPoint {
                id: point.id.clone(),
                score: Self::cosine_similarity(vector, &point.vector).max(0.0),
                payload: point.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}
