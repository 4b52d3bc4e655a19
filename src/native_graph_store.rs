// Native Graph Store
// In-process reference implementation of the graph store contract. Nodes are
// keyed records with merge-on-upsert property maps; adjacency lives in a
// petgraph DiGraph so traversal queries (containment reachability, subtree
// counts) reuse standard graph algorithms.

use parking_lot::RwLock;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeFiltered, EdgeRef};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::contracts::{GraphStore, NodeKey, NodeLabel, NodeRecord};
use crate::errors::PipelineError;
use crate::types::RelationKind;

#[derive(Debug, Clone)]
struct NodeData {
    key: NodeKey,
    label: NodeLabel,
    properties: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct EdgeData {
    kind: RelationKind,
    properties: Map<String, Value>,
}

#[derive(Default)]
struct GraphInner {
    graph: DiGraph<NodeData, EdgeData>,
    index: HashMap<NodeKey, NodeIndex>,
}

/// Reference property-graph backend.
#[derive(Default)]
pub struct NativeGraphStore {
    inner: RwLock<GraphInner>,
}

impl NativeGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().graph.edge_count()
    }

    /// All nodes with the given label. Test and diagnostics helper.
    pub fn nodes_with_label(&self, label: NodeLabel) -> Vec<NodeRecord> {
        let inner = self.inner.read();
        inner
            .graph
            .node_weights()
            .filter(|data| data.label == label)
            .map(|data| NodeRecord {
                key: data.key.clone(),
                label: data.label,
                properties: data.properties.clone(),
            })
            .collect()
    }

    /// Nodes on a containment path from the project node to `target`,
    /// following only `contains` edges. `None` when the target is not
    /// reachable from the project root.
    pub fn containment_path(&self, project_name: &str, target: &NodeKey) -> Option<Vec<NodeRecord>> {
        let inner = self.inner.read();
        let start = *inner.index.get(&NodeKey::project(project_name))?;
        let goal = *inner.index.get(target)?;

        let filtered = EdgeFiltered::from_fn(&inner.graph, |edge| {
            edge.weight().kind == RelationKind::Contains
        });
        let (_, path) = petgraph::algo::astar(
            &filtered,
            start,
            |node| node == goal,
            |_| 1usize,
            |_| 0usize,
        )?;

        Some(
            path.into_iter()
                .map(|idx| {
                    let data = &inner.graph[idx];
                    NodeRecord {
                        key: data.key.clone(),
                        label: data.label,
                        properties: data.properties.clone(),
                    }
                })
                .collect(),
        )
    }

    /// Count of file nodes reachable from the project node via `contains`
    /// edges. Mirrors the graph query
    /// `match (p:Project)-[:contains*]->(f:File) return count(f)`.
    pub fn contained_file_count(&self, project_name: &str) -> usize {
        let inner = self.inner.read();
        let Some(&start) = inner.index.get(&NodeKey::project(project_name)) else {
            return 0;
        };

        let filtered = EdgeFiltered::from_fn(&inner.graph, |edge| {
            edge.weight().kind == RelationKind::Contains
        });
        let mut bfs = Bfs::new(&filtered, start);
        let mut count = 0;
        while let Some(node) = bfs.next(&filtered) {
            if inner.graph[node].label == NodeLabel::File {
                count += 1;
            }
        }
        count
    }
}

#[async_trait::async_trait]
impl GraphStore for NativeGraphStore {
    async fn upsert_node(
        &self,
        key: &NodeKey,
        label: NodeLabel,
        properties: Map<String, Value>,
    ) -> Result<(), PipelineError> {
        let mut inner = self.inner.write();
        match inner.index.get(key).copied() {
            Some(idx) => {
                // Merge by key: incoming properties overwrite, omitted
                // properties survive.
                let data = &mut inner.graph[idx];
                data.label = label;
                for (name, value) in properties {
                    data.properties.insert(name, value);
                }
            }
            None => {
                let idx = inner.graph.add_node(NodeData {
                    key: key.clone(),
                    label,
                    properties,
                });
                inner.index.insert(key.clone(), idx);
            }
        }
        Ok(())
    }

    async fn upsert_edge(
        &self,
        from: &NodeKey,
        to: &NodeKey,
        kind: RelationKind,
        properties: Map<String, Value>,
    ) -> Result<(), PipelineError> {
        let mut inner = self.inner.write();
        let from_idx = *inner.index.get(from).ok_or_else(|| {
            PipelineError::InternalError(format!("edge source {from} does not exist"))
        })?;
        let to_idx = *inner
            .index
            .get(to)
            .ok_or_else(|| PipelineError::InternalError(format!("edge target {to} does not exist")))?;

        let existing = inner
            .graph
            .edges_connecting(from_idx, to_idx)
            .find(|edge| edge.weight().kind == kind)
            .map(|edge| edge.id());

        match existing {
            Some(edge_id) => {
                let data = &mut inner.graph[edge_id];
                for (name, value) in properties {
                    data.properties.insert(name, value);
                }
            }
            None => {
                inner
                    .graph
                    .add_edge(from_idx, to_idx, EdgeData { kind, properties });
            }
        }
        Ok(())
    }

    async fn get_node(&self, key: &NodeKey) -> Result<Option<NodeRecord>, PipelineError> {
        let inner = self.inner.read();
        Ok(inner.index.get(key).map(|&idx| {
            let data = &inner.graph[idx];
            NodeRecord {
                key: data.key.clone(),
                label: data.label,
                properties: data.properties.clone(),
            }
        }))
    }

    async fn node_exists(&self, key: &NodeKey) -> Result<bool, PipelineError> {
        Ok(self.inner.read().index.contains_key(key))
    }

    async fn substring_search(
        &self,
        query: &str,
        project_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<NodeRecord>, PipelineError> {
        let needle = query.to_lowercase();
        let inner = self.inner.read();

        let mut matches = Vec::new();
        for data in inner.graph.node_weights() {
            if let Some(project) = project_name {
                if data.properties.get("project_name").and_then(Value::as_str) != Some(project) {
                    continue;
                }
            }

            let hit = ["name", "description", "content"].iter().any(|field| {
                data.properties
                    .get(*field)
                    .and_then(Value::as_str)
                    .map(|text| text.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            });

            if hit {
                matches.push(NodeRecord {
                    key: data.key.clone(),
                    label: data.label,
                    properties: data.properties.clone(),
                });
                if matches.len() >= limit {
                    break;
                }
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_upsert_node_merges_properties() {
        let store = NativeGraphStore::new();
        let key = NodeKey::entity("entity-1");

        store
            .upsert_node(
                &key,
                NodeLabel::Entity,
                props(&[("name", json!("f")), ("confidence", json!(0.8))]),
            )
            .await
            .unwrap();
        store
            .upsert_node(
                &key,
                NodeLabel::Entity,
                props(&[("description", json!("a function"))]),
            )
            .await
            .unwrap();

        let node = store.get_node(&key).await.unwrap().unwrap();
        // Omitted properties are never deleted by a later write.
        assert_eq!(node.properties["name"], json!("f"));
        assert_eq!(node.properties["confidence"], json!(0.8));
        assert_eq!(node.properties["description"], json!("a function"));
        assert_eq!(store.node_count(), 1);
    }

    #[tokio::test]
    async fn test_upsert_edge_requires_endpoints() {
        let store = NativeGraphStore::new();
        let a = NodeKey::entity("a");
        let b = NodeKey::entity("b");

        store
            .upsert_node(&a, NodeLabel::Entity, Map::new())
            .await
            .unwrap();
        let err = store
            .upsert_edge(&a, &b, RelationKind::Calls, Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InternalError(_)));

        store
            .upsert_node(&b, NodeLabel::Entity, Map::new())
            .await
            .unwrap();
        store
            .upsert_edge(&a, &b, RelationKind::Calls, Map::new())
            .await
            .unwrap();
        assert_eq!(store.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_edge_upsert_is_idempotent_per_kind() {
        let store = NativeGraphStore::new();
        let a = NodeKey::entity("a");
        let b = NodeKey::entity("b");
        store
            .upsert_node(&a, NodeLabel::Entity, Map::new())
            .await
            .unwrap();
        store
            .upsert_node(&b, NodeLabel::Entity, Map::new())
            .await
            .unwrap();

        store
            .upsert_edge(&a, &b, RelationKind::Calls, Map::new())
            .await
            .unwrap();
        store
            .upsert_edge(&a, &b, RelationKind::Calls, Map::new())
            .await
            .unwrap();
        store
            .upsert_edge(&a, &b, RelationKind::Imports, Map::new())
            .await
            .unwrap();

        assert_eq!(store.edge_count(), 2);
    }

    #[tokio::test]
    async fn test_containment_traversal() {
        let store = NativeGraphStore::new();
        let project = NodeKey::project("svc");
        let dir = NodeKey::directory("svc", "src");
        let file = NodeKey::file("svc", "src/a.py");

        for (key, label) in [
            (&project, NodeLabel::Project),
            (&dir, NodeLabel::Directory),
            (&file, NodeLabel::File),
        ] {
            store
                .upsert_node(key, label, props(&[("project_name", json!("svc"))]))
                .await
                .unwrap();
        }
        store
            .upsert_edge(&project, &dir, RelationKind::Contains, Map::new())
            .await
            .unwrap();
        store
            .upsert_edge(&dir, &file, RelationKind::Contains, Map::new())
            .await
            .unwrap();

        let path = store.containment_path("svc", &file).expect("file reachable");
        assert_eq!(path.len(), 3);
        assert_eq!(path[0].label, NodeLabel::Project);
        assert_eq!(path[2].label, NodeLabel::File);
        assert_eq!(store.contained_file_count("svc"), 1);
    }

    #[tokio::test]
    async fn test_containment_ignores_non_contains_edges() {
        let store = NativeGraphStore::new();
        let project = NodeKey::project("svc");
        let file = NodeKey::file("svc", "a.py");

        store
            .upsert_node(&project, NodeLabel::Project, Map::new())
            .await
            .unwrap();
        store
            .upsert_node(&file, NodeLabel::File, Map::new())
            .await
            .unwrap();
        store
            .upsert_edge(&project, &file, RelationKind::References, Map::new())
            .await
            .unwrap();

        assert!(store.containment_path("svc", &file).is_none());
        assert_eq!(store.contained_file_count("svc"), 0);
    }

    #[tokio::test]
    async fn test_substring_search_scoped_to_project() {
        let store = NativeGraphStore::new();
        store
            .upsert_node(
                &NodeKey::entity("e1"),
                NodeLabel::Entity,
                props(&[
                    ("name", json!("cache_evict")),
                    ("project_name", json!("svc")),
                ]),
            )
            .await
            .unwrap();
        store
            .upsert_node(
                &NodeKey::entity("e2"),
                NodeLabel::Entity,
                props(&[
                    ("name", json!("cache_warm")),
                    ("project_name", json!("other")),
                ]),
            )
            .await
            .unwrap();

        let hits = store.substring_search("CACHE", Some("svc"), 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].property_str("name"), Some("cache_evict"));

        let all = store.substring_search("cache", None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
