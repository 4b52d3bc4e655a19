// Directory Tree Ingestor
// Maintains the project -> directory -> file containment tree in the
// property graph. Every node it writes carries `project_name`; a file node
// without that property is a bug, not a valid state, because such nodes are
// unreachable from their project root.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::contracts::{GraphStore, NodeKey, NodeLabel};
use crate::errors::PipelineError;
use crate::types::{ProjectName, RelationKind, SourcePath};

/// Counts reported by one tree ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeIngestOutcome {
    pub directories_upserted: usize,
    pub files_linked: usize,
}

/// Builds and maintains the containment tree.
pub struct DirectoryTreeIngestor {
    store: Arc<dyn GraphStore>,
}

impl DirectoryTreeIngestor {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Ensure the containment tree covers every file in `files`.
    ///
    /// # Preconditions
    /// - `project_name` must be non-empty after trimming; otherwise the call
    ///   fails with `InvalidProject` before any write.
    ///
    /// # Postconditions
    /// - The project node exists with its `project_name` property.
    /// - Every ancestor directory of every file exists, carries
    ///   `project_name`, and is connected to its parent via `contains`.
    /// - Every file node is connected to its deepest directory parent (or
    ///   the project node for root-level files).
    /// - Re-running with the same inputs changes nothing.
    pub async fn ingest(
        &self,
        project_name: &str,
        files: &[SourcePath],
    ) -> Result<TreeIngestOutcome, PipelineError> {
        // Validated before any write; a silent default here would recreate
        // orphaned file nodes that no project traversal can reach.
        let project = ProjectName::new(project_name)?;
        let project_key = NodeKey::project(project.as_str());

        self.store
            .upsert_node(
                &project_key,
                NodeLabel::Project,
                node_properties(&project, project.as_str(), project.as_str()),
            )
            .await?;

        // Collect every distinct ancestor directory across the batch, keyed
        // by path so parents sort before children.
        let mut directories: BTreeMap<String, ()> = BTreeMap::new();
        for file in files {
            for ancestor in file.ancestor_directories() {
                directories.insert(ancestor, ());
            }
        }

        let mut outcome = TreeIngestOutcome::default();

        for path in directories.keys() {
            let dir_key = NodeKey::directory(project.as_str(), path);
            let name = path.rsplit('/').next().unwrap_or(path);
            self.store
                .upsert_node(
                    &dir_key,
                    NodeLabel::Directory,
                    node_properties(&project, path, name),
                )
                .await?;

            let parent_key = match path.rsplit_once('/') {
                Some((parent, _)) => NodeKey::directory(project.as_str(), parent),
                None => project_key.clone(),
            };
            self.store
                .upsert_edge(&parent_key, &dir_key, RelationKind::Contains, Map::new())
                .await?;
            outcome.directories_upserted += 1;
        }

        for file in files {
            let file_key = NodeKey::file(project.as_str(), file.as_str());
            self.store
                .upsert_node(
                    &file_key,
                    NodeLabel::File,
                    node_properties(&project, file.as_str(), file.file_name()),
                )
                .await?;

            let parent_key = match file.ancestor_directories().last() {
                Some(parent) => NodeKey::directory(project.as_str(), parent),
                None => project_key.clone(),
            };
            self.store
                .upsert_edge(&parent_key, &file_key, RelationKind::Contains, Map::new())
                .await?;
            outcome.files_linked += 1;
        }

        Ok(outcome)
    }
}

fn node_properties(project: &ProjectName, path: &str, name: &str) -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert("project_name".to_string(), json!(project.as_str()));
    properties.insert("path".to_string(), json!(path));
    properties.insert("name".to_string(), json!(name));
    properties
}
