// Graph Index Writer
// Upserts entities and relationships into the property graph and keeps the
// containment tree consistent for every indexed file. The operation order is
// fixed: entities, then the file node, then relationships, then the
// entity-to-file containment links. Every placeholder node created for a
// missing relationship endpoint carries `project_name`; omitting it leaves
// nodes unreachable from their project root.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::contracts::{GraphStore, NodeKey, NodeLabel};
use crate::directory_tree::DirectoryTreeIngestor;
use crate::errors::PipelineError;
use crate::models::{Entity, Relationship};
use crate::types::{ProjectName, RelationKind, SourcePath};

const STEP_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Result of one graph write.
#[derive(Debug, Clone, Default)]
pub struct GraphWriteOutcome {
    pub entity_ids: Vec<String>,
    pub relationships_created: usize,
    /// Non-fatal anomalies from steps 2-4.
    pub warnings: Vec<String>,
}

/// Writes one document's extraction results into the graph.
pub struct GraphIndexWriter {
    store: Arc<dyn GraphStore>,
    tree: DirectoryTreeIngestor,
    op_timeout: Duration,
}

impl GraphIndexWriter {
    pub fn new(store: Arc<dyn GraphStore>, op_timeout: Duration) -> Self {
        let tree = DirectoryTreeIngestor::new(store.clone());
        Self {
            store,
            tree,
            op_timeout,
        }
    }

    /// Index entities and relationships for one document.
    ///
    /// Step 1 (entity upsert) is critical: a persistent failure aborts the
    /// call. Steps 2-4 (file node, relationships, containment links) degrade
    /// to warnings. Each step gets one retry with a short fixed backoff.
    /// Re-ingesting the same document yields the same graph state apart from
    /// timestamp properties.
    pub async fn index_document(
        &self,
        entities: &[Entity],
        relationships: &[Relationship],
        source_path: &SourcePath,
        project: &ProjectName,
    ) -> Result<GraphWriteOutcome, PipelineError> {
        let mut outcome = GraphWriteOutcome::default();

        // Step 1: entity nodes, merged by stable id.
        self.retry_once("entity upsert", || self.upsert_entities(entities, project))
            .await?;
        outcome.entity_ids = entities.iter().map(|e| e.entity_id.clone()).collect();

        // Step 2: file node plus its containment ancestry.
        if let Err(e) = self
            .retry_once("file node upsert", || {
                self.upsert_file_node(source_path, project, entities.len())
            })
            .await
        {
            let message = format!("file node upsert failed for {source_path}: {e}");
            warn!("{message}");
            outcome.warnings.push(message);
        }

        // Step 3: relationships, with project-scoped placeholders for
        // endpoints that do not exist yet.
        match self
            .retry_once("relationship upsert", || {
                self.upsert_relationships(relationships, project)
            })
            .await
        {
            Ok(created) => outcome.relationships_created = created,
            Err(e) => {
                let message = format!("relationship upsert failed for {source_path}: {e}");
                warn!("{message}");
                outcome.warnings.push(message);
            }
        }

        // Step 4: link every entity to its file node.
        if let Err(e) = self
            .retry_once("entity containment", || {
                self.link_entities_to_file(entities, source_path, project)
            })
            .await
        {
            let message = format!("entity containment links failed for {source_path}: {e}");
            warn!("{message}");
            outcome.warnings.push(message);
        }

        Ok(outcome)
    }

    async fn retry_once<T, F, Fut>(&self, step: &str, mut op: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        match self.bounded(op()).await {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!(step = step, error = %first, "graph step failed, retrying once");
                let jitter = Duration::from_millis(rand::random::<u64>() % 50);
                tokio::time::sleep(STEP_RETRY_BACKOFF + jitter).await;
                self.bounded(op()).await
            }
        }
    }

    async fn bounded<T, Fut>(&self, fut: Fut) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        match timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::GraphStoreUnavailable(format!(
                "graph operation timed out after {:?}",
                self.op_timeout
            ))),
        }
    }

    async fn upsert_entities(
        &self,
        entities: &[Entity],
        project: &ProjectName,
    ) -> Result<(), PipelineError> {
        for entity in entities {
            let key = NodeKey::entity(&entity.entity_id);
            self.store
                .upsert_node(&key, NodeLabel::Entity, entity_properties(entity, project))
                .await?;
        }
        Ok(())
    }

    async fn upsert_file_node(
        &self,
        source_path: &SourcePath,
        project: &ProjectName,
        entity_count: usize,
    ) -> Result<(), PipelineError> {
        self.tree
            .ingest(project.as_str(), std::slice::from_ref(source_path))
            .await?;

        // Enrich the tree-created node with document-level counters.
        let file_key = NodeKey::file(project.as_str(), source_path.as_str());
        let mut properties = Map::new();
        properties.insert("entity_count".to_string(), json!(entity_count));
        properties.insert("indexed_at".to_string(), json!(Utc::now().to_rfc3339()));
        self.store
            .upsert_node(&file_key, NodeLabel::File, properties)
            .await
    }

    async fn upsert_relationships(
        &self,
        relationships: &[Relationship],
        project: &ProjectName,
    ) -> Result<usize, PipelineError> {
        let mut created = 0;
        for relationship in relationships {
            let source = NodeKey::entity(&relationship.source_entity_id);
            let target = NodeKey::entity(&relationship.target_entity_id);

            self.ensure_endpoint(&source, project).await?;
            self.ensure_endpoint(&target, project).await?;

            let mut properties = relationship_properties(relationship);
            properties.insert("project_name".to_string(), json!(project.as_str()));
            self.store
                .upsert_edge(&source, &target, relationship.kind, properties)
                .await?;
            created += 1;
        }
        Ok(created)
    }

    /// Create a minimal placeholder for a relationship endpoint that does
    /// not exist yet. The placeholder always carries `project_name`; a later
    /// full write merges onto it without losing that property.
    async fn ensure_endpoint(
        &self,
        key: &NodeKey,
        project: &ProjectName,
    ) -> Result<(), PipelineError> {
        if self.store.node_exists(key).await? {
            return Ok(());
        }
        let mut properties = Map::new();
        properties.insert("project_name".to_string(), json!(project.as_str()));
        properties.insert("placeholder".to_string(), json!(true));
        self.store
            .upsert_node(key, NodeLabel::Entity, properties)
            .await
    }

    async fn link_entities_to_file(
        &self,
        entities: &[Entity],
        source_path: &SourcePath,
        project: &ProjectName,
    ) -> Result<(), PipelineError> {
        let file_key = NodeKey::file(project.as_str(), source_path.as_str());
        if !self.store.node_exists(&file_key).await? {
            // Step 2 failed persistently; containment links have nowhere to
            // attach.
            return Err(PipelineError::GraphStoreUnavailable(format!(
                "file node missing for {source_path}"
            )));
        }

        for entity in entities {
            let entity_key = NodeKey::entity(&entity.entity_id);
            self.store
                .upsert_edge(
                    &file_key,
                    &entity_key,
                    RelationKind::ContainsEntity,
                    Map::new(),
                )
                .await?;
        }
        Ok(())
    }
}

fn entity_properties(entity: &Entity, project: &ProjectName) -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert("name".to_string(), json!(entity.name));
    properties.insert("entity_type".to_string(), json!(entity.kind.as_str()));
    properties.insert("description".to_string(), json!(entity.description));
    properties.insert("source_path".to_string(), json!(entity.source_path));
    properties.insert("confidence".to_string(), json!(entity.confidence.get()));
    properties.insert("project_name".to_string(), json!(project.as_str()));
    properties.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
    if let Some(line) = entity.source_line {
        properties.insert("source_line".to_string(), json!(line));
    }
    for (name, value) in &entity.properties {
        properties.insert(name.clone(), value.clone());
    }
    properties
}

fn relationship_properties(relationship: &Relationship) -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "relationship_id".to_string(),
        json!(relationship.relationship_id),
    );
    properties.insert(
        "confidence".to_string(),
        json!(relationship.confidence.get()),
    );
    for (name, value) in &relationship.properties {
        properties.insert(name.clone(), value.clone());
    }
    properties
}
