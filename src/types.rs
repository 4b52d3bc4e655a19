// Validated Types
// Strongly-typed wrappers that enforce pipeline invariants at construction.
// These types cannot be built from invalid data, so downstream code never
// re-checks them.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::PipelineError;

/// Tenancy scope for every node, vector payload, and search filter.
///
/// # Invariants
/// - Non-empty after trimming whitespace
/// - Construction from an empty name is the `InvalidProject` error, raised
///   before any store write can happen
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectName {
    inner: String,
}

impl ProjectName {
    pub fn new(name: impl Into<String>) -> Result<Self, PipelineError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::InvalidProject(
                "project name must be non-empty after trimming".to_string(),
            ));
        }
        Ok(Self {
            inner: trimmed.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document path within a project.
///
/// # Invariants
/// - Non-empty after trimming
/// - No NUL bytes, no parent-directory traversal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourcePath {
    inner: String,
}

impl SourcePath {
    pub fn new(path: impl Into<String>) -> Result<Self, PipelineError> {
        let path = path.into();
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::InvalidInput(
                "source path must be non-empty".to_string(),
            ));
        }
        if trimmed.contains('\0') {
            return Err(PipelineError::InvalidInput(
                "source path contains NUL byte".to_string(),
            ));
        }
        if trimmed.split('/').any(|segment| segment == "..") {
            return Err(PipelineError::InvalidInput(format!(
                "source path must not traverse parent directories: {trimmed}"
            )));
        }
        Ok(Self {
            inner: trimmed.trim_start_matches("./").to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Final path component (the file name).
    pub fn file_name(&self) -> &str {
        self.inner.rsplit('/').next().unwrap_or(&self.inner)
    }

    /// Ancestor directories from root to the immediate parent, as
    /// project-relative paths. `"a/b/c.py"` yields `["a", "a/b"]`.
    pub fn ancestor_directories(&self) -> Vec<String> {
        let mut ancestors = Vec::new();
        let segments: Vec<&str> = self.inner.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 2 {
            return ancestors;
        }
        let mut prefix = String::new();
        for segment in &segments[..segments.len() - 1] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            ancestors.push(prefix.clone());
        }
        ancestors
    }
}

impl fmt::Display for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally assigned request identifier carried through every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId {
    inner: Uuid,
}

impl CorrelationId {
    pub fn new() -> Self {
        Self {
            inner: Uuid::new_v4(),
        }
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self { inner: id }
    }

    pub fn parse(s: &str) -> Result<Self, PipelineError> {
        let uuid = Uuid::parse_str(s)
            .map_err(|e| PipelineError::InvalidInput(format!("invalid correlation id: {e}")))?;
        Ok(Self { inner: uuid })
    }

    pub fn as_uuid(&self) -> Uuid {
        self.inner
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// Score clamped to `[0.0, 1.0]`. Clamping never fails; out-of-range inputs
/// from external extractors are folded into the valid range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence {
    inner: f64,
}

impl Confidence {
    pub fn clamped(value: f64) -> Self {
        let value = if value.is_nan() { 0.0 } else { value };
        Self {
            inner: value.clamp(0.0, 1.0),
        }
    }

    pub fn get(&self) -> f64 {
        self.inner
    }
}

/// Closed set of entity kinds stored in the knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Function,
    Method,
    Class,
    Module,
    Variable,
    Constant,
    ApiEndpoint,
    ConfigSetting,
    Concept,
    Document,
    Pattern,
    Service,
    Keyword,
    CodeExample,
    Source,
    Page,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Function => "function",
            EntityKind::Method => "method",
            EntityKind::Class => "class",
            EntityKind::Module => "module",
            EntityKind::Variable => "variable",
            EntityKind::Constant => "constant",
            EntityKind::ApiEndpoint => "api_endpoint",
            EntityKind::ConfigSetting => "config_setting",
            EntityKind::Concept => "concept",
            EntityKind::Document => "document",
            EntityKind::Pattern => "pattern",
            EntityKind::Service => "service",
            EntityKind::Keyword => "keyword",
            EntityKind::CodeExample => "code_example",
            EntityKind::Source => "source",
            EntityKind::Page => "page",
        }
    }

    /// Case-insensitive parse against the closed set. Returns `None` for
    /// unknown kinds; callers default to `Concept` and record a warning.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        let kind = match normalized.as_str() {
            "FUNCTION" => EntityKind::Function,
            "METHOD" => EntityKind::Method,
            "CLASS" | "STRUCT" | "TRAIT" | "INTERFACE" => EntityKind::Class,
            "MODULE" => EntityKind::Module,
            "VARIABLE" => EntityKind::Variable,
            "CONSTANT" => EntityKind::Constant,
            "API_ENDPOINT" => EntityKind::ApiEndpoint,
            "CONFIG_SETTING" => EntityKind::ConfigSetting,
            "CONCEPT" => EntityKind::Concept,
            "DOCUMENT" => EntityKind::Document,
            "PATTERN" => EntityKind::Pattern,
            "SERVICE" => EntityKind::Service,
            "KEYWORD" => EntityKind::Keyword,
            "CODE_EXAMPLE" => EntityKind::CodeExample,
            "SOURCE" => EntityKind::Source,
            "PAGE" => EntityKind::Page,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of relationship kinds, including the containment edges the
/// directory tree relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Calls,
    Imports,
    Contains,
    ContainsEntity,
    RelatesTo,
    DependsOn,
    References,
    Extends,
    Implements,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Calls => "calls",
            RelationKind::Imports => "imports",
            RelationKind::Contains => "contains",
            RelationKind::ContainsEntity => "contains_entity",
            RelationKind::RelatesTo => "relates_to",
            RelationKind::DependsOn => "depends_on",
            RelationKind::References => "references",
            RelationKind::Extends => "extends",
            RelationKind::Implements => "implements",
        }
    }

    /// Case-insensitive parse; `None` for unknown kinds, which callers
    /// default to `RelatesTo`.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        let kind = match normalized.as_str() {
            "CALLS" => RelationKind::Calls,
            "IMPORTS" => RelationKind::Imports,
            "CONTAINS" => RelationKind::Contains,
            "CONTAINS_ENTITY" => RelationKind::ContainsEntity,
            "RELATES_TO" => RelationKind::RelatesTo,
            "DEPENDS_ON" => RelationKind::DependsOn,
            "REFERENCES" => RelationKind::References,
            "EXTENDS" => RelationKind::Extends,
            "IMPLEMENTS" => RelationKind::Implements,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
