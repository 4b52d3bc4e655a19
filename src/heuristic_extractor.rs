// Heuristic Extractor
// Built-in language-aware extraction used when no external extractor is
// configured. Pattern-based: functions, classes, and imports for code;
// headings-as-concepts for Markdown. Deliberately shallow next to a real
// extraction service, but enough to drive the full pipeline offline.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::contracts::{
    EntityExtractor, ExtractionOptions, ExtractionOutcome, RawEntity, RawRelationship,
};
use crate::errors::PipelineError;

static PYTHON_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\s*)def\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());
static PYTHON_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*class\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());
static PYTHON_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:from\s+([A-Za-z_][\w.]*)\s+import|import\s+([A-Za-z_][\w.]*))").unwrap()
});

static RUST_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:pub\s+)?(?:async\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());
static RUST_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:pub\s+)?(?:struct|enum|trait)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});
static RUST_USE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*use\s+([A-Za-z_][A-Za-z0-9_:]*)").unwrap());

static JS_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:export\s+)?(?:async\s+)?function\s+([A-Za-z_$][A-Za-z0-9_$]*)").unwrap()
});
static JS_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:export\s+)?class\s+([A-Za-z_$][A-Za-z0-9_$]*)").unwrap());
static JS_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*import\b.*?from\s+['"]([^'"]+)['"]"#).unwrap());

static MARKDOWN_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+(.+?)\s*$").unwrap());

/// Pattern-based extractor over a small set of languages.
#[derive(Debug, Default)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self
    }

    fn module_name(source_path: &str) -> String {
        let file_name = source_path.rsplit('/').next().unwrap_or(source_path);
        file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(file_name)
            .to_string()
    }

    fn line_of(content: &str, byte_offset: usize) -> u32 {
        content[..byte_offset].bytes().filter(|b| *b == b'\n').count() as u32 + 1
    }

    fn entity(name: &str, kind: &str, line: u32, confidence: f64) -> RawEntity {
        RawEntity {
            name: name.to_string(),
            entity_type: Some(kind.to_string()),
            confidence_score: Some(confidence),
            line_number: Some(line),
            ..RawEntity::default()
        }
    }

    fn extract_code(
        &self,
        content: &str,
        functions: &Regex,
        function_group: usize,
        classes: &Regex,
        imports: &Regex,
        module: &str,
        emit_relationships: bool,
    ) -> ExtractionOutcome {
        let mut outcome = ExtractionOutcome::default();
        outcome
            .entities
            .push(Self::entity(module, "MODULE", 1, 0.95));

        for capture in classes.captures_iter(content) {
            let m = capture.get(1).expect("class pattern has one group");
            let line = Self::line_of(content, m.start());
            outcome
                .entities
                .push(Self::entity(m.as_str(), "CLASS", line, 0.9));
        }

        for capture in functions.captures_iter(content) {
            let m = capture
                .get(function_group)
                .expect("function pattern group present");
            let line = Self::line_of(content, m.start());
            // Python defs indented under a class read as methods.
            let indented = function_group == 2
                && capture.get(1).map(|ws| !ws.as_str().is_empty()).unwrap_or(false);
            let kind = if indented { "METHOD" } else { "FUNCTION" };
            outcome
                .entities
                .push(Self::entity(m.as_str(), kind, line, 0.9));
        }

        for capture in imports.captures_iter(content) {
            let m = capture
                .iter()
                .skip(1)
                .flatten()
                .next()
                .expect("import pattern has a group");
            let target = m.as_str();
            let line = Self::line_of(content, m.start());
            outcome
                .entities
                .push(Self::entity(target, "MODULE", line, 0.8));

            if emit_relationships {
                outcome.relationships.push(RawRelationship {
                    source_entity_id: module.to_string(),
                    target_entity_id: target.to_string(),
                    relationship_type: Some("IMPORTS".to_string()),
                    confidence_score: Some(0.8),
                    ..RawRelationship::default()
                });
            }
        }

        outcome
    }

    fn extract_markdown(&self, content: &str, module: &str) -> ExtractionOutcome {
        let mut outcome = ExtractionOutcome::default();
        outcome
            .entities
            .push(Self::entity(module, "DOCUMENT", 1, 0.95));

        for capture in MARKDOWN_HEADING.captures_iter(content) {
            let m = capture.get(1).expect("heading pattern has one group");
            let line = Self::line_of(content, m.start());
            outcome
                .entities
                .push(Self::entity(m.as_str(), "CONCEPT", line, 0.7));
        }

        outcome
    }
}

#[async_trait::async_trait]
impl EntityExtractor for HeuristicExtractor {
    async fn extract(
        &self,
        source_path: &str,
        content: &str,
        language: Option<&str>,
        options: &ExtractionOptions,
    ) -> Result<ExtractionOutcome, PipelineError> {
        let module = Self::module_name(source_path);
        let language = language
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| guess_language(source_path));
        let emit_relationships = options.include_relationship_extraction;

        let mut outcome = match language.as_str() {
            "python" | "py" => self.extract_code(
                content,
                &PYTHON_FUNCTION,
                2,
                &PYTHON_CLASS,
                &PYTHON_IMPORT,
                &module,
                emit_relationships,
            ),
            "rust" | "rs" => self.extract_code(
                content,
                &RUST_FUNCTION,
                1,
                &RUST_TYPE,
                &RUST_USE,
                &module,
                emit_relationships,
            ),
            "javascript" | "js" | "typescript" | "ts" => self.extract_code(
                content,
                &JS_FUNCTION,
                1,
                &JS_CLASS,
                &JS_IMPORT,
                &module,
                emit_relationships,
            ),
            "markdown" | "md" => self.extract_markdown(content, &module),
            _ => {
                let mut outcome = ExtractionOutcome::default();
                outcome
                    .entities
                    .push(Self::entity(&module, "DOCUMENT", 1, 0.6));
                outcome
            }
        };

        if !options.extract_documentation_concepts {
            outcome
                .entities
                .retain(|e| e.entity_type.as_deref() != Some("CONCEPT"));
        }

        Ok(outcome)
    }
}

fn guess_language(source_path: &str) -> String {
    match source_path.rsplit('.').next() {
        Some("py") => "python",
        Some("rs") => "rust",
        Some("js") | Some("jsx") => "javascript",
        Some("ts") | Some("tsx") => "typescript",
        Some("md") => "markdown",
        _ => "unknown",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names_of_kind(outcome: &ExtractionOutcome, kind: &str) -> Vec<String> {
        outcome
            .entities
            .iter()
            .filter(|e| e.entity_type.as_deref() == Some(kind))
            .map(|e| e.name.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_python_extraction() {
        let content = "import os\n\nclass Cache:\n    def get(self, key):\n        pass\n\ndef evict():\n    pass\n";
        let outcome = HeuristicExtractor::new()
            .extract("svc/cache.py", content, Some("python"), &ExtractionOptions::default())
            .await
            .unwrap();

        assert_eq!(names_of_kind(&outcome, "CLASS"), vec!["Cache"]);
        assert_eq!(names_of_kind(&outcome, "METHOD"), vec!["get"]);
        assert_eq!(names_of_kind(&outcome, "FUNCTION"), vec!["evict"]);
        assert!(names_of_kind(&outcome, "MODULE").contains(&"cache".to_string()));
        assert!(names_of_kind(&outcome, "MODULE").contains(&"os".to_string()));

        assert_eq!(outcome.relationships.len(), 1);
        assert_eq!(outcome.relationships[0].source_entity_id, "cache");
        assert_eq!(outcome.relationships[0].target_entity_id, "os");
    }

    #[tokio::test]
    async fn test_minimal_python_yields_at_least_one_entity() {
        let outcome = HeuristicExtractor::new()
            .extract("svc/app.py", "def f(): pass", Some("python"), &ExtractionOptions::default())
            .await
            .unwrap();
        assert!(names_of_kind(&outcome, "FUNCTION").contains(&"f".to_string()));
        assert!(!outcome.entities.is_empty());
    }

    #[tokio::test]
    async fn test_rust_extraction() {
        let content = "use std::fmt;\n\npub struct Engine;\n\npub async fn run() {}\n";
        let outcome = HeuristicExtractor::new()
            .extract("src/engine.rs", content, Some("rust"), &ExtractionOptions::default())
            .await
            .unwrap();

        assert_eq!(names_of_kind(&outcome, "CLASS"), vec!["Engine"]);
        assert_eq!(names_of_kind(&outcome, "FUNCTION"), vec!["run"]);
    }

    #[tokio::test]
    async fn test_markdown_headings_become_concepts() {
        let content = "# Cache Eviction\n\nBody text.\n\n## LRU Policy\n";
        let outcome = HeuristicExtractor::new()
            .extract("docs/cache.md", content, None, &ExtractionOptions::default())
            .await
            .unwrap();

        let concepts = names_of_kind(&outcome, "CONCEPT");
        assert_eq!(concepts, vec!["Cache Eviction", "LRU Policy"]);
    }

    #[tokio::test]
    async fn test_language_guessed_from_extension() {
        let outcome = HeuristicExtractor::new()
            .extract("a.py", "def g(): pass", None, &ExtractionOptions::default())
            .await
            .unwrap();
        assert!(names_of_kind(&outcome, "FUNCTION").contains(&"g".to_string()));
    }

    #[tokio::test]
    async fn test_concept_extraction_can_be_disabled() {
        let options = ExtractionOptions {
            extract_documentation_concepts: false,
            ..ExtractionOptions::default()
        };
        let outcome = HeuristicExtractor::new()
            .extract("docs/a.md", "# Heading\n", None, &options)
            .await
            .unwrap();
        assert!(names_of_kind(&outcome, "CONCEPT").is_empty());
    }
}
