// Quality Assessment
// Client for the external scorer plus a small built-in heuristic used when
// no scorer is configured. Quality is non-critical everywhere: callers
// proceed without a score on failure.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::contracts::{QualityAssessment, QualityScorer};
use crate::errors::PipelineError;

/// HTTP client for the external scorer: `POST {endpoint}/assess/code`.
pub struct HttpQualityScorer {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpQualityScorer {
    pub fn new(endpoint: url::Url) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(20)
            .build()
            .map_err(|e| PipelineError::InternalError(format!("http client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

#[derive(serde::Deserialize)]
struct RawAssessment {
    quality_score: f64,
    #[serde(default)]
    compliance: BTreeMap<String, bool>,
}

#[async_trait::async_trait]
impl QualityScorer for HttpQualityScorer {
    async fn assess(
        &self,
        content: &str,
        source_path: &str,
        language: Option<&str>,
    ) -> Result<QualityAssessment, PipelineError> {
        let url = self
            .endpoint
            .join("assess/code")
            .map_err(|e| PipelineError::InternalError(format!("scorer url: {e}")))?;

        let body = serde_json::json!({
            "content": content,
            "source_path": source_path,
            "language": language,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::InternalError(format!("quality scorer: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::InternalError(format!(
                "quality scorer returned {}",
                response.status()
            )));
        }

        let raw: RawAssessment = response
            .json()
            .await
            .map_err(|e| PipelineError::InternalError(format!("malformed assessment: {e}")))?;

        Ok(QualityAssessment {
            quality_score: raw.quality_score.clamp(0.0, 1.0),
            compliance: raw.compliance,
        })
    }
}

/// Structural heuristic scorer for offline use: rewards comments and
/// documentation, penalizes very long lines and very short documents.
#[derive(Debug, Default)]
pub struct HeuristicQualityScorer;

impl HeuristicQualityScorer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl QualityScorer for HeuristicQualityScorer {
    async fn assess(
        &self,
        content: &str,
        _source_path: &str,
        _language: Option<&str>,
    ) -> Result<QualityAssessment, PipelineError> {
        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len().max(1) as f64;

        let comment_lines = lines
            .iter()
            .filter(|l| {
                let t = l.trim_start();
                t.starts_with('#') || t.starts_with("//") || t.starts_with("///")
            })
            .count() as f64;
        let long_lines = lines.iter().filter(|l| l.len() > 120).count() as f64;
        let blank_lines = lines.iter().filter(|l| l.trim().is_empty()).count() as f64;

        let comment_ratio = (comment_lines / total).min(0.3) / 0.3;
        let layout_ratio = (blank_lines / total).min(0.2) / 0.2;
        let long_line_penalty = long_lines / total;
        let brevity_penalty = if lines.len() < 3 { 0.2 } else { 0.0 };

        let score = (0.5 + 0.25 * comment_ratio + 0.15 * layout_ratio
            - 0.3 * long_line_penalty
            - brevity_penalty)
            .clamp(0.0, 1.0);

        let compliance = BTreeMap::from([
            ("has_comments".to_string(), comment_lines > 0.0),
            ("line_length".to_string(), long_lines == 0.0),
        ]);

        Ok(QualityAssessment {
            quality_score: score,
            compliance,
        })
    }
}
