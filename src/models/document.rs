//! Document types for rankwise.
//!
//! K_i: A document is owned by its provider. The pipeline mutates its
//! scoring fields in place and never creates or deletes documents.

use super::{AxisScores, MAX_AXIS_SCORE, MAX_STAGE1_SCORE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source metadata attached by the collector.
///
/// Native popularity and authority are passed through untouched; blending
/// them with the LLM total is left to a downstream collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMeta {
    /// Feed or site name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Source category (e.g. "news", "paper", "forum")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Source-native popularity signal (votes, stars, citations)
    #[serde(default)]
    pub native_score: f64,

    /// Authority weight of the source
    #[serde(default = "default_authority")]
    pub authority: f64,
}

fn default_authority() -> f64 {
    1.0
}

impl Default for SourceMeta {
    fn default() -> Self {
        Self {
            name: None,
            category: None,
            native_score: 0.0,
            authority: default_authority(),
        }
    }
}

/// Position of a document in the per-run state machine.
///
/// `Collected → Relevant | ExcludedRelevance`, then
/// `Relevant → Scored | ExcludedQuality | UnscoredFailure`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    #[default]
    Collected,
    /// Passed Stage 1, awaiting quality evaluation
    Relevant,
    /// Dropped by Stage 1
    ExcludedRelevance,
    /// Scored, but Stage 2 relevance fell below the exclusion cutoff
    ExcludedQuality,
    /// Fully scored
    Scored,
    /// No evaluation after the retry budget was spent
    UnscoredFailure,
}

impl DocumentState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Collected | Self::Relevant)
    }
}

/// Mutable scoring fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentScores {
    /// Stage 1 relevance (0-10)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_stage1: Option<f64>,

    /// Short reason from Stage 1 (or the fallback reason)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_reason: Option<String>,

    /// Stage 2 relevance (0-20)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_stage2: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub novelty: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,

    /// Final total (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,

    /// Secondary recommendation score (0-20)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommend: Option<f64>,

    /// Whether the document remains in the ranking
    #[serde(default = "default_included")]
    pub included: bool,

    /// Summary produced by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_summary: Option<String>,

    /// Confidence of the quality evaluation (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    #[serde(default)]
    pub state: DocumentState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluated_at: Option<DateTime<Utc>>,
}

fn default_included() -> bool {
    true
}

impl Default for DocumentScores {
    fn default() -> Self {
        Self {
            relevance_stage1: None,
            relevance_reason: None,
            relevance_stage2: None,
            technical: None,
            novelty: None,
            impact: None,
            quality: None,
            total: None,
            recommend: None,
            included: true,
            generated_summary: None,
            confidence: None,
            state: DocumentState::Collected,
            evaluated_at: None,
        }
    }
}

/// An article to be ranked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier
    pub id: String,

    pub title: String,

    /// Collector-provided summary
    #[serde(default)]
    pub summary: String,

    /// Full text, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default)]
    pub source: SourceMeta,

    #[serde(default)]
    pub scores: DocumentScores,

    /// Opaque collector metadata (passed through to output)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            summary: summary.into(),
            content: None,
            source: SourceMeta::default(),
            scores: DocumentScores::default(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Text shown to the model, cut at `max_chars` characters.
    pub fn excerpt(&self, max_chars: usize) -> String {
        let body = match &self.content {
            Some(content) if !content.trim().is_empty() => content.as_str(),
            _ => self.summary.as_str(),
        };
        if body.chars().count() <= max_chars {
            body.to_string()
        } else {
            let mut cut: String = body.chars().take(max_chars).collect();
            cut.push('…');
            cut
        }
    }

    /// Reset scoring fields at the start of a keyword run.
    pub fn reset_scores(&mut self) {
        self.scores = DocumentScores::default();
    }

    /// Record the Stage 1 outcome.
    pub fn apply_relevance(&mut self, score: f64, reason: impl Into<String>, included: bool) {
        self.scores.relevance_stage1 = Some(score.clamp(0.0, MAX_STAGE1_SCORE));
        self.scores.relevance_reason = Some(reason.into());
        self.scores.included = included;
        self.scores.state = if included {
            DocumentState::Relevant
        } else {
            DocumentState::ExcludedRelevance
        };
    }

    /// Store clamped axis scores from a quality evaluation.
    pub fn apply_axis_scores(&mut self, scores: &AxisScores) {
        let scores = scores.clamped();
        self.scores.relevance_stage2 = Some(scores.relevance);
        self.scores.technical = Some(scores.technical);
        self.scores.novelty = Some(scores.novelty);
        self.scores.impact = Some(scores.impact);
        self.scores.quality = Some(scores.quality);
    }

    /// Store the recommend score, clamped to 0-20.
    pub fn apply_recommend(&mut self, recommend: Option<f64>) {
        self.scores.recommend = recommend.map(|r| r.clamp(0.0, MAX_AXIS_SCORE));
    }

    /// Current axis scores, if the document has been evaluated.
    pub fn axis_scores(&self) -> Option<AxisScores> {
        Some(AxisScores {
            relevance: self.scores.relevance_stage2?,
            technical: self.scores.technical?,
            novelty: self.scores.novelty?,
            impact: self.scores.impact?,
            quality: self.scores.quality?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_prefers_content_and_truncates() {
        let mut doc = Document::new("d1", "Title", "short summary");
        assert_eq!(doc.excerpt(100), "short summary");

        doc.content = Some("abcdefghij".to_string());
        assert_eq!(doc.excerpt(4), "abcd…");
        assert_eq!(doc.excerpt(10), "abcdefghij");
    }

    #[test]
    fn test_apply_relevance_clamps_and_sets_state() {
        let mut doc = Document::new("d1", "Title", "");
        doc.apply_relevance(14.0, "very relevant", true);
        assert_eq!(doc.scores.relevance_stage1, Some(10.0));
        assert_eq!(doc.scores.state, DocumentState::Relevant);

        doc.apply_relevance(1.0, "off-topic", false);
        assert!(!doc.scores.included);
        assert_eq!(doc.scores.state, DocumentState::ExcludedRelevance);
        assert!(doc.scores.state.is_terminal());
    }

    #[test]
    fn test_apply_axis_scores_clamps_out_of_range() {
        let mut doc = Document::new("d1", "Title", "");
        doc.apply_axis_scores(&AxisScores {
            relevance: 25.0,
            technical: -3.0,
            novelty: 12.0,
            impact: 20.0,
            quality: 19.5,
        });
        let stored = doc.axis_scores().unwrap();
        assert_eq!(stored.relevance, 20.0);
        assert_eq!(stored.technical, 0.0);
        assert_eq!(stored.novelty, 12.0);
    }

    #[test]
    fn test_deserialize_minimal_document() {
        let doc: Document =
            serde_json::from_str(r#"{"id": "a1", "title": "Qubits at scale"}"#).unwrap();
        assert!(doc.scores.included);
        assert_eq!(doc.scores.state, DocumentState::Collected);
        assert_eq!(doc.source.authority, 1.0);
    }
}
