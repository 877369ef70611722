//! Evaluation and result types for rankwise.
//!
//! K_i: These types represent the data flowing out of Stage 2.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upper bound of every quality axis.
pub const MAX_AXIS_SCORE: f64 = 20.0;

/// Upper bound of the Stage 1 relevance score.
pub const MAX_STAGE1_SCORE: f64 = 10.0;

/// Upper bound of the final total.
pub const MAX_TOTAL_SCORE: f64 = 100.0;

/// One of the five quality axes (each 0-20).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Relevance,
    Technical,
    Novelty,
    Impact,
    Quality,
}

impl Axis {
    pub const ALL: [Axis; 5] = [
        Axis::Relevance,
        Axis::Technical,
        Axis::Novelty,
        Axis::Impact,
        Axis::Quality,
    ];

    /// Key used in prompts and model responses.
    pub fn key(&self) -> &'static str {
        match self {
            Axis::Relevance => "relevance",
            Axis::Technical => "technical",
            Axis::Novelty => "novelty",
            Axis::Impact => "impact",
            Axis::Quality => "quality",
        }
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Scores on the five quality axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisScores {
    pub relevance: f64,
    pub technical: f64,
    pub novelty: f64,
    pub impact: f64,
    pub quality: f64,
}

impl AxisScores {
    /// Midpoint on every axis.
    pub fn neutral() -> Self {
        let mid = MAX_AXIS_SCORE / 2.0;
        Self {
            relevance: mid,
            technical: mid,
            novelty: mid,
            impact: mid,
            quality: mid,
        }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Relevance => self.relevance,
            Axis::Technical => self.technical,
            Axis::Novelty => self.novelty,
            Axis::Impact => self.impact,
            Axis::Quality => self.quality,
        }
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::Relevance => self.relevance = value,
            Axis::Technical => self.technical = value,
            Axis::Novelty => self.novelty = value,
            Axis::Impact => self.impact = value,
            Axis::Quality => self.quality = value,
        }
    }

    /// Copy with every axis clamped into 0-20 (NaN becomes 0).
    pub fn clamped(&self) -> Self {
        let mut out = *self;
        for axis in Axis::ALL {
            out.set(axis, clamp_axis(self.get(axis)));
        }
        out
    }

    pub fn sum(&self) -> f64 {
        Axis::ALL.iter().map(|a| self.get(*a)).sum()
    }

    /// All-zero evaluations are accepted but treated as suspicious.
    pub fn is_all_zero(&self) -> bool {
        Axis::ALL.iter().all(|a| self.get(*a) == 0.0)
    }
}

/// Clamp a single axis value into 0-20.
pub fn clamp_axis(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, MAX_AXIS_SCORE)
    }
}

/// Evaluation of one document by one judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeEvaluation {
    pub document_id: String,

    pub judge_id: String,

    pub judge_name: String,

    /// Model that produced the evaluation
    pub model: String,

    /// Clamped axis scores
    pub scores: AxisScores,

    /// Per-axis reasons (missing axes are simply absent)
    #[serde(default)]
    pub reasons: BTreeMap<Axis, String>,

    /// Total as reported by the model (informational; recomputed downstream)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_total: Option<f64>,

    /// Secondary recommendation score (0-20)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommend: Option<f64>,

    pub summary: String,

    /// All axes were zero
    #[serde(default)]
    pub suspicious: bool,

    pub input_tokens: u32,

    pub output_tokens: u32,

    pub elapsed_ms: u64,

    pub evaluated_at: DateTime<Utc>,
}

/// A pairwise disagreement between two judges on one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub axis: Axis,
    pub judge_a: String,
    pub score_a: f64,
    pub judge_b: String,
    pub score_b: f64,
    /// Absolute difference
    pub delta: f64,
}

/// Verdict of the arbitration model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaJudgeResult {
    pub scores: AxisScores,
    pub total: f64,
    /// 0-1
    pub confidence: f64,
    pub rationale: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommend: Option<f64>,
    pub contradictions: Vec<Contradiction>,
}

/// How the final verdict of a document was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Single unified model
    Unified,
    /// Meta-judge arbitration
    Arbitrated,
    /// Weighted average of judges
    Aggregated,
}

/// Final per-document outcome of Stage 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub document_id: String,

    pub scores: AxisScores,

    /// 0-1
    pub confidence: f64,

    pub summary: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommend: Option<f64>,

    pub resolution: Resolution,

    /// Confidence fell below the consensus threshold
    #[serde(default)]
    pub low_consensus: bool,

    #[serde(default)]
    pub contradictions: Vec<Contradiction>,

    /// Contributing judge evaluations (for traceability)
    pub evaluations: Vec<JudgeEvaluation>,
}

impl EnsembleResult {
    /// Wrap a single evaluation as a final result.
    pub fn from_single(evaluation: JudgeEvaluation, resolution: Resolution) -> Self {
        Self {
            document_id: evaluation.document_id.clone(),
            scores: evaluation.scores,
            confidence: 1.0,
            summary: evaluation.summary.clone(),
            recommend: evaluation.recommend,
            resolution,
            low_consensus: false,
            contradictions: Vec::new(),
            evaluations: vec![evaluation],
        }
    }

    /// Get the number of judges that contributed.
    pub fn num_judges(&self) -> usize {
        self.evaluations.len()
    }
}

/// Statistics for an evaluation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Documents entering the run
    pub total_documents: usize,

    /// Documents that passed Stage 1
    pub relevant: usize,

    /// Documents dropped by Stage 1
    pub filtered: usize,

    /// Documents dropped by the Stage 2 relevance re-check
    pub excluded_quality: usize,

    /// Fully scored documents
    pub scored: usize,

    /// Documents without an evaluation after retries
    pub unscored: usize,

    /// Stage 1 batches that failed open
    pub failed_open_batches: usize,

    /// Individual retries issued by the coordinator
    pub retries: usize,

    pub api_calls: u64,

    pub input_tokens: u64,

    pub output_tokens: u64,

    /// Estimated cost in USD
    pub cost_usd: f64,

    pub runtime_secs: f64,
}

impl RunStats {
    /// Documents excluded by either stage.
    pub fn excluded(&self) -> usize {
        self.filtered + self.excluded_quality
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped_handles_out_of_range_and_nan() {
        let scores = AxisScores {
            relevance: 25.0,
            technical: -1.0,
            novelty: f64::NAN,
            impact: 20.0,
            quality: 7.5,
        }
        .clamped();
        assert_eq!(scores.relevance, 20.0);
        assert_eq!(scores.technical, 0.0);
        assert_eq!(scores.novelty, 0.0);
        assert_eq!(scores.impact, 20.0);
        assert_eq!(scores.quality, 7.5);
    }

    #[test]
    fn test_sum_and_all_zero() {
        let scores = AxisScores {
            relevance: 16.0,
            technical: 18.0,
            novelty: 15.0,
            impact: 16.0,
            quality: 17.0,
        };
        assert_eq!(scores.sum(), 82.0);
        assert!(!scores.is_all_zero());
        assert!(AxisScores::default().is_all_zero());
    }

    #[test]
    fn test_axis_keys_round_trip_through_serde() {
        let json = serde_json::to_string(&Axis::Novelty).unwrap();
        assert_eq!(json, "\"novelty\"");
        assert_eq!(Axis::ALL.len(), 5);
    }
}
