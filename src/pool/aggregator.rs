//! Weighted-average reconciliation of judge evaluations.
//!
//! Used when arbitration is disabled, skipped (a single judge), or failed.
//!
//! Confidence = 1 − (mean over axes of the population standard deviation
//! across judges) / 20, clamped to [0, 1]. A single judge has confidence 1.

use crate::models::{
    Axis, AxisScores, EnsembleResult, JudgeConfig, JudgeEvaluation, MAX_AXIS_SCORE,
    MetaJudgeResult, Resolution,
};

/// Weighted mean of axis scores across judges.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    judges: Vec<JudgeConfig>,
}

impl ResultAggregator {
    pub fn new(judges: Vec<JudgeConfig>) -> Self {
        Self { judges }
    }

    /// Weight of a judge; unknown judges weigh 1.0.
    fn weight_of(&self, judge_id: &str) -> f64 {
        self.judges
            .iter()
            .find(|j| j.id == judge_id)
            .map(|j| j.weight)
            .filter(|w| w.is_finite() && *w > 0.0)
            .unwrap_or(1.0)
    }

    /// Weighted per-axis mean. Falls back to equal weights if the weights sum
    /// to zero.
    pub fn weighted_scores(&self, evaluations: &[JudgeEvaluation]) -> AxisScores {
        let mut weights: Vec<f64> = evaluations.iter().map(|e| self.weight_of(&e.judge_id)).collect();
        let mut total_weight: f64 = weights.iter().sum();
        if total_weight <= 0.0 {
            weights = vec![1.0; evaluations.len()];
            total_weight = evaluations.len() as f64;
        }

        let mut scores = AxisScores::default();
        if total_weight <= 0.0 {
            return scores;
        }
        for axis in Axis::ALL {
            let sum: f64 = evaluations
                .iter()
                .zip(&weights)
                .map(|(e, w)| e.scores.get(axis) * w)
                .sum();
            scores.set(axis, sum / total_weight);
        }
        scores.clamped()
    }

    /// Agreement between judges in [0, 1].
    pub fn confidence(evaluations: &[JudgeEvaluation]) -> f64 {
        if evaluations.len() < 2 {
            return 1.0;
        }

        let n = evaluations.len() as f64;
        let mean_stdev = Axis::ALL
            .iter()
            .map(|axis| {
                let values: Vec<f64> = evaluations.iter().map(|e| e.scores.get(*axis)).collect();
                let mean = values.iter().sum::<f64>() / n;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                variance.sqrt()
            })
            .sum::<f64>()
            / Axis::ALL.len() as f64;

        let confidence = 1.0 - mean_stdev / MAX_AXIS_SCORE;
        if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        }
    }

    /// Combine evaluations into a final result. `None` when there is nothing
    /// to aggregate.
    ///
    /// `meta` contributes its consolidated summary and contradictions when an
    /// arbitration produced text but its verdict was not used.
    pub fn aggregate(
        &self,
        evaluations: Vec<JudgeEvaluation>,
        meta: Option<&MetaJudgeResult>,
    ) -> Option<EnsembleResult> {
        let first = evaluations.first()?;
        let document_id = first.document_id.clone();

        let summary = meta
            .map(|m| m.summary.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| first.summary.clone());

        let recommends: Vec<f64> = evaluations.iter().filter_map(|e| e.recommend).collect();
        let recommend = (!recommends.is_empty())
            .then(|| recommends.iter().sum::<f64>() / recommends.len() as f64);

        Some(EnsembleResult {
            document_id,
            scores: self.weighted_scores(&evaluations),
            confidence: Self::confidence(&evaluations),
            summary,
            recommend,
            resolution: Resolution::Aggregated,
            low_consensus: false,
            contradictions: meta.map(|m| m.contradictions.clone()).unwrap_or_default(),
            evaluations,
        })
    }
}
