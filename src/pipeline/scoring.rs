//! Final score calculation.
//!
//! `total = relevance + technical + novelty + impact + quality`, where the
//! relevance term is the Stage 2 score (0-20) when present and the Stage 1
//! score doubled otherwise. The sum is clamped to 0-100. Blending with
//! native popularity and source authority happens downstream.

use crate::models::{AxisScores, Document, MAX_STAGE1_SCORE, MAX_TOTAL_SCORE, clamp_axis};

pub struct FinalScoreCalculator;

impl FinalScoreCalculator {
    /// Relevance term of the total.
    pub fn relevance_axis(stage2: Option<f64>, stage1: Option<f64>) -> Option<f64> {
        match (stage2, stage1) {
            (Some(s2), _) => Some(clamp_axis(s2)),
            (None, Some(s1)) => Some(clamp_axis(s1.clamp(0.0, MAX_STAGE1_SCORE) * 2.0)),
            (None, None) => None,
        }
    }

    /// Total from explicit parts.
    pub fn total(
        stage2_relevance: Option<f64>,
        stage1_relevance: Option<f64>,
        technical: f64,
        novelty: f64,
        impact: f64,
        quality: f64,
    ) -> f64 {
        let relevance = Self::relevance_axis(stage2_relevance, stage1_relevance).unwrap_or(0.0);
        let sum = relevance + clamp_axis(technical) + clamp_axis(novelty) + clamp_axis(impact)
            + clamp_axis(quality);
        sum.clamp(0.0, MAX_TOTAL_SCORE)
    }

    /// Total of full axis scores.
    pub fn total_of(scores: &AxisScores) -> f64 {
        Self::total(
            Some(scores.relevance),
            None,
            scores.technical,
            scores.novelty,
            scores.impact,
            scores.quality,
        )
    }

    /// Total of a document's stored fields. `None` until the four quality
    /// axes are present.
    pub fn for_document(document: &Document) -> Option<f64> {
        let s = &document.scores;
        Some(Self::total(
            s.relevance_stage2,
            s.relevance_stage1,
            s.technical?,
            s.novelty?,
            s.impact?,
            s.quality?,
        ))
    }
}
