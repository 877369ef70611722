//! Meta-judge arbitration over multiple judge evaluations.
//!
//! Epistemic foundation:
//! - K_i: Contradiction detection is pure and symmetric in judge order
//! - B_i: The arbitration model returns one five-axis verdict (might fail)
//! - I^B: A failed or unparseable arbitration is reported as an error so the
//!   caller can fall back to weighted aggregation

use crate::client::{ModelClient, ModelRequest};
use crate::context::RunContext;
use crate::models::{
    Axis, Contradiction, Document, JudgeConfig, JudgeEvaluation, MAX_TOTAL_SCORE, MetaJudgeConfig,
    MetaJudgeResult, RankError, Result, Specialty, clamp_axis,
};
use crate::parse;
use crate::pool::ParsedEvaluation;
use crate::prompt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Find every (axis, judge pair) whose scores differ by more than `threshold`.
///
/// Pairs are reported once, in evaluation order; the delta is the absolute
/// difference, so swapping the judges yields the same delta.
pub fn detect_contradictions(evaluations: &[JudgeEvaluation], threshold: f64) -> Vec<Contradiction> {
    let mut contradictions = Vec::new();

    for axis in Axis::ALL {
        for (i, a) in evaluations.iter().enumerate() {
            for b in &evaluations[i + 1..] {
                let score_a = a.scores.get(axis);
                let score_b = b.scores.get(axis);
                let delta = (score_a - score_b).abs();
                if delta > threshold {
                    contradictions.push(Contradiction {
                        axis,
                        judge_a: a.judge_id.clone(),
                        score_a,
                        judge_b: b.judge_id.clone(),
                        score_b,
                        delta,
                    });
                }
            }
        }
    }

    contradictions
}

/// Reconciles judges through a designated arbitration model.
pub struct MetaJudgeArbitrator {
    client: Arc<dyn ModelClient>,
    config: MetaJudgeConfig,
    language: String,
}

impl MetaJudgeArbitrator {
    pub fn new(client: Arc<dyn ModelClient>, config: MetaJudgeConfig, language: impl Into<String>) -> Self {
        Self {
            client,
            config,
            language: language.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn contradiction_threshold(&self) -> f64 {
        self.config.contradiction_threshold
    }

    /// Arbitrate one document.
    ///
    /// `judges` supplies weight and specialty per evaluation; evaluations
    /// from unknown judges are presented with weight 1.0.
    pub async fn arbitrate(
        &self,
        ctx: &RunContext,
        keywords: &[String],
        document: &Document,
        evaluations: &[JudgeEvaluation],
        judges: &[JudgeConfig],
    ) -> Result<MetaJudgeResult> {
        let contradictions = detect_contradictions(evaluations, self.config.contradiction_threshold);
        if !contradictions.is_empty() {
            info!(
                document_id = %document.id,
                contradictions = contradictions.len(),
                max_delta = contradictions.iter().map(|c| c.delta).fold(0.0, f64::max),
                "Judges disagree"
            );
        }

        let annotated: Vec<(JudgeEvaluation, f64, Specialty)> = evaluations
            .iter()
            .map(|e| {
                let judge = judges.iter().find(|j| j.id == e.judge_id);
                (
                    e.clone(),
                    judge.map(|j| j.weight).unwrap_or(1.0),
                    judge.map(|j| j.specialty).unwrap_or_default(),
                )
            })
            .collect();

        let request = ModelRequest::new(
            &self.config.model,
            prompt::meta_judge_system(&self.language),
            prompt::meta_judge_prompt(keywords, document, &annotated, &contradictions),
        )
        .with_max_output_tokens(self.config.max_output_tokens);

        let response = ctx
            .call(
                self.client.as_ref(),
                &request,
                Duration::from_secs(self.config.timeout_secs),
            )
            .await?;

        let value = parse::parse_json(&response.content)?;
        let parsed = ParsedEvaluation::from_value(&value).ok_or_else(|| {
            RankError::Parse("Arbitration response is missing axis scores".to_string())
        })?;

        let scores = parsed.scores.clamped();
        let confidence = parse::score_field(&value, &["confidence"])
            .map(|c| if c > 1.0 && c <= 100.0 { c / 100.0 } else { c })
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        debug!(
            document_id = %document.id,
            confidence,
            judges = evaluations.len(),
            "Arbitration complete"
        );

        Ok(MetaJudgeResult {
            total: scores.sum().clamp(0.0, MAX_TOTAL_SCORE),
            scores,
            confidence,
            rationale: parse::text_field(&value, &["rationale", "reasoning", "explanation"])
                .unwrap_or_default(),
            summary: parsed.summary,
            recommend: parsed.recommend.map(clamp_axis),
            contradictions,
        })
    }
}
