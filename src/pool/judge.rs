//! Single-judge quality evaluation.
//!
//! Epistemic foundation:
//! - K_i: One judge, one document, exactly one model call
//! - K_i: Axis scores are clamped to 0-20 before they leave this module
//! - B_i: The response carries five axis scores (numbers or numeric strings)
//! - I^B: Transport errors, timeouts and unparseable bodies yield no
//!   evaluation; callers exclude the judge instead of guessing

use crate::client::{ModelClient, ModelRequest, ModelResponse};
use crate::context::RunContext;
use crate::models::{Axis, AxisScores, Document, JudgeConfig, JudgeEvaluation, Result, clamp_axis};
use crate::parse;
use crate::pipeline::FinalScoreCalculator;
use crate::prompt;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Slack allowed between a model's own total and the computed one.
const TOTAL_TOLERANCE: f64 = 1.0;

/// Axis scores and text decoded from one response entry, before clamping.
#[derive(Debug, Clone)]
pub struct ParsedEvaluation {
    pub scores: AxisScores,
    pub reasons: BTreeMap<Axis, String>,
    pub reported_total: Option<f64>,
    pub recommend: Option<f64>,
    pub summary: String,
}

impl ParsedEvaluation {
    /// Decode one entry. Every axis must be present; the scores may sit at
    /// the top level or under a `scores` object.
    pub fn from_value(item: &Value) -> Option<Self> {
        let score_source = match item.get("scores") {
            Some(nested @ Value::Object(_)) => nested,
            _ => item,
        };

        let mut scores = AxisScores::default();
        for axis in Axis::ALL {
            scores.set(axis, parse::score_field(score_source, &[axis.key()])?);
        }

        let mut reasons = BTreeMap::new();
        for axis in Axis::ALL {
            let flat_key = format!("{}_reason", axis.key());
            let reason = item
                .get("reasons")
                .and_then(|r| parse::text_field(r, &[axis.key()]))
                .or_else(|| parse::text_field(item, &[flat_key.as_str()]));
            if let Some(reason) = reason {
                reasons.insert(axis, reason);
            }
        }

        Some(Self {
            scores,
            reasons,
            reported_total: parse::score_field(item, &["total", "total_score"]),
            recommend: parse::score_field(item, &["recommend", "recommendation"]),
            summary: parse::text_field(item, &["summary", "generated_summary"]).unwrap_or_default(),
        })
    }

    /// Finish into a clamped evaluation attributed to a judge.
    pub fn into_evaluation(
        self,
        document_id: &str,
        judge_id: &str,
        judge_name: &str,
        response: &ModelResponse,
    ) -> JudgeEvaluation {
        let scores = self.scores.clamped();
        if let Some(reported) = self.reported_total {
            let computed = FinalScoreCalculator::total_of(&scores);
            if (reported - computed).abs() > TOTAL_TOLERANCE {
                debug!(
                    document_id,
                    judge = judge_id,
                    reported,
                    computed,
                    "Reported total disagrees with axis sum, using axis sum"
                );
            }
        }
        let suspicious = scores.is_all_zero();
        if suspicious {
            warn!(
                document_id,
                judge = judge_id,
                "All-zero evaluation accepted but flagged as suspicious"
            );
        }

        JudgeEvaluation {
            document_id: document_id.to_string(),
            judge_id: judge_id.to_string(),
            judge_name: judge_name.to_string(),
            model: response.model.clone(),
            scores,
            reasons: self.reasons,
            reported_total: self.reported_total,
            recommend: self.recommend.map(clamp_axis),
            summary: self.summary,
            suspicious,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            elapsed_ms: response.duration.as_millis() as u64,
            evaluated_at: Utc::now(),
        }
    }
}

/// Evaluates documents under one judge configuration.
pub struct JudgeEvaluator {
    client: Arc<dyn ModelClient>,
    judge: JudgeConfig,
    language: String,
}

impl JudgeEvaluator {
    pub fn new(client: Arc<dyn ModelClient>, judge: JudgeConfig, language: impl Into<String>) -> Self {
        Self {
            client,
            judge,
            language: language.into(),
        }
    }

    pub fn judge(&self) -> &JudgeConfig {
        &self.judge
    }

    /// Evaluate one document.
    ///
    /// Returns `Ok(None)` when this judge produced nothing usable; `Err` only
    /// for fatal errors.
    pub async fn evaluate(
        &self,
        ctx: &RunContext,
        keywords: &[String],
        document: &Document,
    ) -> Result<Option<JudgeEvaluation>> {
        let request = ModelRequest::new(
            &self.judge.model,
            prompt::judge_system(&self.judge, &self.language),
            prompt::judge_prompt(keywords, document),
        )
        .with_temperature(self.judge.temperature)
        .with_max_output_tokens(self.judge.max_output_tokens);

        let timeout = Duration::from_secs(self.judge.timeout_secs);

        let response = match ctx.call(self.client.as_ref(), &request, timeout).await {
            Ok(response) => response,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    document_id = %document.id,
                    judge = %self.judge.id,
                    error = %e,
                    "Judge call failed, excluding judge"
                );
                return Ok(None);
            }
        };

        let parsed = parse::parse_json(&response.content)
            .ok()
            .and_then(|value| {
                ParsedEvaluation::from_value(&value).or_else(|| {
                    parse::result_items(&value)
                        .first()
                        .and_then(|item| ParsedEvaluation::from_value(item))
                })
            });

        match parsed {
            Some(parsed) => {
                let evaluation = parsed.into_evaluation(
                    &document.id,
                    &self.judge.id,
                    self.judge.display_name(),
                    &response,
                );
                debug!(
                    document_id = %document.id,
                    judge = %self.judge.id,
                    sum = evaluation.scores.sum(),
                    elapsed_ms = evaluation.elapsed_ms,
                    "Judge evaluation complete"
                );
                Ok(Some(evaluation))
            }
            None => {
                warn!(
                    document_id = %document.id,
                    judge = %self.judge.id,
                    "Unparseable judge response, excluding judge"
                );
                Ok(None)
            }
        }
    }
}
