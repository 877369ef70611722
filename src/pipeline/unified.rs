//! Unified Stage 2: one model scores batches of documents on all five axes.

use crate::client::{ModelClient, ModelRequest, ModelResponse};
use crate::context::RunContext;
use crate::models::{
    Config, Document, EnsembleResult, JudgeEvaluation, QualityConfig, Resolution, Result,
};
use crate::parse;
use crate::pipeline::{BatchEvaluator, QualityOutcome, QualityStrategy, RetryCoordinator};
use crate::pool::ParsedEvaluation;
use crate::prompt;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Judge id recorded on evaluations from the unified model.
pub const UNIFIED_JUDGE_ID: &str = "unified";

/// Batch evaluator backed by the configured quality model.
pub struct UnifiedEvaluator {
    client: Arc<dyn ModelClient>,
    config: QualityConfig,
    call_timeout: Duration,
}

impl UnifiedEvaluator {
    pub fn new(client: Arc<dyn ModelClient>, config: &QualityConfig) -> Self {
        Self {
            client,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            config: config.clone(),
        }
    }

    fn request(&self, keywords: &[String], batch: &[(usize, &Document)]) -> ModelRequest {
        ModelRequest::new(
            &self.config.model,
            prompt::quality_system(&self.config.summary_language),
            prompt::quality_batch_prompt(keywords, batch),
        )
        .with_temperature(self.config.temperature)
        .with_max_output_tokens(self.config.max_output_tokens)
        .with_effort(self.config.reasoning_effort.clone())
    }
}

#[async_trait]
impl BatchEvaluator for UnifiedEvaluator {
    async fn evaluate_batch(
        &self,
        ctx: &RunContext,
        keywords: &[String],
        batch: &[&Document],
    ) -> Result<HashMap<String, JudgeEvaluation>> {
        let labelled: Vec<(usize, &Document)> = batch
            .iter()
            .enumerate()
            .map(|(i, d)| (i + 1, *d))
            .collect();

        let response = ctx
            .call(self.client.as_ref(), &self.request(keywords, &labelled), self.call_timeout)
            .await?;
        let value = parse::parse_json(&response.content)?;

        let evaluations = decode_batch(&value, batch, &response);
        debug!(
            size = batch.len(),
            evaluated = evaluations.len(),
            "Quality batch parsed"
        );
        Ok(evaluations)
    }
}

/// Match response entries to documents by local index.
///
/// A single-document batch also accepts a bare evaluation object without an
/// id, which is how models usually answer a one-item request. Entries whose
/// id is missing or unknown are logged and dropped.
fn decode_batch(
    value: &Value,
    batch: &[&Document],
    response: &ModelResponse,
) -> HashMap<String, JudgeEvaluation> {
    let mut evaluations = HashMap::new();

    for item in parse::result_items(value) {
        let Some(local) = parse::local_index(item) else {
            let raw_id = item.get("id").map(|id| id.to_string()).unwrap_or_default();
            warn!(raw_id = %raw_id, "Quality entry without a usable id, ignoring");
            continue;
        };
        let Some(document) = local.checked_sub(1).and_then(|i| batch.get(i)) else {
            warn!(local_id = local, batch_len = batch.len(), "Quality id outside batch, ignoring");
            continue;
        };
        if evaluations.contains_key(&document.id) {
            warn!(local_id = local, "Duplicate quality id, keeping first");
            continue;
        }
        match ParsedEvaluation::from_value(item) {
            Some(parsed) => {
                let evaluation = parsed.into_evaluation(
                    &document.id,
                    UNIFIED_JUDGE_ID,
                    &response.model,
                    response,
                );
                evaluations.insert(document.id.clone(), evaluation);
            }
            None => warn!(document_id = %document.id, "Quality entry missing axes, ignoring"),
        }
    }

    if let ([document], true) = (batch, evaluations.is_empty()) {
        if let Some(parsed) = ParsedEvaluation::from_value(value) {
            let evaluation =
                parsed.into_evaluation(&document.id, UNIFIED_JUDGE_ID, &response.model, response);
            evaluations.insert(document.id.clone(), evaluation);
        }
    }

    share_usage(&mut evaluations, batch.len(), response);
    evaluations
}

/// Split one batch call's token usage evenly across the batch's documents.
fn share_usage(
    evaluations: &mut HashMap<String, JudgeEvaluation>,
    batch_len: usize,
    response: &ModelResponse,
) {
    let parts = u32::try_from(batch_len.max(1)).unwrap_or(u32::MAX);
    for evaluation in evaluations.values_mut() {
        evaluation.input_tokens = response.input_tokens / parts;
        evaluation.output_tokens = response.output_tokens / parts;
    }
}

/// Unified mode: batched calls with individual retries.
pub struct UnifiedStrategy {
    evaluator: UnifiedEvaluator,
    coordinator: RetryCoordinator,
}

impl UnifiedStrategy {
    pub fn new(client: Arc<dyn ModelClient>, config: &Config) -> Self {
        Self {
            evaluator: UnifiedEvaluator::new(client, &config.quality),
            coordinator: RetryCoordinator::new(&config.quality),
        }
    }
}

#[async_trait]
impl QualityStrategy for UnifiedStrategy {
    fn name(&self) -> &'static str {
        "unified"
    }

    async fn evaluate(
        &self,
        ctx: &RunContext,
        keywords: &[String],
        documents: &[&Document],
    ) -> Result<QualityOutcome> {
        let outcome = self
            .coordinator
            .run(ctx, &self.evaluator, keywords, documents)
            .await?;

        let results = outcome
            .evaluations
            .into_iter()
            .map(|(id, evaluation)| (id, EnsembleResult::from_single(evaluation, Resolution::Unified)))
            .collect();

        Ok(QualityOutcome {
            results,
            retries: outcome.retries,
        })
    }
}
