//! Batched Stage 2 evaluation with per-document retries.
//!
//! Epistemic foundation:
//! - K_i: Batch entries are correlated by local index, as in Stage 1
//! - I^B: A missing entry or failed batch leaves documents without an
//!   evaluation; those are retried one per request up to the retry budget
//! - K_i: Scores are never fabricated: documents still missing after the
//!   budget are reported as unscored and the caller decides what to store

use crate::context::RunContext;
use crate::models::{Document, JudgeEvaluation, QualityConfig, RankError, Result};
use crate::progress::Stage;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Evaluates a batch of documents in one request.
#[async_trait]
pub trait BatchEvaluator: Send + Sync {
    /// Evaluations keyed by document id. Documents the response did not
    /// cover are simply absent. `Err` means the whole call failed.
    async fn evaluate_batch(
        &self,
        ctx: &RunContext,
        keywords: &[String],
        batch: &[&Document],
    ) -> Result<HashMap<String, JudgeEvaluation>>;
}

/// Result of a coordinated Stage 2 pass.
#[derive(Debug, Default)]
pub struct RetryOutcome {
    pub evaluations: HashMap<String, JudgeEvaluation>,
    /// Single-document requests issued
    pub retries: usize,
    /// Batch calls that failed outright
    pub failed_batches: usize,
    /// Document ids without an evaluation after the retry budget
    pub unscored: Vec<String>,
}

/// Batches documents, then retries the ones that came back empty.
#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    batch_size: usize,
    retry_budget: u32,
    batch_delay: Duration,
    fast: bool,
    max_concurrency: usize,
}

impl RetryCoordinator {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            retry_budget: config.retry_budget,
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            fast: config.fast,
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    pub async fn run(
        &self,
        ctx: &RunContext,
        evaluator: &dyn BatchEvaluator,
        keywords: &[String],
        documents: &[&Document],
    ) -> Result<RetryOutcome> {
        let total = documents.len();
        let mut outcome = RetryOutcome::default();

        let batches: Vec<&[&Document]> = documents.chunks(self.batch_size).collect();
        info!(
            documents = total,
            batches = batches.len(),
            retry_budget = self.retry_budget,
            "Stage 2: quality evaluation"
        );

        for (index, result) in self.run_requests(ctx, evaluator, keywords, &batches).await? {
            match result {
                Ok(evaluations) => outcome.evaluations.extend(evaluations),
                Err(e) => {
                    warn!(
                        batch = index,
                        size = batches[index].len(),
                        error = %e,
                        retryable = e.is_retryable(),
                        "Quality batch failed, documents queued for retry"
                    );
                    outcome.failed_batches += 1;
                }
            }
        }
        ctx.emit(Stage::Quality, outcome.evaluations.len(), total, 0, "batches done");

        for attempt in 1..=self.retry_budget {
            let missing: Vec<&Document> = documents
                .iter()
                .copied()
                .filter(|d| !outcome.evaluations.contains_key(&d.id))
                .collect();
            if missing.is_empty() {
                break;
            }

            debug!(attempt, missing = missing.len(), "Retrying documents individually");
            let singles: Vec<&[&Document]> = missing.chunks(1).collect();
            outcome.retries += singles.len();

            for (index, result) in self.run_requests(ctx, evaluator, keywords, &singles).await? {
                match result {
                    Ok(evaluations) => outcome.evaluations.extend(evaluations),
                    Err(e) => warn!(
                        attempt,
                        document_id = %singles[index][0].id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Retry failed"
                    ),
                }
            }
            ctx.emit(
                Stage::Quality,
                outcome.evaluations.len(),
                total,
                0,
                format!("retry round {attempt}"),
            );
        }

        outcome.unscored = documents
            .iter()
            .filter(|d| !outcome.evaluations.contains_key(&d.id))
            .map(|d| d.id.clone())
            .collect();
        for id in &outcome.unscored {
            warn!(document_id = %id, "Document unscored after retry budget");
        }

        Ok(outcome)
    }

    /// Issue one request per group, sequentially with pacing or in parallel.
    /// Fatal errors abort; other failures are returned per group.
    async fn run_requests(
        &self,
        ctx: &RunContext,
        evaluator: &dyn BatchEvaluator,
        keywords: &[String],
        groups: &[&[&Document]],
    ) -> Result<Vec<(usize, Result<HashMap<String, JudgeEvaluation>>)>> {
        let mut results = Vec::with_capacity(groups.len());

        if self.fast {
            let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
            let futures = groups.iter().enumerate().map(|(index, group)| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|e| RankError::Internal(e.to_string()))?;
                    evaluator.evaluate_batch(ctx, keywords, group).await.map(|r| (index, r))
                }
            });
            for (index, result) in join_all(futures).await.into_iter().enumerate() {
                match result {
                    Err(e) if e.is_fatal() => return Err(e),
                    Ok((_, evaluations)) => results.push((index, Ok(evaluations))),
                    Err(e) => results.push((index, Err(e))),
                }
            }
        } else {
            for (index, group) in groups.iter().enumerate() {
                if index > 0 {
                    ctx.pause(self.batch_delay).await?;
                }
                match evaluator.evaluate_batch(ctx, keywords, group).await {
                    Err(e) if e.is_fatal() => return Err(e),
                    result => results.push((index, result)),
                }
            }
        }

        Ok(results)
    }
}
