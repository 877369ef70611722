//! Judge panel: parallel judges plus reconciliation.
//!
//! Epistemic foundation:
//! - K_i: Judges run concurrently, bounded by `max_parallel_judges`
//! - K_i: A failed or timed-out judge is excluded from the document's result,
//!   it never fails the document or the run
//! - B_i: Arbitration succeeds (might fail) → weighted aggregation fallback
//! - I^R: Judge list, weights, arbitration and consensus threshold are configured

use crate::client::ModelClient;
use crate::context::RunContext;
use crate::models::{
    Config, Document, EnsembleResult, JudgeConfig, JudgeEvaluation, Resolution, RankError, Result,
};
use crate::pool::{JudgeEvaluator, MetaJudgeArbitrator, ResultAggregator, detect_contradictions};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// All enabled judges of the ensemble, with arbitration and aggregation.
pub struct JudgePanel {
    evaluators: Vec<JudgeEvaluator>,
    judges: Vec<JudgeConfig>,
    arbiter: MetaJudgeArbitrator,
    aggregator: ResultAggregator,
    /// Shared across documents, so it bounds all in-flight judge calls
    semaphore: Arc<Semaphore>,
    consensus_threshold: f64,
}

impl JudgePanel {
    pub fn new(client: Arc<dyn ModelClient>, config: &Config) -> Self {
        let judges = config.ensemble.enabled_judges();
        let language = config.quality.summary_language.clone();

        let evaluators = judges
            .iter()
            .map(|j| JudgeEvaluator::new(Arc::clone(&client), j.clone(), language.clone()))
            .collect();

        Self {
            evaluators,
            arbiter: MetaJudgeArbitrator::new(
                Arc::clone(&client),
                config.ensemble.meta_judge.clone(),
                language,
            ),
            aggregator: ResultAggregator::new(judges.clone()),
            judges,
            semaphore: Arc::new(Semaphore::new(config.ensemble.max_parallel_judges.max(1))),
            consensus_threshold: config.ensemble.consensus_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }

    /// Run every judge on one document. Judges that produced nothing are
    /// absent from the returned list.
    pub async fn evaluate_judges(
        &self,
        ctx: &RunContext,
        keywords: &[String],
        document: &Document,
    ) -> Result<Vec<JudgeEvaluation>> {
        let futures = self.evaluators.iter().map(|evaluator| async move {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|e| RankError::Internal(e.to_string()))?;
            evaluator.evaluate(ctx, keywords, document).await
        });

        let mut evaluations = Vec::with_capacity(self.evaluators.len());
        for outcome in join_all(futures).await {
            if let Some(evaluation) = outcome? {
                evaluations.push(evaluation);
            }
        }

        debug!(
            document_id = %document.id,
            judges = self.evaluators.len(),
            succeeded = evaluations.len(),
            "Judges finished"
        );
        Ok(evaluations)
    }

    /// Reconcile judge evaluations into one result.
    ///
    /// Two or more evaluations with arbitration enabled go to the meta-judge;
    /// otherwise, or if arbitration fails, they are aggregated.
    pub async fn reconcile(
        &self,
        ctx: &RunContext,
        keywords: &[String],
        document: &Document,
        evaluations: Vec<JudgeEvaluation>,
    ) -> Result<Option<EnsembleResult>> {
        if evaluations.is_empty() {
            return Ok(None);
        }

        let mut result = if evaluations.len() >= 2 && self.arbiter.is_enabled() {
            match self
                .arbiter
                .arbitrate(ctx, keywords, document, &evaluations, &self.judges)
                .await
            {
                Ok(meta) => {
                    let summary = if meta.summary.is_empty() {
                        evaluations[0].summary.clone()
                    } else {
                        meta.summary.clone()
                    };
                    let recommend = meta.recommend.or_else(|| {
                        let recs: Vec<f64> = evaluations.iter().filter_map(|e| e.recommend).collect();
                        (!recs.is_empty()).then(|| recs.iter().sum::<f64>() / recs.len() as f64)
                    });
                    Some(EnsembleResult {
                        document_id: document.id.clone(),
                        scores: meta.scores,
                        confidence: meta.confidence,
                        summary,
                        recommend,
                        resolution: Resolution::Arbitrated,
                        low_consensus: false,
                        contradictions: meta.contradictions,
                        evaluations,
                    })
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        document_id = %document.id,
                        error = %e,
                        "Arbitration failed, falling back to weighted aggregation"
                    );
                    let contradictions =
                        detect_contradictions(&evaluations, self.arbiter.contradiction_threshold());
                    self.aggregator.aggregate(evaluations, None).map(|mut result| {
                        result.contradictions = contradictions;
                        result
                    })
                }
            }
        } else {
            self.aggregator.aggregate(evaluations, None)
        };

        if let Some(result) = result.as_mut() {
            result.low_consensus = result.confidence < self.consensus_threshold;
            if result.low_consensus {
                debug!(
                    document_id = %document.id,
                    confidence = result.confidence,
                    threshold = self.consensus_threshold,
                    "Low consensus"
                );
            }
        }
        Ok(result)
    }

    /// Judges plus reconciliation for one document. `Ok(None)` when no judge
    /// produced an evaluation.
    pub async fn evaluate(
        &self,
        ctx: &RunContext,
        keywords: &[String],
        document: &Document,
    ) -> Result<Option<EnsembleResult>> {
        let evaluations = self.evaluate_judges(ctx, keywords, document).await?;
        if evaluations.is_empty() {
            warn!(document_id = %document.id, "No judge produced an evaluation");
        }
        self.reconcile(ctx, keywords, document, evaluations).await
    }
}
