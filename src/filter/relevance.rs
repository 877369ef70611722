//! Stage 1: batched relevance triage.
//!
//! Epistemic foundation:
//! - K_i: Each batch entry is labelled with a local 1-based index; verdicts
//!   are matched by that index, never by position
//! - B_i: The model returns one verdict per index (it may omit, duplicate or
//!   invent indices)
//! - I^B: A missing verdict or a failed batch fails open: the document stays
//!   in with the neutral score, so content is never dropped by a parsing gap

use crate::client::{ModelClient, ModelRequest};
use crate::context::RunContext;
use crate::models::{Config, Document, MAX_STAGE1_SCORE, RankError, RelevanceConfig, Result};
use crate::parse;
use crate::progress::Stage;
use crate::prompt;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Reason recorded when a document had no verdict in an otherwise valid response.
pub const MISSING_VERDICT_REASON: &str = "No relevance verdict returned; kept by default";

/// Score and reason for one local index.
#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceVerdict {
    pub score: f64,
    pub reason: String,
}

/// Aggregate counts from one Stage 1 pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelevanceStats {
    pub processed: usize,
    pub relevant: usize,
    pub filtered: usize,
    pub api_calls: usize,
    /// Batches whose call failed and were kept wholesale
    pub failed_open_batches: usize,
    /// Documents kept because their id was missing from the response
    pub missing_verdicts: usize,
}

/// Stage 1 filter.
pub struct RelevanceFilter {
    client: Arc<dyn ModelClient>,
    config: RelevanceConfig,
    threshold: f64,
    fast: bool,
    max_concurrency: usize,
    batch_delay: Duration,
    call_timeout: Duration,
}

impl RelevanceFilter {
    pub fn new(client: Arc<dyn ModelClient>, config: &Config) -> Self {
        Self {
            client,
            threshold: config.relevance.threshold.value(),
            config: config.relevance.clone(),
            fast: config.quality.fast,
            max_concurrency: config.quality.max_concurrency.max(1),
            batch_delay: Duration::from_millis(config.quality.batch_delay_ms),
            call_timeout: Duration::from_secs(config.quality.call_timeout_secs),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score every document, mutating its Stage 1 fields in place.
    ///
    /// Only fatal errors (cancellation) are returned; every other failure is
    /// absorbed by failing open.
    pub async fn run(
        &self,
        ctx: &RunContext,
        documents: &mut [Document],
        keywords: &[String],
    ) -> Result<RelevanceStats> {
        let batch_size = self.config.batch_size.max(1);
        let total = documents.len();
        let mut stats = RelevanceStats {
            processed: total,
            ..Default::default()
        };

        info!(
            documents = total,
            batch_size,
            threshold = self.threshold,
            model = %self.config.model,
            "Stage 1: relevance filtering"
        );

        let outcomes = if self.fast {
            self.evaluate_parallel(ctx, documents, keywords, batch_size).await?
        } else {
            self.evaluate_sequential(ctx, documents, keywords, batch_size).await?
        };

        stats.api_calls = outcomes.len();
        let mut processed = 0;

        for (batch_index, (chunk, outcome)) in documents
            .chunks_mut(batch_size)
            .zip(outcomes)
            .enumerate()
        {
            match outcome {
                Ok(verdicts) => {
                    for (offset, document) in chunk.iter_mut().enumerate() {
                        let local = offset + 1;
                        match verdicts.get(&local) {
                            Some(verdict) => {
                                let score = verdict.score.clamp(0.0, MAX_STAGE1_SCORE);
                                let included = score >= self.threshold;
                                document.apply_relevance(score, verdict.reason.clone(), included);
                            }
                            None => {
                                warn!(
                                    batch = batch_index,
                                    local_id = local,
                                    document_id = %document.id,
                                    "Missing relevance verdict, failing open"
                                );
                                stats.missing_verdicts += 1;
                                document.apply_relevance(
                                    self.config.neutral_score,
                                    MISSING_VERDICT_REASON,
                                    true,
                                );
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        batch = batch_index,
                        size = chunk.len(),
                        error = %e,
                        "Relevance batch failed, keeping all documents"
                    );
                    stats.failed_open_batches += 1;
                    let reason = format!("Relevance check failed ({e}); kept by default");
                    for document in chunk.iter_mut() {
                        document.apply_relevance(self.config.neutral_score, reason.clone(), true);
                    }
                }
            }

            processed += chunk.len();
            for document in chunk.iter() {
                if document.scores.included {
                    stats.relevant += 1;
                } else {
                    stats.filtered += 1;
                }
            }
            ctx.emit(
                Stage::Relevance,
                processed,
                total,
                stats.relevant,
                format!("batch {}", batch_index + 1),
            );
        }

        info!(
            relevant = stats.relevant,
            filtered = stats.filtered,
            failed_open_batches = stats.failed_open_batches,
            "Stage 1 complete"
        );

        Ok(stats)
    }

    async fn evaluate_sequential(
        &self,
        ctx: &RunContext,
        documents: &[Document],
        keywords: &[String],
        batch_size: usize,
    ) -> Result<Vec<Result<HashMap<usize, RelevanceVerdict>>>> {
        let mut outcomes = Vec::new();
        for (i, chunk) in documents.chunks(batch_size).enumerate() {
            if i > 0 {
                ctx.pause(self.batch_delay).await?;
            }
            match self.evaluate_batch(ctx, keywords, chunk).await {
                Err(e) if e.is_fatal() => return Err(e),
                outcome => outcomes.push(outcome),
            }
        }
        Ok(outcomes)
    }

    async fn evaluate_parallel(
        &self,
        ctx: &RunContext,
        documents: &[Document],
        keywords: &[String],
        batch_size: usize,
    ) -> Result<Vec<Result<HashMap<usize, RelevanceVerdict>>>> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        let futures = documents.chunks(batch_size).map(|chunk| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| RankError::Internal(e.to_string()))?;
                self.evaluate_batch(ctx, keywords, chunk).await
            }
        });

        let mut outcomes = Vec::new();
        for outcome in join_all(futures).await {
            match outcome {
                Err(e) if e.is_fatal() => return Err(e),
                outcome => outcomes.push(outcome),
            }
        }
        Ok(outcomes)
    }

    /// One model call for one batch; verdicts keyed by local index.
    pub async fn evaluate_batch(
        &self,
        ctx: &RunContext,
        keywords: &[String],
        chunk: &[Document],
    ) -> Result<HashMap<usize, RelevanceVerdict>> {
        let batch: Vec<(usize, &Document)> = chunk
            .iter()
            .enumerate()
            .map(|(i, d)| (i + 1, d))
            .collect();

        let request = ModelRequest::new(
            &self.config.model,
            prompt::relevance_system(),
            prompt::relevance_batch_prompt(keywords, &batch),
        )
        .with_max_output_tokens(Some(self.config.max_output_tokens));

        let response = ctx
            .call(self.client.as_ref(), &request, self.call_timeout)
            .await?;

        let verdicts = parse_verdicts(&response.content, chunk.len())?;
        debug!(
            size = chunk.len(),
            verdicts = verdicts.len(),
            "Relevance batch parsed"
        );
        Ok(verdicts)
    }
}

/// Decode a batch response into verdicts for indices `1..=batch_len`.
///
/// Out-of-range and unparseable ids are skipped with a warning; for a
/// duplicated id the first entry wins.
pub fn parse_verdicts(content: &str, batch_len: usize) -> Result<HashMap<usize, RelevanceVerdict>> {
    let value = parse::parse_json(content)?;
    let mut verdicts = HashMap::new();

    for item in parse::result_items(&value) {
        let Some(local) = parse::local_index(item) else {
            warn!(entry = %item, "Relevance entry without usable id, ignoring");
            continue;
        };
        if local == 0 || local > batch_len {
            warn!(local_id = local, batch_len, "Relevance id outside batch, ignoring");
            continue;
        }
        if verdicts.contains_key(&local) {
            warn!(local_id = local, "Duplicate relevance id, keeping first");
            continue;
        }
        let Some(score) = parse::score_field(item, &["score", "relevance", "rating"]) else {
            warn!(local_id = local, "Relevance entry without score, ignoring");
            continue;
        };
        let reason = parse::text_field(item, &["reason", "rationale", "explanation"])
            .unwrap_or_default();

        verdicts.insert(local, RelevanceVerdict { score, reason });
    }

    Ok(verdicts)
}
