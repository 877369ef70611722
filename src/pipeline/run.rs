//! Two-stage evaluation run.
//!
//! Pipeline flow:
//! Health check → Stage 1 (relevance filter) → Stage 2 (quality strategy)
//! → clamped scores + final total written back to each document
//!
//! Epistemic foundation:
//! - K_i: Stage 1 completes for every document before Stage 2 starts
//! - I^B: An unreachable service aborts the run before any document is
//!   touched; every other failure stays local to its batch or document
//! - K_i: Each run ends with every document in a terminal state

use crate::client::ModelClient;
use crate::context::RunContext;
use crate::filter::RelevanceFilter;
use crate::models::{
    AxisScores, Config, Document, DocumentState, EnsembleResult, Result, RunStats, UnscoredPolicy,
};
use crate::pipeline::{FinalScoreCalculator, QualityStrategy, strategy_for};
use crate::progress::Stage;
use crate::store::DocumentProvider;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub keywords: Vec<String>,
    /// Stage 2 strategy name
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub stats: RunStats,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        writeln!(f, "Run {} ({} mode)", self.run_id, self.strategy)?;
        writeln!(f, "  Keywords:          {}", self.keywords.join(", "))?;
        writeln!(f, "  Documents:         {}", s.total_documents)?;
        writeln!(f, "  Excluded stage 1:  {}", s.filtered)?;
        writeln!(f, "  Excluded stage 2:  {}", s.excluded_quality)?;
        writeln!(f, "  Scored:            {}", s.scored)?;
        writeln!(f, "  Unscored:          {}", s.unscored)?;
        writeln!(f, "  Failed-open:       {} batches", s.failed_open_batches)?;
        writeln!(f, "  Retries:           {}", s.retries)?;
        writeln!(f, "  API calls:         {}", s.api_calls)?;
        writeln!(f, "  Tokens (in/out):   {}/{}", s.input_tokens, s.output_tokens)?;
        writeln!(f, "  Elapsed:           {:.1}s", s.runtime_secs)?;
        write!(f, "  Estimated cost:    ${:.4}", s.cost_usd)
    }
}

/// Health check, relevance filter and quality strategy over one document set.
pub struct EvaluationPipeline {
    client: Arc<dyn ModelClient>,
    filter: RelevanceFilter,
    strategy: Box<dyn QualityStrategy>,
    exclusion_threshold: f64,
    unscored_policy: UnscoredPolicy,
}

impl EvaluationPipeline {
    /// Pipeline with the Stage 2 strategy selected by `quality.mode`.
    pub fn new(client: Arc<dyn ModelClient>, config: &Config) -> Self {
        Self {
            filter: RelevanceFilter::new(Arc::clone(&client), config),
            strategy: strategy_for(config, Arc::clone(&client)),
            client,
            exclusion_threshold: config.quality.exclusion_threshold,
            unscored_policy: config.quality.unscored,
        }
    }

    /// Replace the Stage 2 strategy.
    pub fn with_strategy(mut self, strategy: Box<dyn QualityStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Score `documents` in place for `keywords`.
    ///
    /// Returns `Err` only for fatal conditions: the service failed its health
    /// check (documents untouched) or the run was cancelled.
    pub async fn run(
        &self,
        ctx: &RunContext,
        documents: &mut [Document],
        keywords: &[String],
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let total = documents.len();

        ctx.emit(Stage::HealthCheck, 0, total, 0, "checking model service");
        let health = self.client.health_check().await;
        if let Err(e) = health.into_result() {
            error!(error = %e, "Health check failed, aborting run");
            return Err(e);
        }

        info!(
            run_id = %ctx.run_id(),
            documents = total,
            keywords = %keywords.join(", "),
            strategy = self.strategy.name(),
            "Starting evaluation run"
        );

        for document in documents.iter_mut() {
            document.reset_scores();
        }

        let relevance = self.filter.run(ctx, documents, keywords).await?;
        ctx.emit(
            Stage::Relevance,
            relevance.processed,
            total,
            relevance.relevant,
            "relevance filtering done",
        );

        let relevant: Vec<&Document> = documents.iter().filter(|d| d.scores.included).collect();
        let relevant_count = relevant.len();
        let mut outcome = self.strategy.evaluate(ctx, keywords, &relevant).await?;

        let mut stats = RunStats {
            total_documents: total,
            relevant: relevance.relevant,
            filtered: relevance.filtered,
            failed_open_batches: relevance.failed_open_batches,
            retries: outcome.retries,
            ..Default::default()
        };

        for document in documents
            .iter_mut()
            .filter(|d| d.scores.state == DocumentState::Relevant)
        {
            match outcome.results.remove(&document.id) {
                Some(result) => {
                    self.apply_result(document, &result);
                    if document.scores.state == DocumentState::ExcludedQuality {
                        stats.excluded_quality += 1;
                    } else {
                        stats.scored += 1;
                    }
                }
                None => {
                    self.apply_unscored(document);
                    stats.unscored += 1;
                }
            }
        }

        let pending = documents
            .iter()
            .filter(|d| !d.scores.state.is_terminal())
            .count();
        if pending > 0 {
            warn!(pending, "Documents left without a terminal state");
        }

        let (input_tokens, output_tokens) = ctx.total_tokens();
        stats.api_calls = ctx.api_calls();
        stats.input_tokens = input_tokens;
        stats.output_tokens = output_tokens;
        stats.cost_usd = ctx.total_cost_usd();
        stats.runtime_secs = ctx.elapsed().as_secs_f64();

        ctx.emit(
            Stage::Complete,
            total,
            total,
            relevant_count - stats.excluded_quality,
            format!("{} scored, {} unscored", stats.scored, stats.unscored),
        );

        info!(
            scored = stats.scored,
            excluded = stats.excluded(),
            unscored = stats.unscored,
            api_calls = stats.api_calls,
            cost = format!("${:.4}", stats.cost_usd),
            runtime = format!("{:.1}s", stats.runtime_secs),
            "Evaluation run complete"
        );

        Ok(RunReport {
            run_id: ctx.run_id().to_string(),
            keywords: keywords.to_vec(),
            strategy: self.strategy.name().to_string(),
            started_at,
            stats,
        })
    }

    /// Load from `provider`, run, and persist the mutated documents.
    ///
    /// Nothing is persisted when the run fails.
    pub async fn run_with_provider(
        &self,
        ctx: &RunContext,
        provider: &dyn DocumentProvider,
        keywords: &[String],
    ) -> Result<RunReport> {
        let mut documents = provider.load().await?;
        let report = self.run(ctx, &mut documents, keywords).await?;
        provider.persist(&documents).await?;
        Ok(report)
    }

    fn apply_result(&self, document: &mut Document, result: &EnsembleResult) {
        document.apply_axis_scores(&result.scores);
        document.apply_recommend(result.recommend);
        if !result.summary.is_empty() {
            document.scores.generated_summary = Some(result.summary.clone());
        }
        document.scores.confidence = Some(result.confidence);
        document.scores.total = FinalScoreCalculator::for_document(document);
        document.scores.evaluated_at = Some(Utc::now());

        let stage2 = document.scores.relevance_stage2.unwrap_or_default();
        if stage2 < self.exclusion_threshold {
            info!(
                document_id = %document.id,
                relevance = stage2,
                cutoff = self.exclusion_threshold,
                "Excluded by quality-stage relevance"
            );
            document.scores.included = false;
            document.scores.state = DocumentState::ExcludedQuality;
        } else {
            document.scores.state = DocumentState::Scored;
        }
    }

    fn apply_unscored(&self, document: &mut Document) {
        warn!(
            document_id = %document.id,
            policy = ?self.unscored_policy,
            "No quality evaluation for document"
        );
        if self.unscored_policy == UnscoredPolicy::Neutral {
            document.apply_axis_scores(&AxisScores::neutral());
            document.scores.total = FinalScoreCalculator::for_document(document);
        }
        document.scores.state = DocumentState::UnscoredFailure;
        document.scores.evaluated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ModelRequest, PricingTable};
    use crate::context::CancelSignal;
    use crate::models::{RankError, ThresholdPreset};
    use crate::progress::{ChannelProgress, NoopProgress};
    use crate::store::MemoryDocumentStore;
    use crate::testing::{Reply, ScriptedClient};

    const RELEVANCE_MODEL: &str = "gpt-4o-mini";

    fn config() -> Config {
        let mut config = Config::default();
        config.relevance.threshold = ThresholdPreset::Balanced;
        config.quality.batch_delay_ms = 0;
        config.quality.batch_size = 5;
        config
    }

    fn documents() -> Vec<Document> {
        vec![
            Document::new("a", "Qubit error correction", "s"),
            Document::new("b", "Tomato gardening", "s"),
            Document::new("c", "Trapped ion hardware", "s"),
        ]
    }

    fn keywords() -> Vec<String> {
        vec!["quantum computing".to_string()]
    }

    const RELEVANCE_REPLY: &str = r#"{"results": [
        {"id": 1, "score": 9, "reason": "qubits"},
        {"id": 2, "score": 1, "reason": "gardening"},
        {"id": 3, "score": 7, "reason": "hardware"}]}"#;

    /// Answers Stage 1 with RELEVANCE_REPLY and Stage 2 with `quality`.
    fn client(quality: Reply) -> Arc<ScriptedClient> {
        Arc::new(ScriptedClient::from_fn(move |request: &ModelRequest| {
            if request.model == RELEVANCE_MODEL {
                Reply::text(RELEVANCE_REPLY)
            } else {
                quality.clone()
            }
        }))
    }

    #[tokio::test]
    async fn test_full_run_scores_relevant_documents() {
        let quality = Reply::text(
            r#"{"results": [
                {"id": 1, "relevance": 16, "technical": 18, "novelty": 15, "impact": 16,
                 "quality": 17, "recommend": 18, "summary": "Strong paper."},
                {"id": 2, "relevance": 5, "technical": 12, "novelty": 10, "impact": 10,
                 "quality": 12, "summary": "Tangential."}]}"#,
        );
        let scripted = client(quality);
        let pipeline = EvaluationPipeline::new(scripted.clone(), &config());
        let mut docs = documents();

        let report = pipeline
            .run(&RunContext::detached(), &mut docs, &keywords())
            .await
            .unwrap();

        assert_eq!(docs[0].scores.state, DocumentState::Scored);
        assert_eq!(docs[0].scores.total, Some(82.0));
        assert_eq!(docs[0].scores.generated_summary.as_deref(), Some("Strong paper."));
        assert_eq!(docs[1].scores.state, DocumentState::ExcludedRelevance);
        assert_eq!(docs[1].scores.technical, None);
        assert_eq!(docs[2].scores.state, DocumentState::ExcludedQuality);
        assert!(!docs[2].scores.included);
        assert!(docs.iter().all(|d| d.scores.state.is_terminal()));

        let stats = &report.stats;
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.excluded_quality, 1);
        assert_eq!(stats.scored, 1);
        assert_eq!(stats.unscored, 0);
        assert_eq!(stats.api_calls, 2);
        assert_eq!(stats.input_tokens, 200);
        assert!(stats.cost_usd > 0.0);
        assert_eq!(report.strategy, "unified");
        assert_eq!(scripted.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_quality_batch_ends_in_scored_and_unscored() {
        let single = r#"{"relevance": 16, "technical": 14, "novelty": 12, "impact": 12, "quality": 14}"#;
        let scripted = Arc::new(ScriptedClient::with_script([
            Reply::text(
                r#"[{"id": 1, "score": 8}, {"id": 2, "score": 8}, {"id": 3, "score": 8},
                    {"id": 4, "score": 8}, {"id": 5, "score": 8}]"#,
            ),
            Reply::Fail,
            Reply::text(single),
            Reply::text(single),
            Reply::Fail,
            Reply::text(single),
            Reply::text(single),
            Reply::Fail,
        ]));
        let pipeline = EvaluationPipeline::new(scripted.clone(), &config());
        let mut docs: Vec<Document> = (1..=5)
            .map(|i| Document::new(format!("doc-{i}"), format!("Title {i}"), "s"))
            .collect();

        let report = pipeline
            .run(&RunContext::detached(), &mut docs, &keywords())
            .await
            .unwrap();

        let states: Vec<DocumentState> = docs.iter().map(|d| d.scores.state).collect();
        assert_eq!(
            states,
            vec![
                DocumentState::Scored,
                DocumentState::Scored,
                DocumentState::UnscoredFailure,
                DocumentState::Scored,
                DocumentState::Scored,
            ]
        );
        assert_eq!(report.stats.scored, 4);
        assert_eq!(report.stats.unscored, 1);
        assert_eq!(report.stats.retries, 6);
        assert_eq!(docs[0].scores.total, Some(68.0));
        assert_eq!(scripted.call_count(), 8);
    }

    #[tokio::test]
    async fn test_unhealthy_service_aborts_before_any_document() {
        let scripted = Arc::new(ScriptedClient::with_replies([RELEVANCE_REPLY]).unhealthy());
        let pipeline = EvaluationPipeline::new(scripted.clone(), &config());
        let mut docs = documents();
        docs[0].scores.total = Some(42.0);
        let ctx = RunContext::detached();

        let err = pipeline
            .run(&ctx, &mut docs, &keywords())
            .await
            .unwrap_err();

        assert!(matches!(err, RankError::ServiceUnavailable { .. }));
        assert_eq!(scripted.call_count(), 0);
        assert_eq!(ctx.api_calls(), 0);
        assert_eq!(docs[0].scores.total, Some(42.0));
        assert!(docs.iter().all(|d| d.scores.state == DocumentState::Collected));
    }

    #[tokio::test]
    async fn test_unscored_documents_follow_policy() {
        let mut cfg = config();
        cfg.quality.retry_budget = 1;
        cfg.quality.unscored = UnscoredPolicy::Neutral;
        let pipeline = EvaluationPipeline::new(client(Reply::Fail), &cfg);
        let mut docs = documents();

        let report = pipeline
            .run(&RunContext::detached(), &mut docs, &keywords())
            .await
            .unwrap();

        assert_eq!(report.stats.unscored, 2);
        assert_eq!(report.stats.retries, 2);
        assert_eq!(docs[0].scores.state, DocumentState::UnscoredFailure);
        assert_eq!(docs[0].scores.technical, Some(10.0));
        assert_eq!(docs[0].scores.total, Some(50.0));
    }

    #[tokio::test]
    async fn test_unscored_left_blank_by_default() {
        let mut cfg = config();
        cfg.quality.retry_budget = 0;
        let pipeline = EvaluationPipeline::new(client(Reply::Fail), &cfg);
        let mut docs = documents();

        pipeline
            .run(&RunContext::detached(), &mut docs, &keywords())
            .await
            .unwrap();

        assert_eq!(docs[2].scores.state, DocumentState::UnscoredFailure);
        assert_eq!(docs[2].scores.technical, None);
        assert_eq!(docs[2].scores.total, None);
        assert!(docs[2].scores.included);
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_without_calls() {
        let scripted = client(Reply::Fail);
        let pipeline = EvaluationPipeline::new(scripted.clone(), &config());
        let (handle, signal) = CancelSignal::new();
        let ctx = RunContext::new(PricingTable::default(), signal, Arc::new(NoopProgress));
        handle.cancel();

        let err = pipeline
            .run(&ctx, &mut documents(), &keywords())
            .await
            .unwrap_err();
        assert!(matches!(err, RankError::Cancelled));
        assert_eq!(scripted.call_count(), 0);
    }

    #[tokio::test]
    async fn test_progress_events_cover_every_stage() {
        let (sink, mut rx) = ChannelProgress::new();
        let (_handle, signal) = CancelSignal::new();
        let ctx = RunContext::new(PricingTable::default(), signal, Arc::new(sink));
        let pipeline = EvaluationPipeline::new(client(Reply::Fail), &config());

        pipeline
            .run(&ctx, &mut documents(), &keywords())
            .await
            .unwrap();

        let mut stages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.run_id, ctx.run_id());
            stages.push(event.stage);
        }
        assert_eq!(stages.first(), Some(&Stage::HealthCheck));
        assert!(stages.contains(&Stage::Relevance));
        assert!(stages.contains(&Stage::Quality));
        assert_eq!(stages.last(), Some(&Stage::Complete));
    }

    #[tokio::test]
    async fn test_run_with_provider_persists_scores() {
        let quality = Reply::text(
            r#"[{"id": 1, "relevance": 16, "technical": 18, "novelty": 15, "impact": 16, "quality": 17},
                {"id": 2, "relevance": 12, "technical": 10, "novelty": 10, "impact": 10, "quality": 10}]"#,
        );
        let store = MemoryDocumentStore::new(documents());
        let pipeline = EvaluationPipeline::new(client(quality), &config());

        let report = pipeline
            .run_with_provider(&RunContext::detached(), &store, &keywords())
            .await
            .unwrap();

        assert_eq!(report.stats.scored, 2);
        let saved = store.snapshot();
        assert_eq!(saved[2].scores.state, DocumentState::Scored);
        assert_eq!(saved[2].scores.total, Some(52.0));
    }
}
