//! Ensemble Stage 2: every document goes through the judge panel.

use crate::client::ModelClient;
use crate::context::RunContext;
use crate::models::{Config, Document, EnsembleResult, RankError, Result};
use crate::pipeline::{QualityOutcome, QualityStrategy};
use crate::pool::JudgePanel;
use crate::progress::Stage;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::info;

pub struct EnsembleStrategy {
    panel: JudgePanel,
    fast: bool,
    max_concurrency: usize,
    document_delay: Duration,
}

impl EnsembleStrategy {
    pub fn new(client: Arc<dyn ModelClient>, config: &Config) -> Self {
        Self {
            panel: JudgePanel::new(client, config),
            fast: config.quality.fast,
            max_concurrency: config.quality.max_concurrency.max(1),
            document_delay: Duration::from_millis(config.quality.batch_delay_ms),
        }
    }
}

#[async_trait]
impl QualityStrategy for EnsembleStrategy {
    fn name(&self) -> &'static str {
        "ensemble"
    }

    async fn evaluate(
        &self,
        ctx: &RunContext,
        keywords: &[String],
        documents: &[&Document],
    ) -> Result<QualityOutcome> {
        let total = documents.len();
        info!(
            documents = total,
            judges = self.panel.len(),
            fast = self.fast,
            "Stage 2: ensemble evaluation"
        );

        let buffer: DashMap<String, EnsembleResult> = DashMap::with_capacity(total);
        let done = AtomicUsize::new(0);

        if self.fast {
            let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
            let futures = documents.iter().map(|document| {
                let semaphore = Arc::clone(&semaphore);
                let buffer = &buffer;
                let done = &done;
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|e| RankError::Internal(e.to_string()))?;
                    if let Some(result) = self.panel.evaluate(ctx, keywords, document).await? {
                        buffer.insert(document.id.clone(), result);
                    }
                    let processed = done.fetch_add(1, Ordering::Relaxed) + 1;
                    ctx.emit(Stage::Quality, processed, total, 0, document.id.as_str());
                    Ok::<_, RankError>(())
                }
            });
            for outcome in join_all(futures).await {
                outcome?;
            }
        } else {
            for (index, document) in documents.iter().enumerate() {
                if index > 0 {
                    ctx.pause(self.document_delay).await?;
                }
                if let Some(result) = self.panel.evaluate(ctx, keywords, document).await? {
                    buffer.insert(document.id.clone(), result);
                }
                ctx.emit(Stage::Quality, index + 1, total, 0, document.id.as_str());
            }
        }

        Ok(QualityOutcome {
            results: buffer.into_iter().collect(),
            retries: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ModelRequest;
    use crate::models::{JudgeConfig, QualityMode, Specialty};
    use crate::testing::{Reply, ScriptedClient};

    fn config(fast: bool) -> Config {
        let mut config = Config::default();
        config.quality.mode = QualityMode::Ensemble;
        config.quality.fast = fast;
        config.quality.batch_delay_ms = 0;
        config.ensemble.meta_judge.enabled = false;
        config.ensemble.judges = ["a", "b"]
            .into_iter()
            .map(|id| JudgeConfig {
                id: id.into(),
                name: None,
                model: format!("judge-{id}"),
                weight: 1.0,
                specialty: Specialty::General,
                enabled: true,
                timeout_secs: 5,
                temperature: None,
                max_output_tokens: None,
            })
            .collect();
        config
    }

    /// Scores every document except those whose prompt mentions "Broken".
    fn client() -> Arc<ScriptedClient> {
        Arc::new(ScriptedClient::from_fn(|request: &ModelRequest| {
            if request.prompt.contains("Broken") {
                Reply::Fail
            } else {
                Reply::text(
                    r#"{"relevance": 14, "technical": 12, "novelty": 11, "impact": 10, "quality": 13}"#,
                )
            }
        }))
    }

    fn documents() -> Vec<Document> {
        vec![
            Document::new("doc-1", "Fine", "s"),
            Document::new("doc-2", "Broken", "s"),
            Document::new("doc-3", "Fine too", "s"),
        ]
    }

    #[tokio::test]
    async fn test_sequential_scores_each_document() {
        let scripted = client();
        let strategy = EnsembleStrategy::new(scripted.clone(), &config(false));
        let docs = documents();
        let refs: Vec<&Document> = docs.iter().collect();

        let outcome = strategy
            .evaluate(&RunContext::detached(), &[], &refs)
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 2);
        assert!(!outcome.results.contains_key("doc-2"));
        assert_eq!(outcome.results["doc-1"].num_judges(), 2);
        assert_eq!(scripted.call_count(), 6);
    }

    #[tokio::test]
    async fn test_fast_mode_matches_sequential() {
        let strategy = EnsembleStrategy::new(client(), &config(true));
        let docs = documents();
        let refs: Vec<&Document> = docs.iter().collect();

        let outcome = strategy
            .evaluate(&RunContext::detached(), &[], &refs)
            .await
            .unwrap();

        let mut ids: Vec<_> = outcome.results.keys().cloned().collect();
        ids.sort();
        assert_eq!(ids, vec!["doc-1", "doc-3"]);
        assert_eq!(outcome.results["doc-3"].scores.quality, 13.0);
    }
}
