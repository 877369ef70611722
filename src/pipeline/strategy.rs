//! Interchangeable Stage 2 strategies.

use crate::client::ModelClient;
use crate::context::RunContext;
use crate::models::{Config, Document, EnsembleResult, QualityMode, Result};
use crate::pipeline::{EnsembleStrategy, UnifiedStrategy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Results of one Stage 2 pass.
#[derive(Debug, Default)]
pub struct QualityOutcome {
    /// Final result per document id; documents without one are unscored
    pub results: HashMap<String, EnsembleResult>,
    /// Individual retries issued
    pub retries: usize,
}

/// A way of turning relevant documents into quality results.
///
/// Only fatal errors are returned; per-document failures show up as a
/// missing entry in [`QualityOutcome::results`].
#[async_trait]
pub trait QualityStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(
        &self,
        ctx: &RunContext,
        keywords: &[String],
        documents: &[&Document],
    ) -> Result<QualityOutcome>;
}

/// Strategy selected by `quality.mode`.
pub fn strategy_for(config: &Config, client: Arc<dyn ModelClient>) -> Box<dyn QualityStrategy> {
    match config.quality.mode {
        QualityMode::Unified => Box::new(UnifiedStrategy::new(client, config)),
        QualityMode::Ensemble => Box::new(EnsembleStrategy::new(client, config)),
    }
}
