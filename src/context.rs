//! Per-run state threaded through every stage.
//!
//! Epistemic foundation:
//! - K_i: Counters belong to one run; nothing is process-global
//! - I^B: Every model call may hang → it races the cancel signal and a timeout
//! - I^R: Caller supplies the progress sink and owns the cancel handle

use crate::client::{ModelClient, ModelRequest, ModelResponse, PricingTable};
use crate::models::{RankError, Result};
use crate::progress::{NoopProgress, ProgressEvent, ProgressSink, Stage};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

/// Sender half of the run cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Cancel the run. In-flight calls resolve to `RankError::Cancelled`.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiver half of the run cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the run is cancelled. Pends forever if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Fail fast between units of work.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RankError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Run-scoped counters, cost accounting, cancellation and progress.
pub struct RunContext {
    run_id: String,
    started: Instant,
    pricing: PricingTable,
    cancel: CancelSignal,
    progress: Arc<dyn ProgressSink>,
    api_calls: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    // Microdollars, so the total can be updated atomically
    cost_micros: AtomicU64,
}

impl RunContext {
    pub fn new(pricing: PricingTable, cancel: CancelSignal, progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started: Instant::now(),
            pricing,
            cancel,
            progress,
            api_calls: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            cost_micros: AtomicU64::new(0),
        }
    }

    /// Context with default pricing, a cancel signal nobody fires, and no
    /// progress output.
    pub fn detached() -> Self {
        let (_handle, signal) = CancelSignal::new();
        Self::new(PricingTable::default(), signal, Arc::new(NoopProgress))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Account for one completed model call.
    pub fn record(&self, model: &str, response: &ModelResponse) {
        let cost = self
            .pricing
            .estimate(model, response.input_tokens, response.output_tokens);
        self.input_tokens
            .fetch_add(response.input_tokens as u64, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(response.output_tokens as u64, Ordering::Relaxed);
        self.cost_micros
            .fetch_add((cost * 1_000_000.0).round() as u64, Ordering::Relaxed);
    }

    /// Issue one model call, bounded by `timeout` and the cancel signal.
    ///
    /// The call is counted whether or not it succeeds; tokens and cost are
    /// recorded only for successful responses.
    pub async fn call(
        &self,
        client: &dyn ModelClient,
        request: &ModelRequest,
        timeout: Duration,
    ) -> Result<ModelResponse> {
        self.cancel.check()?;
        self.api_calls.fetch_add(1, Ordering::Relaxed);

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RankError::Cancelled),
            result = tokio::time::timeout(timeout, client.generate(request)) => {
                result.map_err(|_| RankError::Timeout(timeout))??
            }
        };

        debug!(
            model = %request.model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            duration_ms = response.duration.as_millis() as u64,
            "Model call completed"
        );
        self.record(&request.model, &response);
        Ok(response)
    }

    /// Pacing delay between batches; cut short by cancellation.
    pub async fn pause(&self, delay: Duration) -> Result<()> {
        if delay.is_zero() {
            return self.cancel.check();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RankError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    pub fn emit(&self, stage: Stage, processed: usize, total: usize, relevant: usize, message: impl Into<String>) {
        self.progress.emit(ProgressEvent {
            run_id: self.run_id.clone(),
            stage,
            processed,
            total,
            relevant,
            message: message.into(),
        });
    }

    pub fn api_calls(&self) -> u64 {
        self.api_calls.load(Ordering::Relaxed)
    }

    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.input_tokens.load(Ordering::Relaxed),
            self.output_tokens.load(Ordering::Relaxed),
        )
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedClient;

    #[tokio::test]
    async fn test_call_records_usage_and_cost() {
        let client = ScriptedClient::with_replies(["{}"]).with_usage(1_000_000, 0);
        let ctx = RunContext::detached();

        ctx.call(&client, &ModelRequest::new("gpt-4o-mini", "", "x"), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(ctx.api_calls(), 1);
        assert_eq!(ctx.total_tokens(), (1_000_000, 0));
        assert!((ctx.total_cost_usd() - 0.15).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let client = ScriptedClient::with_replies(["{}"]).with_delay(Duration::from_millis(200));
        let ctx = RunContext::detached();

        let err = ctx
            .call(&client, &ModelRequest::new("gpt-4o", "", "x"), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, RankError::Timeout(_)));
        assert_eq!(ctx.api_calls(), 1);
        assert_eq!(ctx.total_tokens(), (0, 0));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_call() {
        let client = ScriptedClient::with_replies(["{}"]).with_delay(Duration::from_secs(30));
        let (handle, signal) = CancelSignal::new();
        let ctx = RunContext::new(PricingTable::default(), signal, Arc::new(NoopProgress));

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        let err = ctx
            .call(&client, &ModelRequest::new("gpt-4o", "", "x"), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, RankError::Cancelled));
        canceller.await.unwrap();

        // Later calls fail before reaching the client
        assert!(matches!(
            ctx.call(&client, &ModelRequest::new("gpt-4o", "", "x"), Duration::from_secs(1))
                .await,
            Err(RankError::Cancelled)
        ));
        assert_eq!(ctx.api_calls(), 1);
    }
}
