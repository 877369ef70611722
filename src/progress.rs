//! Progress reporting.
//!
//! The pipeline emits [`ProgressEvent`]s through a [`ProgressSink`] and never
//! depends on how they are displayed. Sinks must be cheap and non-blocking:
//! they are called from inside stage loops.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Pipeline stage a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    HealthCheck,
    Relevance,
    Quality,
    Complete,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::HealthCheck => write!(f, "health check"),
            Stage::Relevance => write!(f, "relevance"),
            Stage::Quality => write!(f, "quality"),
            Stage::Complete => write!(f, "complete"),
        }
    }
}

/// One progress update.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub run_id: String,
    pub stage: Stage,
    /// Documents processed so far in this stage
    pub processed: usize,
    /// Documents in this stage
    pub total: usize,
    /// Documents judged relevant so far
    pub relevant: usize,
    pub message: String,
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events into an unbounded channel.
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.tx.send(event);
    }
}

/// Terminal progress bar, reset whenever the stage changes.
pub struct BarProgress {
    bar: ProgressBar,
    stage: Mutex<Option<Stage>>,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {prefix:>10} {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("##-"));
        }
        Self {
            bar,
            stage: Mutex::new(None),
        }
    }

    pub fn finish(&self) {
        self.bar.finish_with_message("done");
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut current) = self.stage.lock() {
            if *current != Some(event.stage) {
                *current = Some(event.stage);
                self.bar.reset();
                self.bar.set_prefix(event.stage.to_string());
            }
        }
        self.bar.set_length(event.total as u64);
        self.bar.set_position(event.processed as u64);
        self.bar.set_message(event.message);
    }
}

/// Latest known status of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub stage: Stage,
    pub processed: usize,
    pub total: usize,
    pub relevant: usize,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

/// Status board shared between concurrent runs, e.g. for a UI to poll.
///
/// Entries are removed by a delayed task scheduled with [`StatusBoard::evict_after`],
/// so finished runs stay visible for a while.
#[derive(Debug, Default)]
pub struct StatusBoard {
    runs: DashMap<String, RunStatus>,
}

impl StatusBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, run_id: &str) -> Option<RunStatus> {
        self.runs.get(run_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Schedule removal of a run's status after `delay`.
    pub fn evict_after(self: &Arc<Self>, run_id: impl Into<String>, delay: Duration) -> JoinHandle<()> {
        let board = Arc::clone(self);
        let run_id = run_id.into();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if board.runs.remove(&run_id).is_some() {
                debug!(run_id = %run_id, "Evicted run status");
            }
        })
    }
}

impl ProgressSink for StatusBoard {
    fn emit(&self, event: ProgressEvent) {
        self.runs.insert(
            event.run_id,
            RunStatus {
                stage: event.stage,
                processed: event.processed,
                total: event.total,
                relevant: event.relevant,
                message: event.message,
                updated_at: Utc::now(),
            },
        );
    }
}
