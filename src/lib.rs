//! rankwise - Two-stage LLM evaluation for ranking aggregated articles.
//!
//! ## Architecture
//!
//! A run moves every document through two stages:
//! - **Stage 1 (relevance)**: cheap batched triage against the run keywords;
//!   uncertain outcomes fail open
//! - **Stage 2 (quality)**: five-axis scoring of the survivors, either by one
//!   unified model with per-document retries or by a judge ensemble
//!   reconciled through arbitration or weighted aggregation
//!
//! The final total is the sum of the five clamped axes (0-100).
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (axes, document states)
//! - B_i (Beliefs): Model output, parsed and clamped before it is stored
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Transport and parse failures, absorbed per batch/document

pub mod client;
pub mod context;
pub mod filter;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod prompt;
pub mod store;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use client::{ModelClient, PricingTable, RoutedModelClient};
pub use context::{CancelHandle, CancelSignal, RunContext};
pub use filter::RelevanceFilter;
pub use models::{Config, Document, RankError, Result, RunStats};
pub use pipeline::{EvaluationPipeline, RunReport};
pub use pool::JudgePanel;
pub use progress::{BarProgress, ProgressSink};
pub use store::{DocumentProvider, JsonlDocumentStore};
