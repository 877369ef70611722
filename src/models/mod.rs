//! Core data models for rankwise.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Concrete types with compile-time guarantees (axes, states)
//! - B_i (Beliefs): Model output, wrapped in Result/Option until parsed and clamped
//! - I^R (Resolvable): Config parameters
//! - I^B (Bounded): Error variants with stage-specific fallbacks

mod config;
mod document;
mod error;
mod evaluation;

pub use config::*;
pub use document::*;
pub use error::*;
pub use evaluation::*;
