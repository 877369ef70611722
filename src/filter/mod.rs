//! Stage 1 relevance filtering.

mod relevance;

pub use relevance::*;
