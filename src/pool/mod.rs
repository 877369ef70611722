//! Judge pool: single-judge evaluation, arbitration and aggregation.

mod aggregator;
mod arbiter;
mod ensemble;
mod judge;

pub use aggregator::*;
pub use arbiter::*;
pub use ensemble::*;
pub use judge::*;
