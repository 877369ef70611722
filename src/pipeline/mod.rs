//! Pipeline module - the two-stage evaluation run and its Stage 2 strategies.

mod ensemble;
mod retry;
mod run;
mod scoring;
mod strategy;
mod unified;

pub use ensemble::*;
pub use retry::*;
pub use run::*;
pub use scoring::*;
pub use strategy::*;
pub use unified::*;
