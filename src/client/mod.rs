//! Model client module: capability rules, protocol adapters and pricing.

mod capability;
mod chat;
mod llm_client;
mod pricing;
mod responses;
mod router;

pub use capability::*;
pub use chat::*;
pub use llm_client::*;
pub use pricing::*;
pub use responses::*;
pub use router::*;
