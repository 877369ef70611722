//! Document storage behind the pipeline.
//!
//! Provides:
//! - `DocumentProvider`: load a document set and persist the scored result
//! - `JsonlDocumentStore`: one JSON document per line, atomic writes
//! - `MemoryDocumentStore`: in-process store for embedding and tests

mod jsonl;
mod memory;

pub use jsonl::*;
pub use memory::*;

use crate::models::{Document, Result};
use async_trait::async_trait;

/// Read/write-through access to the documents of a run. The pipeline never
/// owns storage; it loads, mutates in memory, and hands the result back.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn load(&self) -> Result<Vec<Document>>;

    async fn persist(&self, documents: &[Document]) -> Result<()>;
}
