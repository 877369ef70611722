use crate::models::{Document, Result};
use crate::store::DocumentProvider;
use async_trait::async_trait;
use std::sync::Mutex;

/// Documents held in memory; `persist` replaces the held set.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<Vec<Document>>,
}

impl MemoryDocumentStore {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents: Mutex::new(documents),
        }
    }

    /// Copy of the current documents.
    pub fn snapshot(&self) -> Vec<Document> {
        self.documents
            .lock()
            .map(|d| d.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl DocumentProvider for MemoryDocumentStore {
    async fn load(&self) -> Result<Vec<Document>> {
        Ok(self.snapshot())
    }

    async fn persist(&self, documents: &[Document]) -> Result<()> {
        let mut held = self
            .documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *held = documents.to_vec();
        Ok(())
    }
}
