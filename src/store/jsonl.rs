//! JSONL document store.
//!
//! Epistemic foundation:
//! - K_i: One document per line; blank lines are skipped
//! - K_i: Output is written to a temp file and renamed into place
//! - I^B: Crash during write → the previous output survives as `.bak`

use crate::models::{Document, RankError, Result};
use crate::store::DocumentProvider;
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reads documents from `input` and writes scored documents to `output`.
/// Both may be the same path.
#[derive(Debug, Clone)]
pub struct JsonlDocumentStore {
    input: PathBuf,
    output: PathBuf,
}

impl JsonlDocumentStore {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    /// Store that rewrites its input in place.
    pub fn in_place(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(path.clone(), path)
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    fn backup_path(&self) -> PathBuf {
        sibling(&self.output, "bak")
    }

    fn temp_path(&self) -> PathBuf {
        sibling(&self.output, "tmp")
    }

    pub fn read_documents(path: &Path) -> Result<Vec<Document>> {
        let file = File::open(path).map_err(|e| RankError::io("opening documents file", e))?;
        let reader = BufReader::new(file);
        let mut documents = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| RankError::io("reading documents file", e))?;
            if line.trim().is_empty() {
                continue;
            }
            let document: Document = serde_json::from_str(&line)
                .map_err(|e| RankError::Parse(format!("Line {}: {}", line_num + 1, e)))?;
            documents.push(document);
        }

        info!(count = documents.len(), path = %path.display(), "Loaded documents");
        Ok(documents)
    }

    pub fn write_documents(&self, documents: &[Document]) -> Result<()> {
        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| RankError::io("creating output dir", e))?;
        }

        if self.output.exists() {
            fs::copy(&self.output, self.backup_path())
                .map_err(|e| RankError::io("backing up output", e))?;
        }

        let temp_path = self.temp_path();
        let file =
            File::create(&temp_path).map_err(|e| RankError::io("creating temp output", e))?;
        let mut writer = BufWriter::new(file);
        for document in documents {
            let json = serde_json::to_string(document)
                .map_err(|e| RankError::Internal(format!("Failed to serialize document: {}", e)))?;
            writeln!(writer, "{}", json).map_err(|e| RankError::io("writing output", e))?;
        }
        writer
            .flush()
            .map_err(|e| RankError::io("flushing output", e))?;
        drop(writer);

        fs::rename(&temp_path, &self.output).map_err(|e| RankError::io("renaming output", e))?;

        debug!(count = documents.len(), path = %self.output.display(), "Documents saved");
        Ok(())
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(extension);
    path.with_file_name(name)
}

#[async_trait]
impl DocumentProvider for JsonlDocumentStore {
    async fn load(&self) -> Result<Vec<Document>> {
        Self::read_documents(&self.input)
    }

    async fn persist(&self, documents: &[Document]) -> Result<()> {
        self.write_documents(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentState;
    use tempfile::tempdir;

    fn write_lines(path: &Path, lines: &[&str]) {
        fs::write(path, lines.join("\n")).unwrap();
    }

    #[tokio::test]
    async fn test_load_skips_blank_lines_and_defaults_scores() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("docs.jsonl");
        write_lines(
            &path,
            &[
                r#"{"id": "a", "title": "Qubits", "summary": "s"}"#,
                "",
                r#"{"id": "b", "title": "Ions", "summary": "s", "content": "long body"}"#,
            ],
        );

        let docs = JsonlDocumentStore::in_place(&path).load().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].content.as_deref(), Some("long body"));
        assert_eq!(docs[0].scores.state, DocumentState::Collected);
        assert!(docs[0].scores.included);
    }

    #[tokio::test]
    async fn test_bad_line_reports_line_number() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("docs.jsonl");
        write_lines(&path, &[r#"{"id": "a", "title": "t", "summary": "s"}"#, "{not json"]);

        let err = JsonlDocumentStore::in_place(&path).load().await.unwrap_err();
        match err {
            RankError::Parse(msg) => assert!(msg.starts_with("Line 2")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_persist_writes_atomically_with_backup() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out").join("scored.jsonl");
        write_lines(&input, &[r#"{"id": "a", "title": "t", "summary": "s"}"#]);
        let store = JsonlDocumentStore::new(&input, &output);

        let mut docs = store.load().await.unwrap();
        store.persist(&docs).await.unwrap();
        docs[0].scores.total = Some(77.0);
        store.persist(&docs).await.unwrap();

        let saved = JsonlDocumentStore::read_documents(&output).unwrap();
        assert_eq!(saved[0].scores.total, Some(77.0));
        let backup = JsonlDocumentStore::read_documents(&store.backup_path()).unwrap();
        assert_eq!(backup[0].scores.total, None);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_sibling_paths() {
        let store = JsonlDocumentStore::in_place("/data/scored.jsonl");
        assert_eq!(store.backup_path(), PathBuf::from("/data/scored.jsonl.bak"));
        assert_eq!(store.temp_path(), PathBuf::from("/data/scored.jsonl.tmp"));
    }
}
