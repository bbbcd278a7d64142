//! Persistence Adapter: hand each final question to a [`QuestionSink`].
//!
//! Every record is saved independently. A failed save is logged and
//! recorded in the [`SaveReport`]; the remaining records are still saved and
//! nothing already saved is rolled back.

use crate::error::PersistError;
use crate::output::{SaveFailure, SaveReport};
use crate::question::{FinalQuestion, QuestionRecord};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Stores one question record and returns its id.
#[async_trait]
pub trait QuestionSink: Send + Sync {
    async fn save(&self, record: &QuestionRecord) -> Result<String, PersistError>;
}

/// Save every question in order, continuing past failures.
pub async fn persist_all(questions: &[FinalQuestion], sink: &dyn QuestionSink) -> SaveReport {
    let mut report = SaveReport::default();
    for q in questions {
        match sink.save(&q.to_record()).await {
            Ok(id) => {
                debug!("Saved '{}' as {}", q.signature, id);
                report.saved_ids.push(id);
            }
            Err(e) => {
                warn!("Failed to save question '{}': {}", q.signature, e);
                report.failures.push(SaveFailure {
                    signature: q.signature.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    info!(
        "Persisted {}/{} questions ({} failed)",
        report.saved(),
        questions.len(),
        report.failed()
    );
    report
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── JSONL ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StoredRecord<'a> {
    id: &'a str,
    #[serde(flatten)]
    record: &'a QuestionRecord,
}

/// Appends one JSON object per line: `{"id": ..., "examId": ..., ...}`.
pub struct JsonlSink {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlSink {
    /// Lines are appended; an existing file is kept.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl QuestionSink for JsonlSink {
    async fn save(&self, record: &QuestionRecord) -> Result<String, PersistError> {
        let id = new_id();
        let mut line = serde_json::to_string(&StoredRecord { id: &id, record })
            .map_err(|e| PersistError::Serialize(e.to_string()))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PersistError::Write(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| PersistError::Write(format!("{}: {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| PersistError::Write(e.to_string()))?;
        Ok(id)
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

/// Keeps records in memory, in save order.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(String, QuestionRecord)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of `(id, record)` pairs.
    pub fn records(&self) -> Vec<(String, QuestionRecord)> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QuestionSink for MemorySink {
    async fn save(&self, record: &QuestionRecord) -> Result<String, PersistError> {
        let id = new_id();
        self.records
            .lock()
            .map_err(|_| PersistError::Write("memory sink poisoned".into()))?
            .push((id.clone(), record.clone()));
        Ok(id)
    }
}

/// Accepts and discards everything.
pub struct NullSink;

#[async_trait]
impl QuestionSink for NullSink {
    async fn save(&self, _record: &QuestionRecord) -> Result<String, PersistError> {
        Ok(new_id())
    }
}
