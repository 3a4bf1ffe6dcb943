//! Result persistence behind the narrow `save_results` contract.
//!
//! The runner depends only on [`ResultSink`]; where the data lands (JSON
//! documents, memory, nowhere) is the sink's business. Failures here are
//! real run failures: a caller who configured persistence gets told when it
//! did not happen.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::runner::{EngineResponse, PromptRequest, SinkConfig};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("sink lock poisoned")]
    Poisoned,
}

/// Identifier handed back after a successful save.
#[derive(Debug, Clone)]
pub struct SaveReceipt {
    pub run_id: String,
    /// Where the document landed, when the sink has a location at all.
    pub location: Option<PathBuf>,
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Prepare the sink (create directories, open handles). Idempotent.
    async fn initialize(&self) -> Result<(), SinkError>;

    async fn save_results(
        &self,
        request: &PromptRequest,
        engine_names: &[String],
        results: &HashMap<String, EngineResponse>,
    ) -> Result<SaveReceipt, SinkError>;
}

/// Build the sink a [`SinkConfig`](crate::runner::SinkConfig) names.
pub fn build_sink(config: &SinkConfig) -> Arc<dyn ResultSink> {
    match config {
        SinkConfig::Noop => Arc::new(NoopSink),
        SinkConfig::JsonDir(dir) => Arc::new(JsonFileSink::new(dir.clone())),
        SinkConfig::Memory => Arc::new(MemorySink::default()),
    }
}

/// On-disk document shape for one saved run.
#[derive(Debug, Clone, Serialize)]
pub struct SavedRun {
    pub run_id: String,
    pub saved_at: DateTime<Utc>,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub engine_names: Vec<String>,
    pub results: HashMap<String, EngineResponse>,
}

fn assemble(
    request: &PromptRequest,
    engine_names: &[String],
    results: &HashMap<String, EngineResponse>,
) -> SavedRun {
    SavedRun {
        run_id: Uuid::new_v4().to_string(),
        saved_at: Utc::now(),
        prompt: request.prompt.clone(),
        system_prompt: request.system_prompt.clone(),
        engine_names: engine_names.to_vec(),
        results: results.clone(),
    }
}

// =============================================================================
// IMPLEMENTATIONS
// =============================================================================

/// Discards results; still mints a run id so downstream reporting works.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl ResultSink for NoopSink {
    async fn initialize(&self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn save_results(
        &self,
        _request: &PromptRequest,
        _engine_names: &[String],
        _results: &HashMap<String, EngineResponse>,
    ) -> Result<SaveReceipt, SinkError> {
        Ok(SaveReceipt {
            run_id: Uuid::new_v4().to_string(),
            location: None,
        })
    }
}

/// One pretty-printed JSON document per run under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn initialize(&self) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn save_results(
        &self,
        request: &PromptRequest,
        engine_names: &[String],
        results: &HashMap<String, EngineResponse>,
    ) -> Result<SaveReceipt, SinkError> {
        let doc = assemble(request, engine_names, results);
        let path = self.dir.join(format!("run-{}.json", doc.run_id));
        let body =
            serde_json::to_vec_pretty(&doc).map_err(|e| SinkError::Serde(e.to_string()))?;
        tokio::fs::write(&path, body).await?;
        Ok(SaveReceipt {
            run_id: doc.run_id,
            location: Some(path),
        })
    }
}

/// Keeps saved runs in memory. For tests and embedders that want to
/// inspect what the runner persisted.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    saved: Arc<Mutex<Vec<SavedRun>>>,
}

impl MemorySink {
    pub fn saved_runs(&self) -> Result<Vec<SavedRun>, SinkError> {
        self.saved
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| SinkError::Poisoned)
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn initialize(&self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn save_results(
        &self,
        request: &PromptRequest,
        engine_names: &[String],
        results: &HashMap<String, EngineResponse>,
    ) -> Result<SaveReceipt, SinkError> {
        let doc = assemble(request, engine_names, results);
        let run_id = doc.run_id.clone();
        self.saved
            .lock()
            .map_err(|_| SinkError::Poisoned)?
            .push(doc);
        Ok(SaveReceipt {
            run_id,
            location: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_results() -> (PromptRequest, Vec<String>, HashMap<String, EngineResponse>) {
        let request = PromptRequest::new("hello");
        let mut results = HashMap::new();
        results.insert(
            "e1".to_string(),
            EngineResponse {
                content: "hi".into(),
                model: "m1".into(),
                engine: "e1".into(),
                timestamp: Utc::now(),
                execution_time_ms: 12,
                token_usage: None,
                error: None,
            },
        );
        (request, vec!["e1".to_string()], results)
    }

    #[tokio::test]
    async fn memory_sink_records_saved_runs() {
        let sink = MemorySink::default();
        let (request, names, results) = sample_results();

        sink.initialize().await.unwrap();
        let receipt = sink.save_results(&request, &names, &results).await.unwrap();

        let saved = sink.saved_runs().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].run_id, receipt.run_id);
        assert_eq!(saved[0].prompt, "hello");
        assert_eq!(saved[0].engine_names, names);
    }

    #[tokio::test]
    async fn json_file_sink_writes_one_document_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path());
        let (request, names, results) = sample_results();

        sink.initialize().await.unwrap();
        let receipt = sink.save_results(&request, &names, &results).await.unwrap();

        let path = receipt.location.expect("file sink reports a location");
        let body = std::fs::read_to_string(path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["run_id"], receipt.run_id.as_str());
        assert_eq!(parsed["results"]["e1"]["content"], "hi");
    }

    #[tokio::test]
    async fn noop_sink_still_mints_run_ids() {
        let sink = NoopSink;
        let (request, names, results) = sample_results();
        let a = sink.save_results(&request, &names, &results).await.unwrap();
        let b = sink.save_results(&request, &names, &results).await.unwrap();
        assert_ne!(a.run_id, b.run_id);
        assert!(a.location.is_none());
    }
}
