//! Core types for runs: request, per-engine response, configuration, result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::Engine;

/// Hard cap on configured parallelism.
pub const MAX_CONCURRENCY: usize = 64;

/// One prompt to execute across the configured engine set.
///
/// Constructed once per run and shared read-only across all dispatches.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Open key-value bag for caller bookkeeping; never interpreted here.
    pub metadata: HashMap<String, String>,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            metadata: HashMap::new(),
        }
    }

    pub fn system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Token accounting reported by a backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Terminal outcome of one engine within a run.
///
/// Exactly one of `content` / `error` is meaningful: a response either
/// carries generated text or the normalized failure that ended its attempt
/// loop. `execution_time_ms` is always set (0 on immediate failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    pub content: String,
    pub model: String,
    pub engine: String,
    pub timestamp: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub token_usage: Option<TokenUsage>,
    pub error: Option<String>,
}

impl EngineResponse {
    /// Build a failure response with the error normalized into `.error`.
    pub fn failure(
        engine: &str,
        model: &str,
        error: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            content: String::new(),
            model: model.to_string(),
            engine: engine.to_string(),
            timestamp: Utc::now(),
            execution_time_ms: elapsed.as_millis() as u64,
            token_usage: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Where a run's aggregated results are persisted.
#[derive(Debug, Clone, Default)]
pub enum SinkConfig {
    /// Discard results (metrics and the returned RunResult still exist).
    #[default]
    Noop,
    /// One JSON document per run under this directory.
    JsonDir(std::path::PathBuf),
    /// In-memory sink, for tests.
    Memory,
}

/// Execution policy for one run. Read-only after construction.
#[derive(Clone)]
pub struct RunConfig {
    /// Ordered engine set; dispatch order in sequential mode.
    pub engines: Vec<(String, Arc<dyn Engine>)>,
    pub concurrent: bool,
    pub max_concurrency: usize,
    /// Per-attempt wait bound. Zero disables the timeout race entirely.
    pub timeout: Duration,
    /// Additional attempts after the first; `retries + 1` total.
    pub retries: u32,
    /// Backoff unit; attempt `n` waits `n × retry_base_delay` before retrying.
    pub retry_base_delay: Duration,
    /// When false, the first terminal per-engine failure aborts the run.
    pub continue_on_error: bool,
    pub sink: SinkConfig,
}

impl RunConfig {
    pub fn new(engines: Vec<(String, Arc<dyn Engine>)>) -> Self {
        Self {
            engines,
            concurrent: true,
            max_concurrency: 4,
            timeout: Duration::from_secs(120),
            retries: 2,
            retry_base_delay: Duration::from_millis(500),
            continue_on_error: true,
            sink: SinkConfig::Noop,
        }
    }

    pub fn sequential(mut self) -> Self {
        self.concurrent = false;
        self
    }

    pub fn max_concurrency(mut self, k: usize) -> Self {
        self.max_concurrency = k;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.continue_on_error = false;
        self
    }

    pub fn sink(mut self, sink: SinkConfig) -> Self {
        self.sink = sink;
        self
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field(
                "engines",
                &self.engines.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field("concurrent", &self.concurrent)
            .field("max_concurrency", &self.max_concurrency)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("continue_on_error", &self.continue_on_error)
            .finish()
    }
}

/// Summary handed back to the caller after a run completes.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// True iff at least one engine produced a non-error response.
    pub success: bool,
    pub run_id: String,
    /// Keyed by engine name; consumers must treat it as unordered.
    pub results: HashMap<String, EngineResponse>,
    pub execution_time_ms: u64,
    /// Flat copy of every terminal failure, for quick inspection.
    pub errors: Vec<String>,
}

/// Dispatch state, reported through the progress observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Pending,
    Running,
    Retrying,
    TimedOut,
    Success,
    Failed,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Pending => "pending",
            DispatchStatus::Running => "running",
            DispatchStatus::Retrying => "retrying",
            DispatchStatus::TimedOut => "timed_out",
            DispatchStatus::Success => "success",
            DispatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchStatus::Success | DispatchStatus::Failed)
    }
}

/// One progress notification: an engine reached a terminal outcome.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub engine: String,
    pub status: DispatchStatus,
    /// Present on success.
    pub result: Option<EngineResponse>,
    /// Present on failure.
    pub error: Option<String>,
    /// Engines settled so far, including this one.
    pub completed: usize,
    pub total: usize,
}

/// Reject configurations the runner cannot honor.
pub fn validate_run_config(config: &RunConfig) -> Result<(), String> {
    if config.engines.is_empty() {
        return Err("engines must not be empty".into());
    }
    if config.max_concurrency == 0 {
        return Err("max_concurrency must be >= 1".into());
    }
    if config.max_concurrency > MAX_CONCURRENCY {
        return Err(format!("max_concurrency must be <= {MAX_CONCURRENCY}"));
    }

    let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for (name, _) in &config.engines {
        if !seen.insert(name.as_str()) {
            return Err(format!("duplicate engine name: {name}"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{create_engine_with_config, EngineConfig, EngineKind};

    fn stub_engine(name: &str) -> (String, Arc<dyn Engine>) {
        let config = EngineConfig::new(name, name, EngineKind::Custom).base_url("http://localhost:1");
        (name.to_string(), create_engine_with_config(config).unwrap())
    }

    #[test]
    fn validate_rejects_empty_engine_set() {
        let config = RunConfig::new(Vec::new());
        assert!(validate_run_config(&config).is_err());
    }

    #[test]
    fn validate_rejects_duplicate_engine_names() {
        let config = RunConfig::new(vec![stub_engine("a"), stub_engine("a")]);
        let err = validate_run_config(&config).unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn validate_rejects_concurrency_zero() {
        let config = RunConfig::new(vec![stub_engine("a")]).max_concurrency(0);
        assert!(validate_run_config(&config).is_err());
    }

    #[test]
    fn validate_rejects_concurrency_too_high() {
        let config = RunConfig::new(vec![stub_engine("a")]).max_concurrency(MAX_CONCURRENCY + 1);
        assert!(validate_run_config(&config).is_err());
    }

    #[test]
    fn validate_accepts_reasonable_config() {
        let config = RunConfig::new(vec![stub_engine("a"), stub_engine("b")])
            .max_concurrency(2)
            .retries(1)
            .fail_fast();
        validate_run_config(&config).unwrap();
    }

    #[test]
    fn failure_response_captures_error() {
        let resp = EngineResponse::failure("e", "m", "boom", Duration::from_millis(5));
        assert!(!resp.is_success());
        assert_eq!(resp.error.as_deref(), Some("boom"));
        assert!(resp.content.is_empty());
    }
}
