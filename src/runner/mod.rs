//! Run orchestrator.
//!
//! Wires together:
//! - the engine set (polymorphic backends behind [`Engine`])
//! - the concurrency gate (bounded, FIFO-fair fan-out)
//! - the per-engine retry/timeout attempt loop
//! - metrics derivation and result persistence
//!
//! Per-dispatch state machine:
//! `PENDING -> RUNNING -> (SUCCESS | RETRYING -> RUNNING | TIMED_OUT ->
//! RETRYING|FAILED | FAILED)`. Every dispatch ends in exactly one terminal
//! response recorded under its engine name, unless a fail-fast abort stops
//! it from ever starting.

pub mod observer;
pub mod types;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;

use crate::engine::Engine;
use crate::gate::ConcurrencyGate;
use crate::metrics::{derive_performance, SqliteMetricsStore};
use crate::sink::{build_sink, ResultSink, SinkError};

pub use observer::{NoopProgressObserver, ProgressObserver};
pub use types::{
    validate_run_config, DispatchStatus, EngineResponse, ProgressUpdate, PromptRequest, RunConfig,
    RunResult, SinkConfig, TokenUsage, MAX_CONCURRENCY,
};

/// Pause between dispatches in sequential mode, to avoid bursty
/// rate-limit triggers on providers shared across engines.
const SEQUENTIAL_DISPATCH_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid run config: {0}")]
    InvalidConfig(String),

    /// Fail-fast abort: engine `engine` failed terminally and
    /// `continue_on_error` was false. Carries whatever results had already
    /// settled when the run stopped.
    #[error("engine '{engine}' failed: {message}")]
    EngineFailed {
        engine: String,
        message: String,
        partial: HashMap<String, EngineResponse>,
    },

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Orchestrates one run at a time: owns no state beyond a single run's
/// execution, so a Runner can be reused or rebuilt freely.
pub struct Runner {
    config: RunConfig,
    sink: Arc<dyn ResultSink>,
    observer: Arc<dyn ProgressObserver>,
    metrics_store: Option<SqliteMetricsStore>,
}

impl Runner {
    pub fn new(config: RunConfig) -> Self {
        let sink = build_sink(&config.sink);
        Self {
            config,
            sink,
            observer: Arc::new(NoopProgressObserver),
            metrics_store: None,
        }
    }

    /// Replace the sink built from `SinkConfig` (tests, embedders).
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Attach a metrics store; every completed run appends one record.
    pub fn with_metrics_store(mut self, store: SqliteMetricsStore) -> Self {
        self.metrics_store = Some(store);
        self
    }

    /// Liveness probe over all registered engines, run concurrently.
    pub async fn engine_status(&self) -> HashMap<String, bool> {
        let probes = self.config.engines.iter().map(|(name, engine)| async move {
            (name.clone(), engine.is_available().await)
        });
        futures::future::join_all(probes).await.into_iter().collect()
    }

    /// Execute the request against the configured engine set.
    ///
    /// A per-attempt timeout bounds caller-side wait, not remote work: the
    /// racing future is dropped on expiry (which aborts the HTTP request
    /// client-side), but the provider may still complete and bill the call.
    ///
    /// Returns `Err(RunError::EngineFailed)` only in the fail-fast
    /// configuration; otherwise every run completes with partial results
    /// and `RunResult::success` reflects whether any engine succeeded.
    pub async fn run(&self, request: PromptRequest) -> Result<RunResult, RunError> {
        validate_run_config(&self.config).map_err(RunError::InvalidConfig)?;

        self.sink.initialize().await?;

        let run_start = Instant::now();
        let request = Arc::new(request);

        let results = if self.config.concurrent {
            self.run_concurrent(&request).await?
        } else {
            self.run_sequential(&request).await?
        };

        let errors: Vec<String> = self
            .config
            .engines
            .iter()
            .filter_map(|(name, _)| results.get(name))
            .filter_map(|r| r.error.clone())
            .collect();
        let success = results.values().any(|r| r.is_success());

        let engine_names: Vec<String> = self
            .config
            .engines
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        let receipt = self
            .sink
            .save_results(&request, &engine_names, &results)
            .await?;

        let run_result = RunResult {
            success,
            run_id: receipt.run_id,
            results,
            execution_time_ms: run_start.elapsed().as_millis() as u64,
            errors,
        };

        let record = derive_performance(&run_result, &request.prompt);
        if let Some(store) = &self.metrics_store {
            // Metrics are advisory: a store failure must not fail the run.
            if let Err(e) = store.append(&record).await {
                tracing::warn!(run_id = %run_result.run_id, error = %e, "Failed to append metrics record");
            }
        }

        Ok(run_result)
    }

    async fn run_concurrent(
        &self,
        request: &Arc<PromptRequest>,
    ) -> Result<HashMap<String, EngineResponse>, RunError> {
        let total = self.config.engines.len();
        let gate = ConcurrencyGate::new(self.config.max_concurrency);
        let abort = AtomicBool::new(false);
        let abort = &abort;
        let completed = AtomicUsize::new(0);
        let completed = &completed;
        let gate = &gate;

        let dispatches = self.config.engines.iter().map(|(name, engine)| {
            let request = request.clone();
            async move {
                // An engine whose dispatch never started stays absent from
                // the results map under a fail-fast abort.
                if abort.load(AtomicOrdering::Relaxed) {
                    return None;
                }
                let permit = gate.acquire().await;
                if abort.load(AtomicOrdering::Relaxed) {
                    return None;
                }

                let response = self.attempt_loop(name, engine.as_ref(), &request).await;
                drop(permit);

                if !response.is_success() && !self.config.continue_on_error {
                    abort.store(true, AtomicOrdering::Relaxed);
                }

                let done = completed.fetch_add(1, AtomicOrdering::Relaxed) + 1;
                self.emit_progress(name, &response, done, total).await;
                Some((name.clone(), response))
            }
        });

        let settled: HashMap<String, EngineResponse> = futures::future::join_all(dispatches)
            .await
            .into_iter()
            .flatten()
            .collect();

        if !self.config.continue_on_error {
            if let Some((name, response)) = self
                .config
                .engines
                .iter()
                .filter_map(|(n, _)| settled.get(n).map(|r| (n, r)))
                .find(|(_, r)| !r.is_success())
            {
                return Err(RunError::EngineFailed {
                    engine: name.clone(),
                    message: response.error.clone().unwrap_or_default(),
                    partial: settled,
                });
            }
        }

        Ok(settled)
    }

    async fn run_sequential(
        &self,
        request: &Arc<PromptRequest>,
    ) -> Result<HashMap<String, EngineResponse>, RunError> {
        let total = self.config.engines.len();
        let mut results: HashMap<String, EngineResponse> = HashMap::with_capacity(total);

        for (idx, (name, engine)) in self.config.engines.iter().enumerate() {
            if idx > 0 {
                sleep(SEQUENTIAL_DISPATCH_DELAY).await;
            }

            let response = self.attempt_loop(name, engine.as_ref(), request).await;
            self.emit_progress(name, &response, idx + 1, total).await;

            let failed = !response.is_success();
            let message = response.error.clone().unwrap_or_default();
            results.insert(name.clone(), response);

            if failed && !self.config.continue_on_error {
                return Err(RunError::EngineFailed {
                    engine: name.clone(),
                    message,
                    partial: results,
                });
            }
        }

        Ok(results)
    }

    /// Per-engine retry/timeout state machine: at most `retries + 1`
    /// attempts, each racing the engine call against the configured timer,
    /// with a linear `attempt x base_delay` backoff between attempts.
    async fn attempt_loop(
        &self,
        name: &str,
        engine: &dyn Engine,
        request: &PromptRequest,
    ) -> EngineResponse {
        let total_attempts = self.config.retries + 1;
        let model = engine.config().model.clone();
        let mut last: Option<EngineResponse> = None;

        for attempt in 1..=total_attempts {
            let response = if self.config.timeout.is_zero() {
                engine.execute(request).await
            } else {
                match tokio::time::timeout(self.config.timeout, engine.execute(request)).await {
                    Ok(response) => response,
                    Err(_) => EngineResponse::failure(
                        name,
                        &model,
                        format!("timed out after {}ms", self.config.timeout.as_millis()),
                        self.config.timeout,
                    ),
                }
            };

            if response.is_success() {
                return response;
            }

            tracing::debug!(
                engine = %name,
                attempt,
                total_attempts,
                error = response.error.as_deref().unwrap_or(""),
                "Attempt failed"
            );
            last = Some(response);

            if attempt < total_attempts {
                sleep(self.config.retry_base_delay * attempt).await;
            }
        }

        // total_attempts >= 1, so at least one failure was recorded.
        last.unwrap_or_else(|| {
            EngineResponse::failure(name, &model, "no attempts made", Duration::ZERO)
        })
    }

    async fn emit_progress(&self, name: &str, response: &EngineResponse, done: usize, total: usize) {
        let (status, result, error) = if response.is_success() {
            (DispatchStatus::Success, Some(response.clone()), None)
        } else {
            (DispatchStatus::Failed, None, response.error.clone())
        };
        self.observer
            .on_progress(ProgressUpdate {
                engine: name.to_string(),
                status,
                result,
                error,
                completed: done,
                total,
            })
            .await;
    }
}
