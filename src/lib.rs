#![forbid(unsafe_code)]

//! # chorus-harness
//!
//! Dispatch one prompt to many text-generation backends at once.
//!
//! A single [`PromptRequest`] fans out to an arbitrary set of
//! independently-failing, independently-slow engines under a bounded-
//! concurrency policy. Each engine dispatch gets its own retry-with-backoff
//! and timeout budget; partial failure is tolerated and the surviving
//! responses are aggregated into one [`RunResult`] plus a derived
//! [`PerformanceRecord`] (cost, heuristic quality, task complexity).
//!
//! The orchestration core is [`Runner`]. Backends plug in through the
//! [`Engine`] trait; results persist through the narrow [`ResultSink`]
//! contract; run-level metrics accumulate in a SQLite time series for
//! trend and cost reporting.

pub mod engine;
pub mod gate;
pub mod metrics;
pub mod runner;
pub mod sink;

pub use engine::{create_engine, Engine, EngineConfig, EngineKind};
pub use gate::ConcurrencyGate;
pub use metrics::{derive_performance, ModelPerformance, PerformanceRecord, SqliteMetricsStore};
pub use runner::{
    validate_run_config, DispatchStatus, EngineResponse, NoopProgressObserver, ProgressObserver,
    ProgressUpdate, PromptRequest, RunConfig, RunError, RunResult, Runner, SinkConfig, TokenUsage,
};
pub use sink::{build_sink, JsonFileSink, MemorySink, NoopSink, ResultSink, SaveReceipt};
