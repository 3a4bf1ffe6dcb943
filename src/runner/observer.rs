//! Progress reporting hook for run consumers.
//!
//! The runner stays UI-agnostic: callers that want live progress (CLI
//! spinners, dashboards, logs) inject an observer; everyone else gets the
//! no-op default.

use async_trait::async_trait;

use super::types::ProgressUpdate;

#[async_trait]
pub trait ProgressObserver: Send + Sync {
    /// Called once per engine when its dispatch reaches a terminal outcome.
    /// Fire-and-forget: observer failures must not affect the run.
    async fn on_progress(&self, update: ProgressUpdate);
}

/// Default observer that discards all updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressObserver;

#[async_trait]
impl ProgressObserver for NoopProgressObserver {
    async fn on_progress(&self, _update: ProgressUpdate) {}
}
