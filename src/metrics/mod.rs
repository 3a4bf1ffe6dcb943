//! Metrics derivation for completed runs.
//!
//! [`derive_performance`] is a pure function of a run's outcome: the same
//! `RunResult` always yields the same record (up to the capture timestamp).
//! Everything here is advisory reporting; the orchestrator never branches
//! on these numbers.

pub mod heuristics;
pub mod pricing;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runner::{RunResult, TokenUsage};

pub use heuristics::{quality_score, task_complexity};
pub use pricing::{chat_cost, estimate_tokens, get_pricing, ModelPricing};
pub use store::{MetricsSummary, SqliteMetricsStore, StoreError};

/// Per-engine slice of a performance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub engine: String,
    pub model: String,
    pub execution_time_ms: u64,
    pub token_usage: Option<TokenUsage>,
    pub cost_nanodollars: i64,
    /// [1,10] heuristic; `None` for failed responses.
    pub quality_score: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
}

/// Run-level metrics record, appended once per completed run.
/// Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    pub per_engine: Vec<ModelPerformance>,
    pub total_cost_nanodollars: i64,
    pub total_time_ms: u64,
    /// Fraction of engines with no error, in [0,1].
    pub success_rate: f64,
    /// Mean quality over successful engines, in [1,10]; `None` if all failed.
    pub avg_quality_score: Option<f64>,
    /// [1,10] heuristic over the original prompt.
    pub task_complexity: f64,
}

/// Convert a completed run into a performance record.
///
/// Cost uses provider-reported token counts when present, falling back to
/// a ~4 chars/token estimate over prompt and response text.
pub fn derive_performance(run: &RunResult, prompt: &str) -> PerformanceRecord {
    let mut per_engine: Vec<ModelPerformance> = Vec::with_capacity(run.results.len());
    let mut total_cost: i64 = 0;
    let mut quality_sum = 0.0;
    let mut quality_count = 0usize;
    let mut successes = 0usize;

    // Stable iteration order for the record: engine name.
    let mut entries: Vec<_> = run.results.iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));

    for (name, response) in entries {
        let success = response.is_success();

        let cost = if success {
            let (input, output) = match response.token_usage {
                Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
                None => (
                    pricing::estimate_tokens(prompt),
                    pricing::estimate_tokens(&response.content),
                ),
            };
            pricing::chat_cost(&response.model, input, output)
        } else {
            0
        };

        let quality = if success {
            let q = heuristics::quality_score(
                &response.content,
                response.execution_time_ms,
                &response.model,
            );
            quality_sum += q;
            quality_count += 1;
            Some(q)
        } else {
            None
        };

        if success {
            successes += 1;
        }
        total_cost = total_cost.saturating_add(cost);

        per_engine.push(ModelPerformance {
            engine: name.clone(),
            model: response.model.clone(),
            execution_time_ms: response.execution_time_ms,
            token_usage: response.token_usage,
            cost_nanodollars: cost,
            quality_score: quality,
            success,
            error: response.error.clone(),
        });
    }

    let total = run.results.len();
    let success_rate = if total == 0 {
        0.0
    } else {
        successes as f64 / total as f64
    };
    let avg_quality_score = if quality_count > 0 {
        Some(quality_sum / quality_count as f64)
    } else {
        None
    };

    PerformanceRecord {
        run_id: run.run_id.clone(),
        timestamp: Utc::now(),
        prompt: prompt.to_string(),
        per_engine,
        total_cost_nanodollars: total_cost,
        total_time_ms: run.execution_time_ms,
        success_rate,
        avg_quality_score,
        task_complexity: heuristics::task_complexity(prompt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::EngineResponse;
    use std::collections::HashMap;
    use std::time::Duration;

    fn run_with(results: Vec<EngineResponse>) -> RunResult {
        let success = results.iter().any(|r| r.is_success());
        let errors = results.iter().filter_map(|r| r.error.clone()).collect();
        let results: HashMap<String, EngineResponse> = results
            .into_iter()
            .map(|r| (r.engine.clone(), r))
            .collect();
        RunResult {
            success,
            run_id: "run-1".into(),
            results,
            execution_time_ms: 1234,
            errors,
        }
    }

    fn ok_response(engine: &str, model: &str, usage: Option<TokenUsage>) -> EngineResponse {
        EngineResponse {
            content: "a reasonably substantial answer ".repeat(10),
            model: model.into(),
            engine: engine.into(),
            timestamp: Utc::now(),
            execution_time_ms: 800,
            token_usage: usage,
            error: None,
        }
    }

    #[test]
    fn success_rate_counts_non_error_fraction() {
        let run = run_with(vec![
            ok_response("a", "gpt-4o", None),
            EngineResponse::failure("b", "m", "boom", Duration::from_millis(1)),
        ]);
        let record = derive_performance(&run, "prompt");
        assert!((record.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(record.per_engine.len(), 2);
    }

    #[test]
    fn failed_engines_cost_nothing_and_carry_no_quality() {
        let run = run_with(vec![EngineResponse::failure(
            "a",
            "gpt-4o",
            "timed out after 5ms",
            Duration::from_millis(5),
        )]);
        let record = derive_performance(&run, "prompt");
        assert_eq!(record.total_cost_nanodollars, 0);
        assert!(record.avg_quality_score.is_none());
        assert_eq!(record.per_engine[0].quality_score, None);
        assert_eq!(
            record.per_engine[0].error.as_deref(),
            Some("timed out after 5ms")
        );
    }

    #[test]
    fn reported_usage_prices_exactly() {
        let usage = TokenUsage {
            prompt_tokens: 1_000,
            completion_tokens: 1_000,
            total_tokens: 2_000,
        };
        let run = run_with(vec![ok_response("a", "claude-3-5-haiku", Some(usage))]);
        let record = derive_performance(&run, "prompt");
        assert_eq!(record.total_cost_nanodollars, 4_800_000);
    }

    #[test]
    fn missing_usage_falls_back_to_length_estimate() {
        let run = run_with(vec![ok_response("a", "claude-3-5-haiku", None)]);
        let prompt = "x".repeat(400); // ~100 tokens
        let record = derive_performance(&run, &prompt);
        let content_len = run.results["a"].content.len();
        let expected =
            chat_cost("claude-3-5-haiku", 100, ((content_len + 3) / 4) as u32);
        assert_eq!(record.total_cost_nanodollars, expected);
    }

    #[test]
    fn derivation_is_idempotent() {
        let run = run_with(vec![
            ok_response("a", "gpt-4o", None),
            ok_response("b", "gpt-4o-mini", None),
        ]);
        let r1 = derive_performance(&run, "same prompt");
        let r2 = derive_performance(&run, "same prompt");
        assert_eq!(r1.total_cost_nanodollars, r2.total_cost_nanodollars);
        assert_eq!(r1.success_rate, r2.success_rate);
        assert_eq!(r1.avg_quality_score, r2.avg_quality_score);
        assert_eq!(r1.task_complexity, r2.task_complexity);
        assert_eq!(
            r1.per_engine.iter().map(|p| &p.engine).collect::<Vec<_>>(),
            r2.per_engine.iter().map(|p| &p.engine).collect::<Vec<_>>()
        );
    }
}
