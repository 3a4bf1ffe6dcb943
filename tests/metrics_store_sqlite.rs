//! Metrics store round-trips against a real on-disk SQLite database.

use std::collections::HashMap;

use chrono::{Duration as ChronoDuration, Utc};
use tempfile::TempDir;

use chorus_harness::metrics::{derive_performance, PerformanceRecord, SqliteMetricsStore};
use chorus_harness::runner::{EngineResponse, RunResult, TokenUsage};

fn sample_result(run_id: &str) -> RunResult {
    let mut results = HashMap::new();
    results.insert(
        "alpha".to_string(),
        EngineResponse {
            content: "A thorough answer with enough substance to score well. ".repeat(6),
            model: "gpt-4o".into(),
            engine: "alpha".into(),
            timestamp: Utc::now(),
            execution_time_ms: 1200,
            token_usage: Some(TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 200,
                total_tokens: 300,
            }),
            error: None,
        },
    );
    results.insert(
        "beta".to_string(),
        EngineResponse::failure("beta", "llama3", "connection refused", std::time::Duration::ZERO),
    );

    RunResult {
        success: true,
        run_id: run_id.to_string(),
        results,
        execution_time_ms: 1300,
        errors: vec!["connection refused".into()],
    }
}

fn sample_record(run_id: &str) -> PerformanceRecord {
    derive_performance(&sample_result(run_id), "Explain how B-tree rebalancing works")
}

#[tokio::test]
async fn append_then_read_back_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = SqliteMetricsStore::new(dir.path().join("metrics.sqlite")).unwrap();

    let record = sample_record("run-1");
    store.append(&record).await.unwrap();

    let since = Utc::now() - ChronoDuration::hours(1);
    let loaded = store.records_since(since).await.unwrap();
    assert_eq!(loaded.len(), 1);

    let got = &loaded[0];
    assert_eq!(got.run_id, "run-1");
    assert_eq!(got.prompt, "Explain how B-tree rebalancing works");
    assert_eq!(got.per_engine.len(), 2);
    assert_eq!(got.total_cost_nanodollars, record.total_cost_nanodollars);
    assert!((got.success_rate - 0.5).abs() < 1e-9);
    assert!(got.avg_quality_score.is_some());
}

#[tokio::test]
async fn reappending_the_same_run_id_does_not_duplicate() {
    let dir = TempDir::new().unwrap();
    let store = SqliteMetricsStore::new(dir.path().join("metrics.sqlite")).unwrap();

    store.append(&sample_record("run-1")).await.unwrap();
    store.append(&sample_record("run-1")).await.unwrap();

    let since = Utc::now() - ChronoDuration::hours(1);
    let loaded = store.records_since(since).await.unwrap();
    assert_eq!(loaded.len(), 1, "same run_id must upsert, not insert");
}

#[tokio::test]
async fn records_since_filters_and_orders_newest_first() {
    let dir = TempDir::new().unwrap();
    let store = SqliteMetricsStore::new(dir.path().join("metrics.sqlite")).unwrap();

    let mut old = sample_record("run-old");
    old.timestamp = Utc::now() - ChronoDuration::days(30);
    let mut mid = sample_record("run-mid");
    mid.timestamp = Utc::now() - ChronoDuration::hours(2);
    let new = sample_record("run-new");

    store.append(&old).await.unwrap();
    store.append(&mid).await.unwrap();
    store.append(&new).await.unwrap();

    let since = Utc::now() - ChronoDuration::days(7);
    let loaded = store.records_since(since).await.unwrap();
    let ids: Vec<&str> = loaded.iter().map(|r| r.run_id.as_str()).collect();
    assert_eq!(ids, vec!["run-new", "run-mid"]);
}

#[tokio::test]
async fn summary_aggregates_across_runs() {
    let dir = TempDir::new().unwrap();
    let store = SqliteMetricsStore::new(dir.path().join("metrics.sqlite")).unwrap();

    let a = sample_record("run-a");
    let b = sample_record("run-b");
    let expected_cost = a.total_cost_nanodollars + b.total_cost_nanodollars;
    store.append(&a).await.unwrap();
    store.append(&b).await.unwrap();

    let since = Utc::now() - ChronoDuration::hours(1);
    let summary = store.summary(since).await.unwrap();
    assert_eq!(summary.runs, 2);
    assert_eq!(summary.total_cost_nanodollars, expected_cost);
    assert!((summary.avg_success_rate - 0.5).abs() < 1e-9);
    assert!(summary.avg_quality_score.is_some());
    assert!(summary.avg_task_complexity >= 1.0);
}

#[tokio::test]
async fn empty_window_yields_an_empty_summary() {
    let dir = TempDir::new().unwrap();
    let store = SqliteMetricsStore::new(dir.path().join("metrics.sqlite")).unwrap();

    let since = Utc::now() - ChronoDuration::hours(1);
    let summary = store.summary(since).await.unwrap();
    assert_eq!(summary.runs, 0);
    assert_eq!(summary.total_cost_nanodollars, 0);
    assert!(summary.avg_quality_score.is_none());

    assert!(store.records_since(since).await.unwrap().is_empty());
}

#[tokio::test]
async fn exclusive_lock_file_can_be_taken_and_released() {
    let dir = TempDir::new().unwrap();
    let store = SqliteMetricsStore::new(dir.path().join("metrics.sqlite")).unwrap();

    let lock = store.lock_exclusive().unwrap();
    drop(lock);
    store.lock_exclusive().unwrap();
}
