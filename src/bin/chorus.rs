#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use chorus_harness::engine::create_engine;
use chorus_harness::metrics::SqliteMetricsStore;
use chorus_harness::runner::{PromptRequest, RunConfig, Runner, SinkConfig};

#[derive(Parser)]
#[command(name = "chorus", version, about = "Multi-backend prompt orchestrator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a prompt across a set of engines
    Run {
        /// The prompt text
        prompt: String,
        /// Comma-separated engine names (e.g. "gpt-4o,gpt-4o-mini,llama3")
        #[arg(long, value_delimiter = ',')]
        engines: Vec<String>,
        /// Optional system instruction
        #[arg(long)]
        system: Option<String>,
        /// Execute engines one at a time, in the given order
        #[arg(long)]
        sequential: bool,
        #[arg(long, default_value_t = 4)]
        max_concurrency: usize,
        /// Per-attempt timeout in milliseconds (0 disables the timeout)
        #[arg(long, default_value_t = 120_000)]
        timeout_ms: u64,
        /// Additional attempts after the first failure
        #[arg(long, default_value_t = 2)]
        retries: u32,
        /// Abort the whole run on the first engine failure
        #[arg(long)]
        fail_fast: bool,
        /// Directory for per-run JSON result documents
        #[arg(long)]
        out: Option<PathBuf>,
        /// SQLite metrics database (defaults to CHORUS_METRICS_PATH)
        #[arg(long)]
        metrics_db: Option<PathBuf>,
    },
    /// Probe availability of a set of engines
    Status {
        #[arg(long, value_delimiter = ',')]
        engines: Vec<String>,
    },
    /// Summarize the run-metrics time series
    Metrics {
        #[arg(long)]
        metrics_db: Option<PathBuf>,
        /// Only consider runs from the last N days
        #[arg(long, default_value_t = 7)]
        since_days: i64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            prompt,
            engines,
            system,
            sequential,
            max_concurrency,
            timeout_ms,
            retries,
            fail_fast,
            out,
            metrics_db,
        } => {
            if engines.is_empty() {
                return Err("at least one engine is required (--engines)".into());
            }

            let mut set = Vec::with_capacity(engines.len());
            for name in &engines {
                set.push((name.clone(), create_engine(name)?));
            }

            let mut config = RunConfig::new(set)
                .max_concurrency(max_concurrency)
                .timeout(Duration::from_millis(timeout_ms))
                .retries(retries);
            if sequential {
                config = config.sequential();
            }
            if fail_fast {
                config = config.fail_fast();
            }
            if let Some(dir) = out {
                config = config.sink(SinkConfig::JsonDir(dir));
            }

            let store = SqliteMetricsStore::new(
                metrics_db.unwrap_or_else(SqliteMetricsStore::default_path),
            )?;
            let runner = Runner::new(config).with_metrics_store(store);

            let mut request = PromptRequest::new(prompt);
            if let Some(system) = system {
                request = request.system(system);
            }

            let result = runner.run(request).await?;
            println!(
                "run {} | success={} | {}ms",
                result.run_id, result.success, result.execution_time_ms
            );
            for name in &engines {
                match result.results.get(name) {
                    Some(r) if r.is_success() => {
                        println!("--- {name} ({}ms) ---", r.execution_time_ms);
                        println!("{}", r.content);
                    }
                    Some(r) => {
                        println!(
                            "--- {name} FAILED: {}",
                            r.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    None => println!("--- {name}: not dispatched"),
                }
            }
        }
        Commands::Status { engines } => {
            if engines.is_empty() {
                return Err("at least one engine is required (--engines)".into());
            }
            let mut set = Vec::with_capacity(engines.len());
            for name in &engines {
                set.push((name.clone(), create_engine(name)?));
            }
            let runner = Runner::new(RunConfig::new(set));
            let status = runner.engine_status().await;
            for name in &engines {
                let up = status.get(name).copied().unwrap_or(false);
                println!("{name}: {}", if up { "available" } else { "unavailable" });
            }
        }
        Commands::Metrics {
            metrics_db,
            since_days,
        } => {
            let store = SqliteMetricsStore::new(
                metrics_db.unwrap_or_else(SqliteMetricsStore::default_path),
            )?;
            let since = chrono::Utc::now() - chrono::Duration::days(since_days);
            let summary = store.summary(since).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
