mod config;
mod dataset;
mod telemetry;
mod workload;

use clap::Parser;
use config::{Config, LogFormat, Overrides};
use std::path::PathBuf;
use telemetry::Telemetry;
use tracing_subscriber::EnvFilter;
use vecbench_core::{
    BackendRegistry, Benchmark, Embedder, HashingEmbedder, PreparedWorkload, ResultsStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short, long, default_value = "vecbench.toml", env = "VECBENCH_CONFIG")]
    config: PathBuf,

    /// Backends to benchmark, comma separated (default: all configured)
    #[arg(long, value_delimiter = ',')]
    backends: Option<Vec<String>>,

    /// Top-k values to sweep, comma separated
    #[arg(long, value_delimiter = ',')]
    topk: Option<Vec<usize>>,

    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    repetitions: Option<usize>,

    /// Untimed passes over the workload before measuring
    #[arg(long)]
    warmup: Option<usize>,

    /// Seed for the per-repetition query shuffle
    #[arg(long)]
    seed: Option<u64>,

    /// Directory for metrics.json and metrics.prom
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            backends: self.backends.clone(),
            topk: self.topk.clone(),
            concurrency: self.concurrency,
            repetitions: self.repetitions,
            warmup: self.warmup,
            seed: self.seed,
            out_dir: self.out_dir.clone(),
        }
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    config.apply(args.overrides());
    let format = if args.json_logs {
        LogFormat::Json
    } else {
        config.general.log_format
    };
    init_tracing(&config.general.log_level, format);
    tracing::info!(config = %args.config.display(), "Loaded configuration");

    let plan = config.plan()?;
    let registry = BackendRegistry::with_builtins();
    registry.validate(&config.backends)?;

    let dataset = dataset::load(&config.dataset)?;
    let queries = workload::load(&config.workload.path)?;
    let embedder = HashingEmbedder::new(dataset.dimension());
    let prepared = PreparedWorkload::embed(queries, &embedder)?;
    tracing::info!(queries = prepared.len(), model = embedder.model_id(), "Prepared workload");

    let bench = Benchmark::new(plan, dataset, prepared, embedder.model_id())?;
    let mut telemetry = Telemetry::new()?;
    let store = bench
        .run_observed(&registry, &config.backends, &mut telemetry)
        .await?;

    let results_path = config.results_path();
    store.write_json(&results_path)?;
    tracing::info!(path = %results_path.display(), "Wrote results");
    if let Some(path) = config.metrics_path() {
        telemetry.write(&path)?;
        tracing::info!(path = %path.display(), "Wrote Prometheus metrics");
    }

    print_summary(&store);
    Ok(())
}

fn fmt_opt(value: Option<f64>, scale: f64, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v * scale),
        None => "-".into(),
    }
}

fn print_summary(store: &ResultsStore) {
    println!("\n--- Benchmark Results ---");
    println!(
        "{:<16} {:>5} {:>10} {:>10} {:>10} {:>8} {:>8} {:>10} {:>7}",
        "backend", "k", "avg ms", "p95 ms", "p99 ms", "recall", "hits", "qps", "failed"
    );
    for entry in store.entries() {
        if let Some(failure) = &entry.failure {
            println!("{:<16} failed during {}: {}", entry.name, failure.stage, failure.error);
        }
        for (k, r) in &entry.results {
            println!(
                "{:<16} {:>5} {:>10} {:>10} {:>10} {:>8} {:>8} {:>10} {:>7}",
                entry.name,
                k,
                fmt_opt(r.avg_query_latency_sec, 1e3, 3),
                fmt_opt(r.p95_query_latency_sec, 1e3, 3),
                fmt_opt(r.p99_query_latency_sec, 1e3, 3),
                fmt_opt(r.avg_recall, 1.0, 4),
                fmt_opt(r.avg_hits, 1.0, 4),
                fmt_opt(r.avg_qps, 1.0, 1),
                r.failed_queries
            );
        }
    }
}
