use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::path::Path;
use vecbench_core::{RepetitionObserver, RepetitionOutcome};

const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Query latency histograms and failure counters labelled by backend and k
pub struct Telemetry {
    registry: Registry,
    latency: HistogramVec,
    failures: IntCounterVec,
}

impl Telemetry {
    pub fn new() -> Result<Self, anyhow::Error> {
        let registry = Registry::new();
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "vecbench_query_latency_seconds",
                "Search latency of successful benchmark queries",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["backend", "k"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new(
                "vecbench_query_failures_total",
                "Benchmark queries that failed or timed out",
            ),
            &["backend", "k"],
        )?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        Ok(Self {
            registry,
            latency,
            failures,
        })
    }

    /// Prometheus text exposition of everything observed so far
    pub fn render(&self) -> Result<String, anyhow::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), anyhow::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render()?)?;
        Ok(())
    }
}

impl RepetitionObserver for Telemetry {
    fn on_repetition(
        &mut self,
        backend: &str,
        k: usize,
        _repetition: usize,
        outcome: &RepetitionOutcome,
    ) {
        let k = k.to_string();
        let latency = self.latency.with_label_values(&[backend, &k]);
        let failures = self.failures.with_label_values(&[backend, &k]);
        for sample in &outcome.samples {
            if sample.is_ok() {
                latency.observe(sample.latency.as_secs_f64());
            } else {
                failures.inc();
            }
        }
    }
}
