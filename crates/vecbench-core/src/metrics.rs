//! Reduction of query samples into repetition summaries and per-k results.
//!
//! Every statistic is an `Option<f64>`: an empty sample set produces `None`,
//! which is carried through to the export instead of being read as zero.

use crate::runner::QuerySample;
use serde::Serialize;
use std::time::Duration;

/// Welford's streaming mean and variance
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Population standard deviation
    pub fn stddev(&self) -> Option<f64> {
        (self.count > 0).then(|| (self.m2 / self.count as f64).max(0.0).sqrt())
    }
}

impl FromIterator<f64> for RunningStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = RunningStats::new();
        for v in iter {
            stats.push(v);
        }
        stats
    }
}

/// Percentile with linear interpolation between closest ranks.
///
/// `sorted` must be ascending; `pct` is in `[0, 100]`.
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

fn mean_defined(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    values.into_iter().flatten().collect::<RunningStats>().mean()
}

/// Statistics of one repetition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepetitionSummary {
    pub queries: usize,
    pub failures: usize,
    pub wall_clock_sec: Option<f64>,
    pub mean_latency_sec: Option<f64>,
    pub p50_latency_sec: Option<f64>,
    pub p95_latency_sec: Option<f64>,
    pub p99_latency_sec: Option<f64>,
    pub latency_stddev_sec: Option<f64>,
    /// Latency of whichever successful query completed first
    pub first_latency_sec: Option<f64>,
    pub mean_hit_rate: Option<f64>,
    pub mean_recall: Option<f64>,
    pub throughput_qps: Option<f64>,
}

impl RepetitionSummary {
    /// Summarize samples given in completion order.
    ///
    /// Failed samples count towards `queries` and `failures` only.
    pub fn from_samples(samples: &[QuerySample], wall_clock: Option<Duration>) -> Self {
        let ok: Vec<&QuerySample> = samples.iter().filter(|s| s.is_ok()).collect();

        let mut latencies: Vec<f64> = ok.iter().map(|s| s.latency.as_secs_f64()).collect();
        let latency_stats: RunningStats = latencies.iter().copied().collect();
        latencies.sort_by(|a, b| a.total_cmp(b));

        let wall_clock_sec = wall_clock.map(|w| w.as_secs_f64());
        let throughput_qps = match wall_clock_sec {
            Some(w) if w > 0.0 && !samples.is_empty() => Some(samples.len() as f64 / w),
            _ => None,
        };

        Self {
            queries: samples.len(),
            failures: samples.len() - ok.len(),
            wall_clock_sec,
            mean_latency_sec: latency_stats.mean(),
            p50_latency_sec: percentile(&latencies, 50.0),
            p95_latency_sec: percentile(&latencies, 95.0),
            p99_latency_sec: percentile(&latencies, 99.0),
            latency_stddev_sec: latency_stats.stddev(),
            first_latency_sec: ok.first().map(|s| s.latency.as_secs_f64()),
            mean_hit_rate: mean_defined(ok.iter().map(|s| s.hit_rate)),
            mean_recall: mean_defined(ok.iter().map(|s| s.recall)),
            throughput_qps,
        }
    }
}

/// Final aggregate for one (backend, k) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendKResult {
    pub k: usize,
    pub setup_time_sec: f64,
    pub ingest_time_sec: f64,
    pub repetitions: usize,
    pub failed_queries: usize,
    pub avg_query_latency_sec: Option<f64>,
    pub p50_query_latency_sec: Option<f64>,
    pub p95_query_latency_sec: Option<f64>,
    pub p99_query_latency_sec: Option<f64>,
    pub latency_stddev_sec: Option<f64>,
    pub first_query_latency_sec: Option<f64>,
    pub avg_hits: Option<f64>,
    pub avg_recall: Option<f64>,
    pub avg_qps: Option<f64>,
}

impl BackendKResult {
    /// Average each statistic over the repetitions where it is defined.
    pub fn aggregate(
        k: usize,
        setup: Duration,
        ingest: Duration,
        summaries: &[RepetitionSummary],
    ) -> Self {
        let avg = |f: fn(&RepetitionSummary) -> Option<f64>| mean_defined(summaries.iter().map(f));
        Self {
            k,
            setup_time_sec: setup.as_secs_f64(),
            ingest_time_sec: ingest.as_secs_f64(),
            repetitions: summaries.len(),
            failed_queries: summaries.iter().map(|s| s.failures).sum(),
            avg_query_latency_sec: avg(|s| s.mean_latency_sec),
            p50_query_latency_sec: avg(|s| s.p50_latency_sec),
            p95_query_latency_sec: avg(|s| s.p95_latency_sec),
            p99_query_latency_sec: avg(|s| s.p99_latency_sec),
            latency_stddev_sec: avg(|s| s.latency_stddev_sec),
            first_query_latency_sec: avg(|s| s.first_latency_sec),
            avg_hits: avg(|s| s.mean_hit_rate),
            avg_recall: avg(|s| s.mean_recall),
            avg_qps: avg(|s| s.throughput_qps),
        }
    }
}
