//! Query execution: single timed queries and concurrent repetitions.
//!
//! A repetition shuffles the workload, hands it to a fixed number of worker
//! tasks and collects samples in the order they complete. Scoring against the
//! exact baseline happens after the wall clock has stopped so it never shows
//! up in throughput.

use crate::backend::{IdRepr, VectorBackend};
use crate::baseline;
use crate::dataset::Dataset;
use crate::embedding::PreparedWorkload;
use crate::metrics::RepetitionSummary;
use crate::scoring;
use crate::types::SearchResult;
use crate::{BenchError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// A single search that did not produce a result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryFailure {
    #[error("backend query failure: {0}")]
    Backend(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

/// Explicit per-run state handed to the workload driver
#[derive(Debug)]
pub struct RunContext {
    rng: StdRng,
    concurrency: usize,
    query_timeout: Option<Duration>,
}

impl RunContext {
    /// `seed` fixes the query shuffles; `None` draws one from the OS.
    pub fn new(concurrency: usize, seed: Option<u64>) -> Result<Self> {
        if concurrency == 0 {
            return Err(BenchError::Configuration("concurrency must be at least 1".into()));
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            rng,
            concurrency,
            query_timeout: None,
        })
    }

    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }

    /// A fresh random permutation of `0..n`
    pub fn shuffled_order(&mut self, n: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut self.rng);
        order
    }
}

/// A backend together with the settings the driver needs to score it
#[derive(Clone)]
pub struct BackendUnderTest {
    pub name: String,
    pub backend: Arc<dyn VectorBackend>,
    pub id_repr: IdRepr,
}

/// Outcome of one executed query within a repetition
#[derive(Debug, Clone)]
pub struct QuerySample {
    /// Index of the query in the workload
    pub query: usize,
    /// Position in completion order, starting at 0
    pub sequence: usize,
    /// Search latency; for failures, time until the failure was observed
    pub latency: Duration,
    pub completed_at: Instant,
    pub outcome: std::result::Result<SearchResult, QueryFailure>,
    pub hit_rate: Option<f64>,
    pub recall: Option<f64>,
}

impl QuerySample {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Samples of one repetition in completion order, plus their summary
#[derive(Debug, Clone)]
pub struct RepetitionOutcome {
    pub samples: Vec<QuerySample>,
    pub summary: RepetitionSummary,
}

/// Time one search call.
///
/// Only the backend call sits inside the timed region. Backend errors and
/// timeouts come back as [`QueryFailure`], never as empty results.
pub async fn run_query(
    backend: &dyn VectorBackend,
    vector: &[f32],
    k: usize,
    timeout: Option<Duration>,
) -> std::result::Result<(Duration, SearchResult), QueryFailure> {
    let start = Instant::now();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, backend.search(vector, k)).await {
            Ok(result) => result,
            Err(_) => return Err(QueryFailure::Timeout(limit)),
        },
        None => backend.search(vector, k).await,
    };
    let latency = start.elapsed();
    result
        .map(|hits| (latency, hits))
        .map_err(|e| QueryFailure::Backend(e.to_string()))
}

/// Issue every query `passes` times without recording samples.
///
/// Each call goes through [`run_query`] so the per-query timeout applies.
/// Failures and timeouts are only logged; the count is returned.
pub async fn warm_up(
    target: &BackendUnderTest,
    workload: &PreparedWorkload,
    k: usize,
    passes: usize,
    timeout: Option<Duration>,
) -> usize {
    let mut failures = 0;
    for _ in 0..passes {
        for idx in 0..workload.len() {
            if let Err(e) = run_query(target.backend.as_ref(), workload.vector(idx), k, timeout).await {
                failures += 1;
                tracing::warn!(backend = %target.name, query = idx, "Warm-up query failed: {}", e);
            }
        }
    }
    failures
}

struct Completion {
    query: usize,
    latency: Duration,
    at: Instant,
    outcome: std::result::Result<SearchResult, QueryFailure>,
}

/// Run every workload query once against `target` at `k`.
///
/// Exactly `min(concurrency, queries)` workers pull from a shared cursor over a
/// fresh shuffle. A worker that panics aborts the remaining workers and fails
/// the repetition; individual query failures do not.
pub async fn run_repetition(
    ctx: &mut RunContext,
    target: &BackendUnderTest,
    workload: Arc<PreparedWorkload>,
    dataset: Arc<Dataset>,
    k: usize,
) -> Result<RepetitionOutcome> {
    let n = workload.len();
    if n == 0 {
        return Ok(RepetitionOutcome {
            samples: Vec::new(),
            summary: RepetitionSummary::from_samples(&[], None),
        });
    }

    let order = Arc::new(ctx.shuffled_order(n));
    let cursor = Arc::new(AtomicUsize::new(0));
    let workers = ctx.concurrency.min(n);
    let timeout = ctx.query_timeout;
    let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();

    let started = Instant::now();
    let mut set = JoinSet::new();
    for _ in 0..workers {
        let tx = tx.clone();
        let order = order.clone();
        let cursor = cursor.clone();
        let workload = workload.clone();
        let backend = target.backend.clone();
        set.spawn(async move {
            loop {
                let slot = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(&query) = order.get(slot) else {
                    break;
                };
                let begun = Instant::now();
                let (latency, outcome) =
                    match run_query(backend.as_ref(), workload.vector(query), k, timeout).await {
                        Ok((latency, hits)) => (latency, Ok(hits)),
                        Err(failure) => (begun.elapsed(), Err(failure)),
                    };
                let done = Completion {
                    query,
                    latency,
                    at: Instant::now(),
                    outcome,
                };
                if tx.send(done).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut samples: Vec<QuerySample> = Vec::with_capacity(n);
    loop {
        tokio::select! {
            Some(done) = rx.recv() => {
                samples.push(QuerySample {
                    query: done.query,
                    sequence: samples.len(),
                    latency: done.latency,
                    completed_at: done.at,
                    outcome: done.outcome,
                    hit_rate: None,
                    recall: None,
                });
            }
            Some(joined) = set.join_next(), if !set.is_empty() => {
                if let Err(e) = joined {
                    set.abort_all();
                    return Err(BenchError::WorkerPanic {
                        backend: target.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            else => break,
        }
    }

    let wall_clock = samples
        .iter()
        .map(|s| s.completed_at)
        .max()
        .map(|last| last.saturating_duration_since(started));

    let id_repr = target.id_repr;
    let samples = tokio::task::spawn_blocking(move || {
        let mut samples = samples;
        score_samples(&mut samples, &workload, &dataset, id_repr, k);
        samples
    })
    .await
    .map_err(|e| BenchError::WorkerPanic {
        backend: target.name.clone(),
        reason: format!("scoring: {}", e),
    })?;

    let summary = RepetitionSummary::from_samples(&samples, wall_clock);
    tracing::debug!(
        backend = %target.name,
        k,
        queries = summary.queries,
        failures = summary.failures,
        qps = ?summary.throughput_qps,
        "Repetition complete"
    );
    Ok(RepetitionOutcome { samples, summary })
}

/// Fill in hit-rate and recall for every successful sample.
///
/// The exact baseline is computed independently for each sample at the same `k`.
pub fn score_samples(
    samples: &mut [QuerySample],
    workload: &PreparedWorkload,
    dataset: &Dataset,
    id_repr: IdRepr,
    k: usize,
) {
    for sample in samples.iter_mut() {
        let hits = match &sample.outcome {
            Ok(hits) => hits,
            Err(_) => continue,
        };
        let query = workload.query(sample.query);
        sample.hit_rate = scoring::hits_at_k(hits, &query.expected);

        let truth = baseline::exact_top_k(
            workload.vector(sample.query),
            dataset.as_flat(),
            dataset.dimension(),
            k,
        );
        sample.recall = scoring::recall_for_hits(
            id_repr,
            truth.into_iter().map(|row| id_repr.row_id(dataset, row)),
            hits,
        );
    }
}
