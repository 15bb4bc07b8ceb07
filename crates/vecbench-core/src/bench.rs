//! Benchmark orchestration across backends and k values.

use crate::backend::BackendError;
use crate::dataset::Dataset;
use crate::embedding::PreparedWorkload;
use crate::metrics::BackendKResult;
use crate::registry::{BackendRegistry, BackendSpec};
use crate::results::{HnswParams, ResultsStore, RunConfig};
use crate::runner::{self, BackendUnderTest, RepetitionOutcome, RunContext};
use crate::{BenchError, Result, Stage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Sweep parameters shared by every backend in a run
#[derive(Debug, Clone)]
pub struct BenchmarkPlan {
    pub topk_sweep: Vec<usize>,
    pub repetitions: usize,
    pub warmup: usize,
    pub concurrency: usize,
    pub batch_size: usize,
    pub query_timeout: Option<Duration>,
    pub seed: Option<u64>,
    pub hnsw_params: HnswParams,
    pub metric: String,
}

impl Default for BenchmarkPlan {
    fn default() -> Self {
        Self {
            topk_sweep: vec![10],
            repetitions: 3,
            warmup: 1,
            concurrency: 1,
            batch_size: 2000,
            query_timeout: None,
            seed: None,
            hnsw_params: HnswParams::default(),
            metric: "COSINE".into(),
        }
    }
}

impl BenchmarkPlan {
    pub fn validate(&self) -> Result<()> {
        if self.topk_sweep.is_empty() {
            return Err(BenchError::Configuration("top-k sweep is empty".into()));
        }
        if self.topk_sweep.contains(&0) {
            return Err(BenchError::Configuration("top-k values must be at least 1".into()));
        }
        if self.repetitions == 0 {
            return Err(BenchError::Configuration("repetitions must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(BenchError::Configuration("concurrency must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(BenchError::Configuration("batch size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Receives every repetition's raw samples as the sweep progresses
pub trait RepetitionObserver {
    fn on_repetition(
        &mut self,
        backend: &str,
        k: usize,
        repetition: usize,
        outcome: &RepetitionOutcome,
    );
}

impl RepetitionObserver for () {
    fn on_repetition(&mut self, _: &str, _: usize, _: usize, _: &RepetitionOutcome) {}
}

pub struct Benchmark {
    plan: BenchmarkPlan,
    dataset: Arc<Dataset>,
    workload: Arc<PreparedWorkload>,
    model: String,
}

impl Benchmark {
    /// Validate the plan and check the reference set before any backend is touched.
    pub fn new(
        plan: BenchmarkPlan,
        dataset: Dataset,
        workload: PreparedWorkload,
        model: impl Into<String>,
    ) -> Result<Self> {
        plan.validate()?;
        workload.check_dimension(dataset.dimension())?;
        dataset.check_normalized();
        Ok(Self {
            plan,
            dataset: Arc::new(dataset),
            workload: Arc::new(workload),
            model: model.into(),
        })
    }

    pub fn plan(&self) -> &BenchmarkPlan {
        &self.plan
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            run_id: uuid::Uuid::new_v4(),
            started_at: chrono::Utc::now(),
            batch_size: self.plan.batch_size,
            hnsw_params: self.plan.hnsw_params.clone(),
            metric: self.plan.metric.clone(),
            model: self.model.clone(),
            dataset_size: self.dataset.len(),
            dimension: self.dataset.dimension(),
            repetitions: self.plan.repetitions,
            concurrency: self.plan.concurrency,
            warmup: self.plan.warmup,
            topk_sweep: self.plan.topk_sweep.clone(),
            seed: self.plan.seed,
        }
    }

    pub async fn run(
        &self,
        registry: &BackendRegistry,
        specs: &[BackendSpec],
    ) -> Result<ResultsStore> {
        self.run_observed(registry, specs, &mut ()).await
    }

    /// Run the sweep for every backend in order.
    ///
    /// Unknown backends fail the whole run before any setup. A backend that
    /// fails to set up, ingest, or keep its workers alive is recorded as failed
    /// and the run moves on to the next one.
    pub async fn run_observed(
        &self,
        registry: &BackendRegistry,
        specs: &[BackendSpec],
        observer: &mut (dyn RepetitionObserver + Send),
    ) -> Result<ResultsStore> {
        registry.validate(specs)?;

        let mut ctx = RunContext::new(self.plan.concurrency, self.plan.seed)?
            .with_query_timeout(self.plan.query_timeout);
        let mut store = ResultsStore::new(self.run_config());

        for spec in specs {
            store.begin(&spec.name);
            let err = match self.run_backend(&mut ctx, registry, spec, &mut store, observer).await {
                Ok(()) => {
                    info!(backend = %spec.name, "Backend benchmark complete");
                    continue;
                }
                Err(err) => err,
            };
            let stage = match err {
                BenchError::BackendSetup { stage, .. } => stage,
                BenchError::WorkerPanic { .. } => Stage::Query,
                other => return Err(other),
            };
            warn!(backend = %spec.name, %stage, "Backend failed: {}", err);
            store.record_failure(&spec.name, stage, &err);
        }

        Ok(store)
    }

    async fn run_backend(
        &self,
        ctx: &mut RunContext,
        registry: &BackendRegistry,
        spec: &BackendSpec,
        store: &mut ResultsStore,
        observer: &mut (dyn RepetitionObserver + Send),
    ) -> Result<()> {
        let fail = |stage: Stage| {
            let backend = spec.name.clone();
            move |source: BackendError| BenchError::BackendSetup {
                backend,
                stage,
                source,
            }
        };

        info!(backend = %spec.name, kind = %spec.kind(), "Setting up backend");
        let backend = registry.build(spec).map_err(fail(Stage::Construct))?;
        let target = BackendUnderTest {
            name: spec.name.clone(),
            backend,
            id_repr: spec.id_repr,
        };

        let t0 = Instant::now();
        if let Err(e) = target.backend.setup(self.dataset.dimension()).await {
            self.teardown(&target, spec).await;
            return Err(fail(Stage::Setup)(e));
        }
        let setup_time = t0.elapsed();

        let batch_size = spec.batch_size.unwrap_or(self.plan.batch_size);
        let t1 = Instant::now();
        if let Err(e) = target.backend.upsert(&self.dataset, batch_size).await {
            self.teardown(&target, spec).await;
            return Err(fail(Stage::Ingest)(e));
        }
        let ingest_time = t1.elapsed();
        info!(
            backend = %spec.name,
            records = self.dataset.len(),
            batch_size,
            setup_ms = setup_time.as_millis() as u64,
            ingest_ms = ingest_time.as_millis() as u64,
            "Ingest complete"
        );

        if self.plan.warmup > 0 {
            let k = self.plan.topk_sweep[0];
            let failures = runner::warm_up(
                &target,
                &self.workload,
                k,
                self.plan.warmup,
                ctx.query_timeout(),
            )
            .await;
            if failures > 0 {
                warn!(backend = %spec.name, failures, "Warm-up finished with failures");
            }
        }

        for &k in &self.plan.topk_sweep {
            let mut summaries = Vec::with_capacity(self.plan.repetitions);
            for rep in 0..self.plan.repetitions {
                let outcome = match runner::run_repetition(
                    ctx,
                    &target,
                    self.workload.clone(),
                    self.dataset.clone(),
                    k,
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        self.teardown(&target, spec).await;
                        return Err(e);
                    }
                };
                observer.on_repetition(&spec.name, k, rep, &outcome);
                summaries.push(outcome.summary);
            }
            let result = BackendKResult::aggregate(k, setup_time, ingest_time, &summaries);
            info!(
                backend = %spec.name,
                k,
                avg_latency_sec = ?result.avg_query_latency_sec,
                avg_recall = ?result.avg_recall,
                avg_qps = ?result.avg_qps,
                failed_queries = result.failed_queries,
                "Sweep point complete"
            );
            store.record(&spec.name, result);
        }

        self.teardown(&target, spec).await;
        Ok(())
    }

    /// Teardown when the backend's policy allows it; errors are only logged.
    async fn teardown(&self, target: &BackendUnderTest, spec: &BackendSpec) {
        if !spec.teardown {
            info!(backend = %spec.name, "Keeping collection after benchmark");
            return;
        }
        if let Err(e) = target.backend.teardown().await {
            warn!(backend = %spec.name, "Teardown failed: {}", e);
        }
    }
}
