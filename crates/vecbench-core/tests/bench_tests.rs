//! End-to-end benchmark runs through the registry

mod common;

use common::{query_vectors, BrokenBackend, IngestFailingBackend, OracleBackend, PanickingBackend};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use vecbench_core::baseline::exact_top_k;
use vecbench_core::{
    BackendRegistry, BackendSpec, BenchError, Benchmark, BenchmarkPlan, Dataset, Expectation,
    PreparedWorkload, Query, RepetitionObserver, RepetitionOutcome, Stage, VectorBackend,
};

fn annotated_workload(dataset: &Dataset) -> PreparedWorkload {
    let queries = (0..5u64)
        .map(|i| {
            Query::new(
                format!("query {}", i),
                vec![
                    Expectation::new().with("bucket", i),
                    Expectation::new().with("bucket", i + 5),
                    Expectation::new().with("bucket", 42u64),
                ],
            )
        })
        .collect();
    let workload = PreparedWorkload::from_parts(queries, query_vectors(5, 8, 99)).unwrap();
    workload.check_dimension(dataset.dimension()).unwrap();
    workload
}

fn plan() -> BenchmarkPlan {
    BenchmarkPlan {
        topk_sweep: vec![10],
        repetitions: 2,
        warmup: 1,
        concurrency: 4,
        seed: Some(7),
        ..BenchmarkPlan::default()
    }
}

fn registry_with(kind: &str, backend: Arc<dyn VectorBackend>) -> BackendRegistry {
    let mut registry = BackendRegistry::with_builtins();
    registry.register(kind, move |_| Ok(backend.clone()));
    registry
}

/// Fraction of expectations matched somewhere in the exact top-k
fn expected_hit_rate(dataset: &Dataset, workload: &PreparedWorkload, k: usize) -> f64 {
    let mut total = 0.0;
    for idx in 0..workload.len() {
        let top = exact_top_k(workload.vector(idx), dataset.as_flat(), dataset.dimension(), k);
        let expected = &workload.query(idx).expected;
        let matched = expected
            .iter()
            .filter(|e| top.iter().any(|&row| e.matches(dataset.payload(row))))
            .count();
        total += matched as f64 / expected.len() as f64;
    }
    total / workload.len() as f64
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_oracle_backend_end_to_end() {
    let dataset = Dataset::synthetic(100, 8, 2024).unwrap();
    let workload = annotated_workload(&dataset);
    let hit_rate = expected_hit_rate(&dataset, &workload, 10);

    let oracle = Arc::new(OracleBackend::new());
    let registry = registry_with("oracle", oracle.clone());
    let bench = Benchmark::new(plan(), dataset, workload, "test-model").unwrap();

    let store = bench.run(&registry, &[BackendSpec::new("oracle")]).await.unwrap();
    let result = store.get("oracle", 10).expect("k=10 recorded");
    assert_eq!(result.repetitions, 2);
    assert_eq!(result.failed_queries, 0);
    assert_eq!(result.avg_recall, Some(1.0));
    assert!((result.avg_hits.unwrap() - hit_rate).abs() < 1e-12);
    assert!(result.avg_qps.unwrap() > 0.0);
    assert!(result.avg_query_latency_sec.unwrap() >= 0.0);

    // warm-up pass plus two repetitions of five queries
    assert_eq!(oracle.searches.load(Ordering::SeqCst), 15);
    assert_eq!(oracle.setups.load(Ordering::SeqCst), 1);
    assert_eq!(oracle.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_builtin_flat_backend_recall() {
    let dataset = Dataset::synthetic(60, 8, 5).unwrap();
    let workload = annotated_workload(&dataset);
    let bench = Benchmark::new(
        BenchmarkPlan {
            topk_sweep: vec![1, 5, 10],
            ..plan()
        },
        dataset,
        workload,
        "test-model",
    )
    .unwrap();

    let specs = vec![
        BackendSpec::new("exact").with_kind("flat").with_param("metric", "dot_product"),
        BackendSpec::new("sampled").with_kind("flat-sampled").with_param("metric", "dot_product"),
    ];
    let store = bench.run(&BackendRegistry::with_builtins(), &specs).await.unwrap();

    for k in [1, 5, 10] {
        assert_eq!(store.get("exact", k).unwrap().avg_recall, Some(1.0), "k={}", k);
        let sampled = store.get("sampled", k).unwrap().avg_recall.unwrap();
        assert!(sampled <= 1.0);
    }
    assert!(store.get("sampled", 10).unwrap().avg_recall.unwrap() < 1.0);
}

#[tokio::test]
async fn test_setup_failure_does_not_stop_run() {
    let dataset = Dataset::synthetic(50, 8, 1).unwrap();
    let workload = annotated_workload(&dataset);
    let broken = Arc::new(BrokenBackend::default());
    let oracle = Arc::new(OracleBackend::new());

    let mut registry = registry_with("broken", broken.clone());
    let healthy = oracle.clone();
    registry.register("oracle", move |_| Ok(healthy.clone()));

    let bench = Benchmark::new(plan(), dataset, workload, "test-model").unwrap();
    let store = bench
        .run(
            &registry,
            &[BackendSpec::new("broken"), BackendSpec::new("oracle")],
        )
        .await
        .unwrap();

    let entry = store.entry("broken").unwrap();
    assert!(entry.is_failed());
    assert_eq!(entry.failure.as_ref().unwrap().stage, Stage::Setup);
    assert!(entry.results.is_empty());
    assert_eq!(broken.teardowns.load(Ordering::SeqCst), 1);

    assert_eq!(store.get("oracle", 10).unwrap().avg_recall, Some(1.0));

    let snap = store.snapshot().unwrap();
    assert!(snap["broken"]["k=10"].is_null());
    assert_eq!(snap["broken"]["_error"]["stage"], "setup");
    assert_eq!(snap["oracle"]["k=10"]["avg_recall_at_10"], 1.0);
}

#[tokio::test]
async fn test_ingest_failure_tears_down_and_continues() {
    let dataset = Dataset::synthetic(50, 8, 1).unwrap();
    let workload = annotated_workload(&dataset);
    let rejecting = Arc::new(IngestFailingBackend::default());
    let oracle = Arc::new(OracleBackend::new());

    let mut registry = registry_with("rejecting", rejecting.clone());
    let healthy = oracle.clone();
    registry.register("oracle", move |_| Ok(healthy.clone()));

    let bench = Benchmark::new(plan(), dataset, workload, "test-model").unwrap();
    let store = bench
        .run(
            &registry,
            &[BackendSpec::new("rejecting"), BackendSpec::new("oracle")],
        )
        .await
        .unwrap();

    let entry = store.entry("rejecting").unwrap();
    assert_eq!(entry.failure.as_ref().unwrap().stage, Stage::Ingest);
    assert!(entry.results.is_empty());
    assert_eq!(rejecting.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(rejecting.searches.load(Ordering::SeqCst), 0);

    let snap = store.snapshot().unwrap();
    assert_eq!(snap["rejecting"]["_error"]["stage"], "ingest");
    assert!(snap["rejecting"]["k=10"].is_null());
    assert_eq!(store.get("oracle", 10).unwrap().avg_recall, Some(1.0));
}

#[tokio::test]
async fn test_warm_up_failures_do_not_fail_backend() {
    let dataset = Dataset::synthetic(50, 8, 1).unwrap();
    let workload = annotated_workload(&dataset);
    // exactly the single warm-up pass over five queries fails
    let oracle = Arc::new(OracleBackend::failing_first(5));
    let registry = registry_with("oracle", oracle.clone());
    let bench = Benchmark::new(plan(), dataset, workload, "test-model").unwrap();

    let store = bench.run(&registry, &[BackendSpec::new("oracle")]).await.unwrap();
    let entry = store.entry("oracle").unwrap();
    assert!(!entry.is_failed());
    let result = store.get("oracle", 10).unwrap();
    assert_eq!(result.repetitions, 2);
    assert_eq!(result.failed_queries, 0);
    assert_eq!(result.avg_recall, Some(1.0));
    assert_eq!(oracle.searches.load(Ordering::SeqCst), 15);
}

#[tokio::test]
async fn test_warm_up_bounded_by_query_timeout() {
    let dataset = Dataset::synthetic(20, 8, 1).unwrap();
    let workload = annotated_workload(&dataset);
    let slow = Arc::new(OracleBackend::with_delay(Duration::from_millis(500)));
    let registry = registry_with("slow", slow.clone());
    let bench = Benchmark::new(
        BenchmarkPlan {
            warmup: 2,
            repetitions: 1,
            query_timeout: Some(Duration::from_millis(20)),
            ..plan()
        },
        dataset,
        workload,
        "test-model",
    )
    .unwrap();

    let started = Instant::now();
    let store = bench.run(&registry, &[BackendSpec::new("slow")]).await.unwrap();
    // ten untimed warm-up calls alone would take 5s
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(slow.searches.load(Ordering::SeqCst), 15);
    assert_eq!(store.get("slow", 10).unwrap().failed_queries, 5);
}

#[tokio::test]
async fn test_worker_panic_marks_backend_failed() {
    let dataset = Dataset::synthetic(20, 8, 1).unwrap();
    let workload = annotated_workload(&dataset);
    let registry = registry_with("explosive", Arc::new(PanickingBackend));
    let bench = Benchmark::new(
        BenchmarkPlan {
            warmup: 0,
            ..plan()
        },
        dataset,
        workload,
        "test-model",
    )
    .unwrap();

    let store = bench.run(&registry, &[BackendSpec::new("explosive")]).await.unwrap();
    let failure = store.entry("explosive").unwrap().failure.clone().unwrap();
    assert_eq!(failure.stage, Stage::Query);
}

#[tokio::test]
async fn test_unknown_backend_rejected_before_setup() {
    let dataset = Dataset::synthetic(20, 8, 1).unwrap();
    let workload = annotated_workload(&dataset);
    let oracle = Arc::new(OracleBackend::new());
    let registry = registry_with("oracle", oracle.clone());
    let bench = Benchmark::new(plan(), dataset, workload, "test-model").unwrap();

    let err = bench
        .run(
            &registry,
            &[BackendSpec::new("oracle"), BackendSpec::new("elasticsearch")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BenchError::Configuration(_)));
    assert_eq!(oracle.setups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_teardown_policy_respected() {
    let dataset = Dataset::synthetic(20, 8, 1).unwrap();
    let workload = annotated_workload(&dataset);
    let oracle = Arc::new(OracleBackend::new());
    let registry = registry_with("oracle", oracle.clone());
    let bench = Benchmark::new(plan(), dataset, workload, "test-model").unwrap();

    let mut keep = BackendSpec::new("oracle");
    keep.teardown = false;
    bench.run(&registry, &[keep]).await.unwrap();
    assert_eq!(oracle.teardowns.load(Ordering::SeqCst), 0);
}

#[derive(Default)]
struct Recorder {
    seen: Vec<(String, usize, usize, usize)>,
}

impl RepetitionObserver for Recorder {
    fn on_repetition(&mut self, backend: &str, k: usize, repetition: usize, outcome: &RepetitionOutcome) {
        self.seen
            .push((backend.to_string(), k, repetition, outcome.samples.len()));
    }
}

#[tokio::test]
async fn test_observer_sees_every_repetition() {
    let dataset = Dataset::synthetic(30, 8, 1).unwrap();
    let workload = annotated_workload(&dataset);
    let bench = Benchmark::new(
        BenchmarkPlan {
            topk_sweep: vec![5, 10],
            ..plan()
        },
        dataset,
        workload,
        "test-model",
    )
    .unwrap();

    let mut recorder = Recorder::default();
    bench
        .run_observed(
            &BackendRegistry::with_builtins(),
            &[BackendSpec::new("flat")],
            &mut recorder,
        )
        .await
        .unwrap();
    assert_eq!(
        recorder.seen,
        vec![
            ("flat".to_string(), 5, 0, 5),
            ("flat".to_string(), 5, 1, 5),
            ("flat".to_string(), 10, 0, 5),
            ("flat".to_string(), 10, 1, 5),
        ]
    );
}

#[tokio::test]
async fn test_results_written_as_json() {
    let dataset = Dataset::synthetic(30, 8, 1).unwrap();
    let workload = annotated_workload(&dataset);
    let bench = Benchmark::new(plan(), dataset, workload, "test-model").unwrap();
    let store = bench
        .run(&BackendRegistry::with_builtins(), &[BackendSpec::new("flat")])
        .await
        .unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("results").join("metrics.json");
    store.write_json(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["_config", "flat"]);
    assert_eq!(value["_config"]["model"], "test-model");
    assert_eq!(value["_config"]["dataset_size"], 30);
    assert_eq!(value["_config"]["topk_sweep"], serde_json::json!([10]));
    assert!(value["flat"]["k=10"]["avg_hits_at_10"].is_number());
}
