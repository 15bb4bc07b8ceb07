//! Accumulated results of a run and their export view.

use crate::metrics::BackendKResult;
use crate::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Index build parameters recorded alongside the results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    #[serde(rename = "M")]
    pub m: usize,
    #[serde(rename = "efConstruction")]
    pub ef_construction: usize,
    pub ef: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 128,
            ef: 128,
        }
    }
}

/// Immutable metadata written once per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub batch_size: usize,
    pub hnsw_params: HnswParams,
    pub metric: String,
    pub model: String,
    pub dataset_size: usize,
    pub dimension: usize,
    pub repetitions: usize,
    pub concurrency: usize,
    pub warmup: usize,
    pub topk_sweep: Vec<usize>,
    pub seed: Option<u64>,
}

/// Why a backend stopped before finishing its sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendFailure {
    pub stage: Stage,
    pub error: String,
}

/// Everything recorded for one backend
#[derive(Debug, Clone, PartialEq)]
pub struct BackendEntry {
    pub name: String,
    pub results: BTreeMap<usize, BackendKResult>,
    pub failure: Option<BackendFailure>,
}

impl BackendEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            results: BTreeMap::new(),
            failure: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Append-only store keyed by backend (in run order) and k (ascending)
#[derive(Debug, Clone)]
pub struct ResultsStore {
    config: RunConfig,
    entries: Vec<BackendEntry>,
}

impl ResultsStore {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn entries(&self) -> &[BackendEntry] {
        &self.entries
    }

    pub fn entry(&self, backend: &str) -> Option<&BackendEntry> {
        self.entries.iter().find(|e| e.name == backend)
    }

    pub fn get(&self, backend: &str, k: usize) -> Option<&BackendKResult> {
        self.entry(backend).and_then(|e| e.results.get(&k))
    }

    fn entry_mut(&mut self, backend: &str) -> &mut BackendEntry {
        match self.entries.iter().position(|e| e.name == backend) {
            Some(pos) => &mut self.entries[pos],
            None => {
                self.entries.push(BackendEntry::new(backend));
                let last = self.entries.len() - 1;
                &mut self.entries[last]
            }
        }
    }

    /// Register a backend so it appears in the export even with no results yet
    pub fn begin(&mut self, backend: &str) {
        self.entry_mut(backend);
    }

    pub fn record(&mut self, backend: &str, result: BackendKResult) {
        self.entry_mut(backend).results.insert(result.k, result);
    }

    pub fn record_failure(&mut self, backend: &str, stage: Stage, error: impl ToString) {
        self.entry_mut(backend).failure = Some(BackendFailure {
            stage,
            error: error.to_string(),
        });
    }

    /// Structured export: `_config` plus one object per backend keyed by `"k=<value>"`.
    ///
    /// Missing k entries (backend failed before reaching them) are `null`.
    pub fn snapshot(&self) -> crate::Result<Value> {
        let mut root = Map::new();
        root.insert("_config".into(), serde_json::to_value(&self.config)?);
        for entry in &self.entries {
            let mut backend = Map::new();
            let mut ks: Vec<usize> = self.config.topk_sweep.clone();
            ks.extend(entry.results.keys().copied());
            ks.sort_unstable();
            ks.dedup();
            for k in ks {
                let value = entry.results.get(&k).map(k_result_view).unwrap_or(Value::Null);
                backend.insert(format!("k={}", k), value);
            }
            if let Some(failure) = &entry.failure {
                backend.insert(
                    "_error".into(),
                    json!({ "stage": failure.stage, "message": failure.error }),
                );
            }
            root.insert(entry.name.clone(), Value::Object(backend));
        }
        Ok(Value::Object(root))
    }

    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot()?)?)
    }

    pub fn write_json(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

fn k_result_view(r: &BackendKResult) -> Value {
    let k = r.k;
    let mut m = Map::new();
    m.insert("setup_time_sec".into(), json!(r.setup_time_sec));
    m.insert("ingest_time_sec".into(), json!(r.ingest_time_sec));
    m.insert("avg_query_latency_sec".into(), json!(r.avg_query_latency_sec));
    m.insert("p50_query_latency_sec".into(), json!(r.p50_query_latency_sec));
    m.insert("p95_query_latency_sec".into(), json!(r.p95_query_latency_sec));
    m.insert("p99_query_latency_sec".into(), json!(r.p99_query_latency_sec));
    m.insert("latency_stddev_sec".into(), json!(r.latency_stddev_sec));
    m.insert("first_query_latency_sec".into(), json!(r.first_query_latency_sec));
    m.insert(format!("avg_hits_at_{}", k), json!(r.avg_hits));
    m.insert(format!("avg_recall_at_{}", k), json!(r.avg_recall));
    m.insert("avg_qps".into(), json!(r.avg_qps));
    m.insert("failed_queries".into(), json!(r.failed_queries));
    m.insert("repetitions".into(), json!(r.repetitions));
    Value::Object(m)
}
