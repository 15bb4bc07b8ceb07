use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vecbench_core::{BackendSpec, BenchmarkPlan, HnswParams};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // General
    #[serde(default)]
    pub general: GeneralConfig,

    // Sweep
    #[serde(default)]
    pub run: RunSection,

    // Inputs
    pub dataset: DatasetConfig,
    pub workload: WorkloadConfig,

    // Backends, in run order
    #[serde(default)]
    pub backends: Vec<BackendSpec>,

    // Metrics
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub out_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: LogFormat::Text,
            out_dir: PathBuf::from("results"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunSection {
    pub topk_sweep: Vec<usize>,
    pub repetitions: usize,
    pub warmup: usize,
    pub concurrency: usize,
    pub batch_size: usize,
    pub query_timeout_ms: Option<u64>,
    pub seed: Option<u64>,
    pub metric: String,
    pub hnsw: HnswParams,
}

impl Default for RunSection {
    fn default() -> Self {
        let plan = BenchmarkPlan::default();
        Self {
            topk_sweep: plan.topk_sweep,
            repetitions: plan.repetitions,
            warmup: plan.warmup,
            concurrency: plan.concurrency,
            batch_size: plan.batch_size,
            query_timeout_ms: None,
            seed: None,
            metric: plan.metric,
            hnsw: plan.hnsw_params,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum DatasetConfig {
    /// One JSON object per line: `embedding` plus payload fields
    Jsonl { path: PathBuf },
    Synthetic {
        size: usize,
        dimension: usize,
        #[serde(default)]
        seed: u64,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkloadConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub file: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: "metrics.prom".into(),
        }
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub backends: Option<Vec<String>>,
    pub topk: Option<Vec<usize>>,
    pub concurrency: Option<usize>,
    pub repetitions: Option<usize>,
    pub warmup: Option<usize>,
    pub seed: Option<u64>,
    pub out_dir: Option<PathBuf>,
}

impl Config {
    /// Relative dataset and workload paths resolve against the config file's directory.
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        if let DatasetConfig::Jsonl { path } = &mut self.dataset {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        if self.workload.path.is_relative() {
            self.workload.path = base.join(&self.workload.path);
        }
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(names) = overrides.backends {
            self.backends = names
                .into_iter()
                .map(|name| {
                    self.backends
                        .iter()
                        .find(|b| b.name == name)
                        .cloned()
                        .unwrap_or_else(|| BackendSpec::new(name))
                })
                .collect();
        }
        if let Some(topk) = overrides.topk {
            self.run.topk_sweep = topk;
        }
        if let Some(c) = overrides.concurrency {
            self.run.concurrency = c;
        }
        if let Some(r) = overrides.repetitions {
            self.run.repetitions = r;
        }
        if let Some(w) = overrides.warmup {
            self.run.warmup = w;
        }
        if overrides.seed.is_some() {
            self.run.seed = overrides.seed;
        }
        if let Some(dir) = overrides.out_dir {
            self.general.out_dir = dir;
        }
    }

    pub fn plan(&self) -> Result<BenchmarkPlan, anyhow::Error> {
        if self.backends.is_empty() {
            bail!("no backends configured");
        }
        let plan = BenchmarkPlan {
            topk_sweep: self.run.topk_sweep.clone(),
            repetitions: self.run.repetitions,
            warmup: self.run.warmup,
            concurrency: self.run.concurrency,
            batch_size: self.run.batch_size,
            query_timeout: self.run.query_timeout_ms.map(Duration::from_millis),
            seed: self.run.seed,
            hnsw_params: self.run.hnsw.clone(),
            metric: self.run.metric.clone(),
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn results_path(&self) -> PathBuf {
        self.general.out_dir.join("metrics.json")
    }

    pub fn metrics_path(&self) -> Option<PathBuf> {
        self.metrics
            .enabled
            .then(|| self.general.out_dir.join(&self.metrics.file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[general]
log_level = "debug"

[run]
topk_sweep = [5, 10]
repetitions = 2
concurrency = 4
query_timeout_ms = 500

[dataset]
source = "jsonl"
path = "data/songs.jsonl"

[workload]
path = "queries.toml"

[[backends]]
name = "reference"
kind = "flat"
params = { metric = "dot_product" }

[[backends]]
name = "lossy"
kind = "flat-sampled"
id_repr = "string"
teardown = false

[metrics]
enabled = true
"#;

    fn write_sample() -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vecbench.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_sample() {
        let (dir, path) = write_sample();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, LogFormat::Text);
        assert_eq!(config.run.topk_sweep, vec![5, 10]);
        assert_eq!(config.run.warmup, 1);
        assert_eq!(config.run.batch_size, 2000);
        assert_eq!(
            config.dataset,
            DatasetConfig::Jsonl {
                path: dir.path().join("data/songs.jsonl")
            }
        );
        assert_eq!(config.workload.path, dir.path().join("queries.toml"));
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].kind(), "flat");
        assert!(!config.backends[1].teardown);
        assert_eq!(
            config.metrics_path(),
            Some(PathBuf::from("results").join("metrics.prom"))
        );

        let plan = config.plan().unwrap();
        assert_eq!(plan.query_timeout, Some(Duration::from_millis(500)));
        assert_eq!(plan.concurrency, 4);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let (_dir, path) = write_sample();
        let mut config = Config::load(&path).unwrap();
        config.apply(Overrides {
            backends: Some(vec!["lossy".into(), "flat".into()]),
            topk: Some(vec![1]),
            concurrency: Some(8),
            seed: Some(3),
            out_dir: Some(PathBuf::from("/tmp/out")),
            ..Overrides::default()
        });
        let names: Vec<&str> = config.backends.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["lossy", "flat"]);
        assert_eq!(config.backends[0].id_repr, vecbench_core::IdRepr::String);
        assert_eq!(config.run.topk_sweep, vec![1]);
        assert_eq!(config.run.concurrency, 8);
        assert_eq!(config.run.repetitions, 2);
        assert_eq!(config.run.seed, Some(3));
        assert_eq!(config.results_path(), PathBuf::from("/tmp/out/metrics.json"));
    }

    #[test]
    fn test_invalid_plan_rejected() {
        let (_dir, path) = write_sample();
        let mut config = Config::load(&path).unwrap();
        config.apply(Overrides {
            concurrency: Some(0),
            ..Overrides::default()
        });
        assert!(config.plan().is_err());

        config.backends.clear();
        assert!(config.plan().is_err());
    }

    #[test]
    fn test_synthetic_dataset_section() {
        let config: Config = toml::from_str(
            r#"
[dataset]
source = "synthetic"
size = 1000
dimension = 64

[workload]
path = "q.toml"
"#,
        )
        .unwrap();
        assert_eq!(
            config.dataset,
            DatasetConfig::Synthetic {
                size: 1000,
                dimension: 64,
                seed: 0
            }
        );
        assert!(config.backends.is_empty());
        assert!(config.metrics_path().is_none());
    }
}
