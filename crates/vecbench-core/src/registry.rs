//! Backend constructors keyed by kind.
//!
//! New databases are added by registering a constructor, not by branching on
//! names at the call site.

use crate::backend::{BackendError, IdRepr, VectorBackend};
use crate::backends::{DistanceMetric, FlatBackend, FlatOptions};
use crate::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Per-backend configuration entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Label used in logs and in the results
    pub name: String,
    /// Registry key selecting the constructor; defaults to `name`
    #[serde(default)]
    pub kind: Option<String>,
    /// Identifier comparison form used when scoring recall
    #[serde(default)]
    pub id_repr: IdRepr,
    /// Upsert batch size; the run default applies when unset
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Whether to drop the collection after the sweep
    #[serde(default = "default_teardown")]
    pub teardown: bool,
    /// Adapter-specific settings
    #[serde(default)]
    pub params: toml::Table,
}

fn default_teardown() -> bool {
    true
}

impl BackendSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            id_repr: IdRepr::default(),
            batch_size: None,
            teardown: true,
            params: toml::Table::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> String {
        self.kind.clone().unwrap_or_else(|| self.name.clone()).to_lowercase()
    }

    /// Deserialize one entry of `params`, `None` when absent.
    pub fn param<T>(&self, key: &str) -> std::result::Result<Option<T>, BackendError>
    where
        T: for<'de> Deserialize<'de>,
    {
        match self.params.get(key) {
            Some(v) => v
                .clone()
                .try_into()
                .map(Some)
                .map_err(|e| BackendError::Request(format!("invalid param '{}': {}", key, e))),
            None => Ok(None),
        }
    }
}

pub type BackendConstructor = Arc<
    dyn Fn(&BackendSpec) -> std::result::Result<Arc<dyn VectorBackend>, BackendError> + Send + Sync,
>;

#[derive(Clone, Default)]
pub struct BackendRegistry {
    constructors: HashMap<String, BackendConstructor>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the in-process `flat` and `flat-sampled` backends
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("flat", |spec| Ok(Arc::new(FlatBackend::new(flat_options(spec, 1.0)?))));
        registry.register("flat-sampled", |spec| {
            Ok(Arc::new(FlatBackend::new(flat_options(spec, 0.5)?)))
        });
        registry
    }

    pub fn register<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&BackendSpec) -> std::result::Result<Arc<dyn VectorBackend>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(kind.to_lowercase(), Arc::new(constructor));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(&kind.to_lowercase())
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.constructors.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Check every spec up front so a typo fails the run before any setup call.
    pub fn validate(&self, specs: &[BackendSpec]) -> Result<()> {
        let mut seen = HashSet::new();
        for spec in specs {
            let kind = spec.kind();
            if !self.contains(&kind) {
                return Err(BenchError::Configuration(format!(
                    "unsupported backend '{}' (known: {})",
                    kind,
                    self.kinds().join(", ")
                )));
            }
            if !seen.insert(spec.name.clone()) {
                return Err(BenchError::Configuration(format!(
                    "backend '{}' listed more than once",
                    spec.name
                )));
            }
            if spec.batch_size == Some(0) {
                return Err(BenchError::Configuration(format!(
                    "backend '{}' has batch_size 0",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    pub fn build(
        &self,
        spec: &BackendSpec,
    ) -> std::result::Result<Arc<dyn VectorBackend>, BackendError> {
        let kind = spec.kind();
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or_else(|| BackendError::Other(format!("no constructor for '{}'", kind)))?;
        constructor(spec)
    }
}

fn flat_options(spec: &BackendSpec, default_ratio: f32) -> std::result::Result<FlatOptions, BackendError> {
    let metric: DistanceMetric = spec.param("metric")?.unwrap_or_default();
    let sample_ratio: f32 = spec.param::<f64>("sample_ratio")?.map(|r| r as f32).unwrap_or(default_ratio);
    if !(0.0..=1.0).contains(&sample_ratio) || sample_ratio == 0.0 {
        return Err(BackendError::Request(format!(
            "sample_ratio must be in (0, 1], got {}",
            sample_ratio
        )));
    }
    let latency = spec.param::<u64>("latency_ms")?.map(Duration::from_millis);
    Ok(FlatOptions {
        metric,
        sample_ratio,
        latency,
    })
}
