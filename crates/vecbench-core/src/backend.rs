//! Capability set every database under test implements.

use crate::dataset::Dataset;
use crate::types::{NativeId, SearchHit, SearchResult, ROW_ID_FIELD};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

/// Errors surfaced by a backend adapter
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Connection Error: {0}")]
    Connection(String),
    #[error("Dimension mismatch: index has {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("Request Error: {0}")]
    Request(String),
    #[error("Backend not ready: {0}")]
    NotReady(String),
    #[error("Backend Error: {0}")]
    Other(String),
}

/// Adapter for one vector database.
///
/// The benchmark calls `setup`, `upsert` and `teardown` strictly sequentially
/// and never while searches are in flight. `search` is called concurrently
/// from several workers, so implementations keep mutable state behind
/// interior locks.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Create (or reset) the collection for vectors of `dimension` components
    async fn setup(&self, dimension: usize) -> Result<(), BackendError>;

    /// Insert every record of `dataset`, sending at most `batch_size` per request
    async fn upsert(&self, dataset: &Dataset, batch_size: usize) -> Result<(), BackendError>;

    /// Return up to `top_k` hits for `vector`
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<SearchResult, BackendError>;

    /// Drop the collection
    async fn teardown(&self) -> Result<(), BackendError>;
}

/// How identifiers are compared when scoring recall for a backend.
///
/// Backends hand identifiers back in different shapes; the comparison form is
/// fixed per backend in configuration instead of guessed per result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdRepr {
    /// Only integral identifiers are usable
    #[default]
    Numeric,
    /// Integers and strings are both compared in their string form
    String,
}

impl IdRepr {
    /// Normalize a JSON identifier value, `None` when it is unusable in this form.
    pub fn from_value(self, value: &Value) -> Option<NativeId> {
        match (self, value) {
            (IdRepr::Numeric, Value::Number(n)) => n.as_u64().map(NativeId::Int),
            (IdRepr::Numeric, _) => None,
            (IdRepr::String, Value::Number(n)) => n
                .as_u64()
                .map(|v| v.to_string())
                .or_else(|| n.as_i64().map(|v| v.to_string()))
                .map(NativeId::Str),
            (IdRepr::String, Value::String(s)) => Some(NativeId::Str(s.clone())),
            (IdRepr::String, _) => None,
        }
    }

    pub fn from_native(self, id: &NativeId) -> Option<NativeId> {
        match (self, id) {
            (IdRepr::Numeric, NativeId::Int(v)) => Some(NativeId::Int(*v)),
            (IdRepr::Numeric, NativeId::Str(_)) => None,
            (IdRepr::String, other) => Some(NativeId::Str(other.to_string())),
        }
    }

    /// Identifier of a returned hit: payload `row_id` first, native id second.
    pub fn hit_id(self, hit: &SearchHit) -> Option<NativeId> {
        hit.payload
            .get(ROW_ID_FIELD)
            .and_then(|v| self.from_value(v))
            .or_else(|| self.from_native(&hit.id))
    }

    /// Identifier of a reference row, taken from its stored payload.
    pub fn row_id(self, dataset: &Dataset, row: usize) -> Option<NativeId> {
        dataset
            .payload(row)
            .get(ROW_ID_FIELD)
            .and_then(|v| self.from_value(v))
            .or_else(|| self.from_native(&NativeId::Int(row as u64)))
    }

    pub fn result_ids(self, hits: &[SearchHit]) -> HashSet<NativeId> {
        hits.iter().filter_map(|h| self.hit_id(h)).collect()
    }
}
