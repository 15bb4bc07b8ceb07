//! Measurement engine for nearest-neighbor vector search benchmarks.
//!
//! The engine computes an exact baseline for recall, drives concurrent query
//! workloads against pluggable backends and folds the samples into a stable
//! results schema. Database clients, embedding models and report rendering
//! plug in through the traits in [`backend`] and [`embedding`].

pub mod types;
pub mod dataset;
pub mod baseline;
pub mod backend;
pub mod backends;
pub mod registry;
pub mod embedding;
pub mod scoring;
pub mod runner;
pub mod metrics;
pub mod results;
pub mod bench;

pub use types::{Expectation, NativeId, Payload, Query, SearchHit, SearchResult};
pub use dataset::{Dataset, NormReport};
pub use backend::{BackendError, IdRepr, VectorBackend};
pub use registry::{BackendRegistry, BackendSpec};
pub use embedding::{Embedder, HashingEmbedder, PreparedWorkload};
pub use runner::{BackendUnderTest, QueryFailure, QuerySample, RepetitionOutcome, RunContext};
pub use metrics::{BackendKResult, RepetitionSummary};
pub use results::{BackendEntry, HnswParams, ResultsStore, RunConfig};
pub use bench::{Benchmark, BenchmarkPlan, RepetitionObserver};

use thiserror::Error;

/// Core error type for benchmark operations
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Configuration Error: {0}")]
    Configuration(String),
    #[error("Backend '{backend}' failed during {stage}: {source}")]
    BackendSetup {
        backend: String,
        stage: Stage,
        #[source]
        source: BackendError,
    },
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("Embedding Error: {0}")]
    Embedding(String),
    #[error("Query worker for backend '{backend}' terminated abnormally: {reason}")]
    WorkerPanic { backend: String, reason: String },
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization Error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Lifecycle stage of a backend when a fatal error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Construct,
    Setup,
    Ingest,
    Query,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Construct => "construct",
            Stage::Setup => "setup",
            Stage::Ingest => "ingest",
            Stage::Query => "query",
        };
        f.write_str(s)
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
