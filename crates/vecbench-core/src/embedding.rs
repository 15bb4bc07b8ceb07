//! Query embedding collaborator and the per-run embedded workload.

use crate::dataset::normalize;
use crate::types::Query;
use crate::{BenchError, Result};

/// Turns query text into a unit-length vector.
pub trait Embedder: Send + Sync {
    /// Identifier of the model, recorded in the run configuration
    fn model_id(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Feature-hashing embedder: each lowercase word token adds ±1 to one bucket.
///
/// Deterministic across runs and platforms; good enough to drive a workload
/// without pulling in a neural model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model_id: format!("feature-hashing-{}", dimension),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.dimension == 0 {
            return Err(BenchError::Embedding("embedding dimension is zero".into()));
        }
        let mut v = vec![0.0f32; self.dimension];
        let mut tokens = 0;
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
            tokens += 1;
        }
        if tokens == 0 {
            return Err(BenchError::Embedding(format!("no tokens in query '{}'", text)));
        }
        let v = normalize(v);
        if v.iter().all(|x| *x == 0.0) {
            return Err(BenchError::Embedding(format!("tokens of '{}' cancelled out", text)));
        }
        Ok(v)
    }
}

/// Queries paired with their embeddings.
///
/// Each query is embedded once per run and the vector is reused for warm-up,
/// every repetition's search, and the recall baseline. Embedding never runs
/// inside a timed search.
#[derive(Debug, Clone)]
pub struct PreparedWorkload {
    queries: Vec<Query>,
    vectors: Vec<Vec<f32>>,
}

impl PreparedWorkload {
    pub fn embed(queries: Vec<Query>, embedder: &dyn Embedder) -> Result<Self> {
        let mut vectors = Vec::with_capacity(queries.len());
        for q in &queries {
            vectors.push(embedder.embed(&q.text)?);
        }
        tracing::debug!(queries = queries.len(), model = embedder.model_id(), "Embedded workload");
        Ok(Self { queries, vectors })
    }

    /// Pair queries with vectors computed elsewhere
    pub fn from_parts(queries: Vec<Query>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if queries.len() != vectors.len() {
            return Err(BenchError::Configuration(format!(
                "{} queries but {} query vectors",
                queries.len(),
                vectors.len()
            )));
        }
        Ok(Self { queries, vectors })
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn query(&self, idx: usize) -> &Query {
        &self.queries[idx]
    }

    pub fn vector(&self, idx: usize) -> &[f32] {
        &self.vectors[idx]
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    /// Every vector must match the reference dimension
    pub fn check_dimension(&self, dimension: usize) -> Result<()> {
        match self.vectors.iter().find(|v| v.len() != dimension) {
            Some(v) => Err(BenchError::Dimension {
                expected: dimension,
                actual: v.len(),
            }),
            None => Ok(()),
        }
    }
}
