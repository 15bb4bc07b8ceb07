use crate::backend::{BackendError, VectorBackend};
use crate::dataset::Dataset;
use crate::types::{NativeId, Payload, SearchHit, SearchResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    L2,
    #[default]
    Cosine,
    DotProduct,
}

impl DistanceMetric {
    /// Similarity score, larger is closer
    fn score(&self, v1: &[f32], v2: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => -v1.iter().zip(v2).map(|(a, b)| (a - b).powi(2)).sum::<f32>(),
            DistanceMetric::Cosine => {
                let dot: f32 = v1.iter().zip(v2).map(|(a, b)| a * b).sum();
                let norm1: f32 = v1.iter().map(|a| a.powi(2)).sum::<f32>().sqrt();
                let norm2: f32 = v2.iter().map(|b| b.powi(2)).sum::<f32>().sqrt();
                if norm1 == 0.0 || norm2 == 0.0 {
                    0.0
                } else {
                    dot / (norm1 * norm2)
                }
            }
            DistanceMetric::DotProduct => v1.iter().zip(v2).map(|(a, b)| a * b).sum(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlatOptions {
    pub metric: DistanceMetric,
    /// Fraction of rows visible to search; below 1.0 the index behaves like a lossy ANN
    pub sample_ratio: f32,
    /// Artificial delay added to every search, simulating a network round trip
    pub latency: Option<Duration>,
}

impl Default for FlatOptions {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            sample_ratio: 1.0,
            latency: None,
        }
    }
}

#[derive(Default)]
struct FlatIndex {
    dimension: usize,
    vectors: Vec<f32>,
    ids: Vec<u64>,
    payloads: Vec<Payload>,
}

/// Brute-force in-memory backend.
///
/// With the default options it returns the exact nearest neighbors and serves
/// as a reference point next to real databases.
pub struct FlatBackend {
    options: FlatOptions,
    index: RwLock<Option<FlatIndex>>,
}

impl FlatBackend {
    pub fn new(options: FlatOptions) -> Self {
        Self {
            options,
            index: RwLock::new(None),
        }
    }

    pub fn exact() -> Self {
        Self::new(FlatOptions::default())
    }

    pub fn len(&self) -> usize {
        self.index.read().as_ref().map(|i| i.ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows dropped by sampling are chosen by a fixed hash so runs are repeatable.
    fn visible(&self, id: u64) -> bool {
        if self.options.sample_ratio >= 1.0 {
            return true;
        }
        let h = id.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 40;
        (h as f32 / (1u64 << 24) as f32) < self.options.sample_ratio
    }
}

#[async_trait]
impl VectorBackend for FlatBackend {
    async fn setup(&self, dimension: usize) -> Result<(), BackendError> {
        if dimension == 0 {
            return Err(BackendError::Request("dimension must be positive".into()));
        }
        *self.index.write() = Some(FlatIndex {
            dimension,
            ..FlatIndex::default()
        });
        Ok(())
    }

    async fn upsert(&self, dataset: &Dataset, batch_size: usize) -> Result<(), BackendError> {
        let mut guard = self.index.write();
        let index = guard
            .as_mut()
            .ok_or_else(|| BackendError::NotReady("upsert before setup".into()))?;
        if dataset.dimension() != index.dimension {
            return Err(BackendError::Dimension {
                expected: index.dimension,
                actual: dataset.dimension(),
            });
        }
        for batch in dataset.batches(batch_size) {
            index.vectors.extend_from_slice(batch.vectors);
            for (row, _, payload) in batch.rows() {
                index.ids.push(row as u64);
                index.payloads.push(payload.clone());
            }
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<SearchResult, BackendError> {
        if let Some(delay) = self.options.latency {
            tokio::time::sleep(delay).await;
        }

        let guard = self.index.read();
        let index = guard
            .as_ref()
            .ok_or_else(|| BackendError::NotReady("search before setup".into()))?;
        if vector.len() != index.dimension {
            return Err(BackendError::Dimension {
                expected: index.dimension,
                actual: vector.len(),
            });
        }

        let mut scores: Vec<(usize, f32)> = index
            .vectors
            .chunks_exact(index.dimension)
            .enumerate()
            .filter(|(pos, _)| self.visible(index.ids[*pos]))
            .map(|(pos, v)| (pos, self.options.metric.score(vector, v)))
            .collect();

        scores.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        Ok(scores
            .into_iter()
            .take(top_k)
            .map(|(pos, score)| SearchHit {
                id: NativeId::Int(index.ids[pos]),
                payload: index.payloads[pos].clone(),
                score,
            })
            .collect())
    }

    async fn teardown(&self) -> Result<(), BackendError> {
        *self.index.write() = None;
        Ok(())
    }
}
