//! Test backends shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vecbench_core::baseline;
use vecbench_core::{BackendError, Dataset, NativeId, SearchHit, SearchResult, VectorBackend};

/// Returns the exact top-k for any k, optionally after a fixed delay
#[derive(Default)]
pub struct OracleBackend {
    data: RwLock<Option<Dataset>>,
    pub delay: Option<Duration>,
    /// Every n-th search fails
    pub fail_every: Option<usize>,
    /// The first n searches fail
    pub fail_first: Option<usize>,
    pub searches: AtomicUsize,
    pub setups: AtomicUsize,
    pub teardowns: AtomicUsize,
}

impl OracleBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn failing_every(every: usize) -> Self {
        Self {
            fail_every: Some(every),
            ..Self::default()
        }
    }

    pub fn failing_first(count: usize) -> Self {
        Self {
            fail_first: Some(count),
            ..Self::default()
        }
    }
}

#[async_trait]
impl VectorBackend for OracleBackend {
    async fn setup(&self, _dimension: usize) -> Result<(), BackendError> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert(&self, dataset: &Dataset, _batch_size: usize) -> Result<(), BackendError> {
        *self.data.write() = Some(dataset.clone());
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<SearchResult, BackendError> {
        let n = self.searches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_first.map_or(false, |count| n <= count) {
            return Err(BackendError::Request(format!("injected failure #{}", n)));
        }
        if let Some(every) = self.fail_every {
            if n % every == 0 {
                return Err(BackendError::Request(format!("injected failure #{}", n)));
            }
        }
        let guard = self.data.read();
        let data = guard
            .as_ref()
            .ok_or_else(|| BackendError::NotReady("no data".into()))?;
        let top = baseline::exact_top_k_scored(vector, data.as_flat(), data.dimension(), top_k);
        Ok(top
            .into_iter()
            .map(|(row, score)| SearchHit {
                id: NativeId::Int(row as u64),
                payload: data.payload(row).clone(),
                score,
            })
            .collect())
    }

    async fn teardown(&self) -> Result<(), BackendError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        *self.data.write() = None;
        Ok(())
    }
}

/// Fails during setup
#[derive(Default)]
pub struct BrokenBackend {
    pub teardowns: AtomicUsize,
}

#[async_trait]
impl VectorBackend for BrokenBackend {
    async fn setup(&self, _dimension: usize) -> Result<(), BackendError> {
        Err(BackendError::Connection("connection refused".into()))
    }

    async fn upsert(&self, _dataset: &Dataset, _batch_size: usize) -> Result<(), BackendError> {
        Ok(())
    }

    async fn search(&self, _vector: &[f32], _top_k: usize) -> Result<SearchResult, BackendError> {
        Ok(Vec::new())
    }

    async fn teardown(&self) -> Result<(), BackendError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sets up fine but rejects the upload
#[derive(Default)]
pub struct IngestFailingBackend {
    pub searches: AtomicUsize,
    pub teardowns: AtomicUsize,
}

#[async_trait]
impl VectorBackend for IngestFailingBackend {
    async fn setup(&self, _dimension: usize) -> Result<(), BackendError> {
        Ok(())
    }

    async fn upsert(&self, _dataset: &Dataset, _batch_size: usize) -> Result<(), BackendError> {
        Err(BackendError::Request("payload too large".into()))
    }

    async fn search(&self, _vector: &[f32], _top_k: usize) -> Result<SearchResult, BackendError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn teardown(&self) -> Result<(), BackendError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Panics inside search
pub struct PanickingBackend;

#[async_trait]
impl VectorBackend for PanickingBackend {
    async fn setup(&self, _dimension: usize) -> Result<(), BackendError> {
        Ok(())
    }

    async fn upsert(&self, _dataset: &Dataset, _batch_size: usize) -> Result<(), BackendError> {
        Ok(())
    }

    async fn search(&self, _vector: &[f32], _top_k: usize) -> Result<SearchResult, BackendError> {
        panic!("search exploded");
    }

    async fn teardown(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Unit query vectors from a seed distinct from the reference set
pub fn query_vectors(count: usize, dimension: usize, seed: u64) -> Vec<Vec<f32>> {
    let ds = Dataset::synthetic(count, dimension, seed).expect("synthetic queries");
    ds.vectors().map(|v| v.to_vec()).collect()
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
