//! Reference vectors and their payloads.

use crate::baseline;
use crate::types::{Payload, ROW_ID_FIELD};
use crate::{BenchError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;

/// Allowed deviation of a reference vector's L2 norm from 1.0
pub const NORM_TOLERANCE: f32 = 1e-3;

/// Immutable reference set: N vectors of dimension D stored row-major
#[derive(Debug, Clone)]
pub struct Dataset {
    dimension: usize,
    data: Vec<f32>,
    payloads: Vec<Payload>,
}

/// A contiguous slice of records handed to a backend in one upsert request
#[derive(Debug, Clone, Copy)]
pub struct RecordBatch<'a> {
    /// Row index of the first record in the batch
    pub offset: usize,
    pub dimension: usize,
    pub vectors: &'a [f32],
    pub payloads: &'a [Payload],
}

impl<'a> RecordBatch<'a> {
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// (row index, vector, payload) for each record
    pub fn rows(&self) -> impl Iterator<Item = (usize, &'a [f32], &'a Payload)> + 'a {
        let offset = self.offset;
        let vectors: &'a [f32] = self.vectors;
        let payloads: &'a [Payload] = self.payloads;
        vectors
            .chunks_exact(self.dimension)
            .zip(payloads.iter())
            .enumerate()
            .map(move |(i, (v, p))| (offset + i, v, p))
    }
}

/// Outcome of the unit-norm check over the reference set
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormReport {
    pub min_norm: f32,
    pub max_norm: f32,
    pub violations: usize,
    pub tolerance: f32,
}

impl NormReport {
    pub fn is_normalized(&self) -> bool {
        self.violations == 0
    }
}

impl Dataset {
    /// Build a dataset from row vectors and their payloads.
    ///
    /// Payloads without a `row_id` get the row index inserted.
    pub fn new(vectors: Vec<Vec<f32>>, mut payloads: Vec<Payload>) -> Result<Self> {
        if vectors.len() != payloads.len() {
            return Err(BenchError::Configuration(format!(
                "dataset has {} vectors but {} payloads",
                vectors.len(),
                payloads.len()
            )));
        }
        let dimension = match vectors.first() {
            Some(v) if v.is_empty() => {
                return Err(BenchError::Configuration("dataset vectors are empty".into()))
            }
            Some(v) => v.len(),
            None => return Err(BenchError::Configuration("dataset has no vectors".into())),
        };

        let mut data = Vec::with_capacity(vectors.len() * dimension);
        for (row, v) in vectors.into_iter().enumerate() {
            if v.len() != dimension {
                return Err(BenchError::Configuration(format!(
                    "vector {} has dimension {}, expected {}",
                    row,
                    v.len(),
                    dimension
                )));
            }
            data.extend_from_slice(&v);
        }
        for (row, payload) in payloads.iter_mut().enumerate() {
            payload
                .entry(ROW_ID_FIELD)
                .or_insert_with(|| Value::from(row as u64));
        }

        Ok(Self {
            dimension,
            data,
            payloads,
        })
    }

    /// Deterministic synthetic dataset of unit vectors.
    pub fn synthetic(size: usize, dimension: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut vectors = Vec::with_capacity(size);
        let mut payloads = Vec::with_capacity(size);
        for row in 0..size {
            let raw: Vec<f32> = (0..dimension).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            vectors.push(normalize(raw));
            let mut payload = Payload::new();
            payload.insert(ROW_ID_FIELD.into(), Value::from(row as u64));
            payload.insert("bucket".into(), Value::from((row % 10) as u64));
            payloads.push(payload);
        }
        Self::new(vectors, payloads)
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Row-major view of all reference vectors
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    pub fn vector(&self, row: usize) -> &[f32] {
        &self.data[row * self.dimension..(row + 1) * self.dimension]
    }

    pub fn payload(&self, row: usize) -> &Payload {
        &self.payloads[row]
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension)
    }

    /// Split the dataset into consecutive batches of at most `batch_size` records.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = RecordBatch<'_>> {
        let batch_size = batch_size.max(1);
        let dimension = self.dimension;
        self.data
            .chunks(batch_size * dimension)
            .zip(self.payloads.chunks(batch_size))
            .enumerate()
            .map(move |(i, (vectors, payloads))| RecordBatch {
                offset: i * batch_size,
                dimension,
                vectors,
                payloads,
            })
    }

    /// Compute L2 norms of every vector and count those outside the tolerance.
    pub fn norm_report(&self) -> NormReport {
        let mut min_norm = f32::INFINITY;
        let mut max_norm = 0.0f32;
        let mut violations = 0;
        for v in self.vectors() {
            let norm = l2_norm(v);
            min_norm = min_norm.min(norm);
            max_norm = max_norm.max(norm);
            if (norm - 1.0).abs() > NORM_TOLERANCE {
                violations += 1;
            }
        }
        NormReport {
            min_norm,
            max_norm,
            violations,
            tolerance: NORM_TOLERANCE,
        }
    }

    /// Run the unit-norm check and log a warning when it fails.
    ///
    /// The run continues either way; dot-product-as-cosine is then only approximate.
    pub fn check_normalized(&self) -> NormReport {
        let report = self.norm_report();
        if report.is_normalized() {
            tracing::info!("All {} reference vectors are normalized (L2 norm ~1)", self.len());
        } else {
            tracing::warn!(
                violations = report.violations,
                min_norm = report.min_norm,
                max_norm = report.max_norm,
                "Dataset invariant warning: not all reference vectors are normalized"
            );
        }
        report
    }

    /// Exact top-k over this dataset, checking the query dimension first.
    pub fn exact_top_k(&self, query: &[f32], k: usize) -> Result<Vec<usize>> {
        if query.len() != self.dimension {
            return Err(BenchError::Dimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        Ok(baseline::exact_top_k(query, &self.data, self.dimension, k))
    }
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = l2_norm(&v);
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}
