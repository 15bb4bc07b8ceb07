use crate::config::DatasetConfig;
use anyhow::{anyhow, Context};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use vecbench_core::{Dataset, Payload};

const EMBEDDING_FIELD: &str = "embedding";

pub fn load(config: &DatasetConfig) -> Result<Dataset, anyhow::Error> {
    let dataset = match config {
        DatasetConfig::Jsonl { path } => load_jsonl(path)?,
        DatasetConfig::Synthetic {
            size,
            dimension,
            seed,
        } => Dataset::synthetic(*size, *dimension, *seed)?,
    };
    tracing::info!(
        records = dataset.len(),
        dimension = dataset.dimension(),
        "Loaded reference dataset"
    );
    Ok(dataset)
}

/// Every non-blank line is an object with an `embedding` array; the other fields form the payload.
pub fn load_jsonl(path: &Path) -> Result<Dataset, anyhow::Error> {
    let file = File::open(path).with_context(|| format!("opening dataset {}", path.display()))?;
    let mut vectors = Vec::new();
    let mut payloads = Vec::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let at = || format!("{}:{}", path.display(), idx + 1);
        let mut record: Payload = serde_json::from_str(line).with_context(at)?;
        let embedding = record
            .remove(EMBEDDING_FIELD)
            .ok_or_else(|| anyhow!("{}: missing '{}'", at(), EMBEDDING_FIELD))?;
        let vector: Vec<f32> = serde_json::from_value(embedding).with_context(at)?;
        vectors.push(vector);
        payloads.push(record);
    }

    Ok(Dataset::new(vectors, payloads)?)
}
