use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::Path;
use vecbench_core::Query;

#[derive(Debug, Deserialize)]
struct WorkloadFile {
    #[serde(default)]
    queries: Vec<Query>,
}

/// Load `[[queries]]` entries from a TOML workload file.
pub fn load(path: &Path) -> Result<Vec<Query>, anyhow::Error> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading workload {}", path.display()))?;
    parse(&contents).with_context(|| format!("parsing workload {}", path.display()))
}

pub fn parse(contents: &str) -> Result<Vec<Query>, anyhow::Error> {
    let file: WorkloadFile = toml::from_str(contents)?;
    for (idx, query) in file.queries.iter().enumerate() {
        if query.text.trim().is_empty() {
            bail!("query {} has empty text", idx);
        }
        if query.expected.iter().any(|e| e.is_empty()) {
            bail!("query {} ('{}') has an empty expectation", idx, query.text);
        }
    }
    Ok(file.queries)
}
