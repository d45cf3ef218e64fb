//! Batch data sources

use async_trait::async_trait;
use realtime_pipeline_types::{PipelineError, Result};
use serde_json::{json, Value};

/// Sliceable input for a batch job
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Number of items in the source
    async fn total(&self) -> Result<usize>;

    /// Read `len` items starting at `offset`
    async fn read_slice(&self, offset: usize, len: usize) -> Result<Vec<Value>>;
}

/// Source backed by a vector of JSON items
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    items: Vec<Value>,
}

impl InMemorySource {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl BatchSource for InMemorySource {
    async fn total(&self) -> Result<usize> {
        Ok(self.items.len())
    }

    async fn read_slice(&self, offset: usize, len: usize) -> Result<Vec<Value>> {
        if offset > self.items.len() {
            return Err(PipelineError::Source(format!(
                "offset {} beyond end of source ({} items)",
                offset,
                self.items.len()
            )));
        }
        let end = offset.saturating_add(len).min(self.items.len());
        Ok(self.items[offset..end].to_vec())
    }
}

/// Source producing a fixed number of synthetic items
#[derive(Debug, Clone, Copy)]
pub struct GeneratedSource {
    count: usize,
}

impl GeneratedSource {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

#[async_trait]
impl BatchSource for GeneratedSource {
    async fn total(&self) -> Result<usize> {
        Ok(self.count)
    }

    async fn read_slice(&self, offset: usize, len: usize) -> Result<Vec<Value>> {
        let end = offset.saturating_add(len).min(self.count);
        Ok((offset..end)
            .map(|index| json!({ "index": index, "value": (index % 100) as f64 / 100.0 }))
            .collect())
    }
}
