//! Shared store of per-category observations recorded during a run.

use crate::error::Result;
use crate::phase::PhaseKind;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Category → observations in append order.
pub type MetricsSnapshot = BTreeMap<String, Vec<Value>>;

/// One executed template operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    pub worker: usize,
    pub phase: PhaseKind,
    /// Unix milliseconds at completion.
    pub ts: i64,
    pub micros: u64,
}

/// One population batch.
#[derive(Debug, Clone, Serialize)]
pub struct PopulateRecord {
    pub worker: usize,
    pub docs: u64,
    pub micros: u64,
    pub ts: i64,
}

/// Category used for population batches.
pub const POPULATE_CATEGORY: &str = "populate";

/// Cloneable handle to the store; every clone sees the same data.
///
/// One lock guards the whole map. Writers append a single value per call.
#[derive(Clone, Default)]
pub struct MetricsStore {
    inner: Arc<RwLock<MetricsSnapshot>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `observation` to `category`.
    pub async fn record(&self, category: &str, observation: Value) {
        let mut metrics = self.inner.write().await;
        metrics
            .entry(category.to_string())
            .or_default()
            .push(observation);
    }

    /// Serialize `entry` and append it to `category`.
    pub async fn record_entry<T: Serialize>(&self, category: &str, entry: &T) -> Result<()> {
        let value = serde_json::to_value(entry)?;
        self.record(category, value).await;
        Ok(())
    }

    /// Number of observations recorded under `category`.
    pub async fn count(&self, category: &str) -> usize {
        self.inner.read().await.get(category).map_or(0, Vec::len)
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        self.inner.read().await.clone()
    }

    /// JSON serialization of the whole store. Categories come out sorted,
    /// so equal contents serialize to identical bytes.
    pub async fn snapshot_json(&self) -> Result<Vec<u8>> {
        let metrics = self.inner.read().await;
        Ok(serde_json::to_vec(&*metrics)?)
    }

    /// Write the gzipped snapshot as `keyhole_perf.<timestamp>.bson.gz` in
    /// `dir`.
    pub async fn write_snapshot(&self, dir: &Path, timestamp: &str) -> Result<PathBuf> {
        let buf = self.snapshot_json().await?;
        let path = dir.join(snapshot_filename(timestamp));
        write_gzipped(&path, &buf)?;
        Ok(path)
    }
}

pub fn snapshot_filename(timestamp: &str) -> String {
    format!("keyhole_perf.{timestamp}.bson.gz")
}

/// Local time as `YYYYMMDDhhmmss`, used in output file names.
pub fn file_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// Unix milliseconds, for observation timestamps.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Gzip `bytes` into a new file at `path`.
pub fn write_gzipped(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()?;
    Ok(())
}
