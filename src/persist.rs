//! Run snapshots.
//!
//! A finished run is recorded once through a [`SnapshotSink`]. The JSON field
//! names are the ones downstream evaluation scripts read.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PersistError;
use crate::fetch::CrawlResult;

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub topic: String,
    /// All queries searched, in the order they were formulated
    #[serde(rename = "have_query")]
    pub queries: Vec<String>,
    /// Cleaned page texts gathered across epochs
    #[serde(rename = "summary_search")]
    pub summaries: Vec<String>,
    /// The final answer
    #[serde(rename = "summary_text")]
    pub answer: String,
    #[serde(rename = "crawl_res")]
    pub crawl_log: Vec<CrawlResult>,
    /// Epochs actually run
    pub epoch: usize,
    pub mode: String,
}

/// Destination for run snapshots.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn save(&self, file_stem: &str, snapshot: &RunSnapshot) -> Result<(), PersistError>;
}

/// Discards snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl SnapshotSink for NoopSink {
    async fn save(&self, _file_stem: &str, _snapshot: &RunSnapshot) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Writes each snapshot as pretty JSON to
/// `<dir>/<file_stem>_<YYYYmmdd_HHMMSS>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, file_stem: &str) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        self.dir.join(format!("{}_{}.json", file_stem, stamp))
    }
}

#[async_trait]
impl SnapshotSink for JsonFileSink {
    async fn save(&self, file_stem: &str, snapshot: &RunSnapshot) -> Result<(), PersistError> {
        let json = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(file_stem);
        tokio::fs::write(&path, json).await?;

        info!(path = %path.display(), "Saved run snapshot");
        Ok(())
    }
}
