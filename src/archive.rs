//! Durable per-week storage of datasets and summaries.
//!
//! On disk every week is two pretty-printed JSON files in one flat directory:
//!
//! ```text
//! data/
//! ├── news_2024-W03.json
//! ├── summary_2024-W03.json
//! ├── news_2024-W04.json
//! ├── latest.json           # copy of the newest week's dataset
//! └── latest_summary.json   # copy of the newest week's summary
//! ```
//!
//! The two `latest` files are for outside readers only and are never read
//! back. Writes go through [`write_atomic`], so an interrupted run leaves either
//! the previous record or the new one.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::error::StorageError;
use crate::models::{WeeklyDataset, WeeklySummary};
use crate::utils::write_atomic;
use crate::week::WeekKey;

/// Read and write access to the week archive.
///
/// `put_dataset` merges with whatever is stored, so callers never have to
/// load first to avoid losing items.
pub trait ArchiveStore {
    /// The stored dataset, or `None` if the week was never stored.
    async fn get_dataset(&self, week: &WeekKey) -> Result<Option<WeeklyDataset>, StorageError>;

    /// Union `dataset` into the stored one and return what is now stored.
    async fn put_dataset(&mut self, dataset: WeeklyDataset) -> Result<WeeklyDataset, StorageError>;

    async fn get_summary(&self, week: &WeekKey) -> Result<Option<WeeklySummary>, StorageError>;

    /// Replace the week's summary. Fails if the week has no dataset.
    async fn put_summary(&mut self, summary: WeeklySummary) -> Result<(), StorageError>;

    /// Every week that has a dataset, ascending.
    async fn list_weeks(&self) -> Result<Vec<WeekKey>, StorageError>;
}

const NEWS_PREFIX: &str = "news_";
const SUMMARY_PREFIX: &str = "summary_";
const LATEST_NEWS: &str = "latest.json";
const LATEST_SUMMARY: &str = "latest_summary.json";

/// Filesystem archive rooted at one directory.
#[derive(Debug, Clone)]
pub struct FsArchive {
    root: PathBuf,
}

impl FsArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `news_<week>.json` under the root.
    pub fn news_path(&self, week: &WeekKey) -> PathBuf {
        self.root.join(format!("{NEWS_PREFIX}{week}.json"))
    }

    pub fn summary_path(&self, week: &WeekKey) -> PathBuf {
        self.root.join(format!("{SUMMARY_PREFIX}{week}.json"))
    }

    /// No stored week comes after `week`.
    async fn is_newest(&self, week: &WeekKey) -> Result<bool, StorageError> {
        Ok(self.list_weeks().await?.last().is_none_or(|newest| newest <= week))
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(path, e)),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StorageError::Json {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
        let body = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, &body).await
    }
}

/// `news_2024-W03.json` -> `2024-W03`. Anything else is not ours.
fn week_from_file_name(name: &str) -> Option<WeekKey> {
    name.strip_prefix(NEWS_PREFIX)?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

impl ArchiveStore for FsArchive {
    #[instrument(level = "debug", skip(self), fields(root = %self.root.display()))]
    async fn get_dataset(&self, week: &WeekKey) -> Result<Option<WeeklyDataset>, StorageError> {
        let path = self.news_path(week);
        let dataset: Option<WeeklyDataset> = Self::read_json(&path).await?;
        Ok(dataset.map(|ds| {
            let before = ds.all_news.len();
            let ds = ds.reindexed();
            if ds.total_count != before {
                warn!(path = %path.display(), before, after = ds.total_count, "Repaired stored dataset");
            }
            ds
        }))
    }

    #[instrument(level = "info", skip_all, fields(week = %dataset.week))]
    async fn put_dataset(&mut self, dataset: WeeklyDataset) -> Result<WeeklyDataset, StorageError> {
        let merged = match self.get_dataset(&dataset.week).await? {
            Some(mut stored) => {
                let stats = stored.merge(dataset);
                debug!(added = stats.added, duplicates = stats.duplicates, "Merged with stored dataset");
                stored
            }
            None => dataset.reindexed(),
        };
        let path = self.news_path(&merged.week);
        Self::write_json(&path, &merged).await?;
        info!(path = %path.display(), total = merged.total_count, "Stored dataset");

        if self.is_newest(&merged.week).await? {
            Self::write_json(&self.root.join(LATEST_NEWS), &merged).await?;
        }
        Ok(merged)
    }

    async fn get_summary(&self, week: &WeekKey) -> Result<Option<WeeklySummary>, StorageError> {
        Self::read_json(&self.summary_path(week)).await
    }

    #[instrument(level = "info", skip_all, fields(week = %summary.week))]
    async fn put_summary(&mut self, summary: WeeklySummary) -> Result<(), StorageError> {
        if !fs::try_exists(self.news_path(&summary.week))
            .await
            .map_err(|e| StorageError::io(self.news_path(&summary.week), e))?
        {
            return Err(StorageError::SummaryWithoutDataset {
                week: summary.week.to_string(),
            });
        }
        let path = self.summary_path(&summary.week);
        Self::write_json(&path, &summary).await?;
        info!(path = %path.display(), news_count = summary.news_count, "Stored summary");

        if self.is_newest(&summary.week).await? {
            Self::write_json(&self.root.join(LATEST_SUMMARY), &summary).await?;
        }
        Ok(())
    }

    async fn list_weeks(&self) -> Result<Vec<WeekKey>, StorageError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.root, e)),
        };
        let mut weeks = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.root, e))?
        {
            if let Some(week) = week_from_file_name(&entry.file_name().to_string_lossy()) {
                weeks.push(week);
            }
        }
        weeks.sort();
        weeks.dedup();
        Ok(weeks)
    }
}

#[cfg(test)]
pub(crate) use memory::MemoryArchive;
