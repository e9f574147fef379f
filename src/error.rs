//! Error taxonomy for the weekly pipeline.
//!
//! The enums mirror how far each failure is allowed to travel:
//!
//! - [`ItemRejected`] and [`SourceFetchError`] are absorbed where they happen
//!   and only show up as counters and `warn!` lines.
//! - [`SummarizationError`] degrades the run but never aborts it.
//! - [`StorageError`] (which wraps [`RenderError`]) and [`ConfigError`] are
//!   fatal and end the run with a non-zero exit.

use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

/// Why a single raw item was not turned into a [`crate::models::NewsItem`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemRejected {
    #[error("item has neither a usable title nor a usable URL")]
    MissingTitleAndUrl,
    #[error("item published on {published} is older than the lookback window (not before {not_before})")]
    Stale {
        published: NaiveDate,
        not_before: NaiveDate,
    },
}

/// One source query could not be served. Isolated to that query.
#[derive(Debug, Error)]
pub enum SourceFetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("could not parse response: {0}")]
    Parse(String),
}

/// The summarization backend did not produce a usable summary.
#[derive(Debug, Error)]
pub enum SummarizationError {
    #[error("no API key configured for the summarization backend")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend answered with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend returned an empty summary")]
    EmptyResponse,
}

impl SummarizationError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SummarizationError::MissingApiKey => false,
            SummarizationError::Status { status, .. } => *status == 429 || *status >= 500,
            SummarizationError::Http(_) | SummarizationError::EmptyResponse => true,
        }
    }
}

/// Archive or site output could not be read or written.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed record {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot store a summary for {week}: no dataset exists for that week")]
    SummaryWithoutDataset { week: String },
    #[error("site rendering failed: {0}")]
    Render(#[from] RenderError),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A page of the site could not be rendered. Raised before anything is
/// written, so the published site stays as it was.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template failed: {0}")]
    Template(#[from] askama::Error),
    #[error("cannot serialize the week index: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration file could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value: {0}")]
    Invalid(String),
}
