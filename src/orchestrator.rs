//! Deciding when a week's summary must be (re)generated.
//!
//! A summary is regenerated only when it is missing or when its `news_count`
//! no longer matches the dataset's `total_count`. Elapsed time never matters.
//! A failed generation leaves the stored summary untouched.

use chrono::{DateTime, FixedOffset, Local};
use tracing::{info, instrument, warn};

use crate::archive::ArchiveStore;
use crate::error::{StorageError, SummarizationError};
use crate::models::{WeeklyDataset, WeeklySummary};
use crate::summarize::Summarize;
use crate::week::WeekKey;

/// What should happen to a week's summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Generate,
    Regenerate { stored: usize, current: usize },
    Keep,
}

/// Compare a dataset with its stored summary.
///
/// Only the item count matters: a summary written for as many items as the
/// dataset holds is kept, however old it is.
pub fn decide(dataset: &WeeklyDataset, summary: Option<&WeeklySummary>) -> Decision {
    match summary {
        None => Decision::Generate,
        Some(s) if s.news_count != dataset.total_count => Decision::Regenerate {
            stored: s.news_count,
            current: dataset.total_count,
        },
        Some(_) => Decision::Keep,
    }
}

/// How one week's summary step ended.
#[derive(Debug)]
pub enum SummaryOutcome {
    Generated { news_count: usize },
    UpToDate,
    NoDataset,
    /// The week exists but has no items.
    NothingToSummarize,
    Failed(SummarizationError),
}

impl SummaryOutcome {
    /// Whether the run should report this step as degraded.
    pub fn is_degraded(&self) -> bool {
        matches!(self, SummaryOutcome::Failed(_))
    }
}

/// Wall-clock time with the local offset, used to stamp new summaries.
pub fn local_now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

/// Bring the stored summary of `week` up to date.
///
/// # Arguments
///
/// * `archive` - Where the week's dataset and summary live
/// * `summarizer` - Backend asked for the digest
/// * `week` - The week to check
/// * `clock` - Read once the backend has answered, to stamp `generated_at`
///
/// # Returns
///
/// Only storage problems are returned as `Err`; a summarizer failure is an
/// [`SummaryOutcome::Failed`] outcome.
#[instrument(level = "info", skip(archive, summarizer, clock))]
pub async fn ensure_summary<A, S, C>(
    archive: &mut A,
    summarizer: &S,
    week: &WeekKey,
    clock: &C,
) -> Result<SummaryOutcome, StorageError>
where
    A: ArchiveStore,
    S: Summarize,
    C: Fn() -> DateTime<FixedOffset>,
{
    let Some(dataset) = archive.get_dataset(week).await? else {
        info!("No dataset for week; nothing to summarize");
        return Ok(SummaryOutcome::NoDataset);
    };
    let existing = archive.get_summary(week).await?;

    match decide(&dataset, existing.as_ref()) {
        Decision::Keep => {
            info!(news_count = dataset.total_count, "Summary is up to date");
            return Ok(SummaryOutcome::UpToDate);
        }
        Decision::Generate => info!(news_count = dataset.total_count, "No summary yet"),
        Decision::Regenerate { stored, current } => {
            info!(stored, current, "Summary is stale; regenerating")
        }
    }

    if dataset.total_count == 0 {
        info!("Week has no items; skipping summary");
        return Ok(SummaryOutcome::NothingToSummarize);
    }

    let text = match summarizer.summarize(&dataset).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, kept_previous = existing.is_some(), "Summary generation failed");
            return Ok(SummaryOutcome::Failed(e));
        }
    };

    let summary = WeeklySummary {
        week: *week,
        generated_at: clock(),
        summary: text,
        model: summarizer.model().to_string(),
        news_count: dataset.total_count,
    };
    archive.put_summary(summary).await?;
    info!(news_count = dataset.total_count, model = summarizer.model(), "Summary stored");
    Ok(SummaryOutcome::Generated {
        news_count: dataset.total_count,
    })
}
