//! The weekly run: fetch, aggregate, summarize, project.
//!
//! Steps run one after another on a single task. Source and summarizer
//! failures degrade the run; only storage failures abort it.

use std::path::Path;

use chrono::{DateTime, Days, FixedOffset, NaiveDate};
use tracing::{info, instrument, warn};

use crate::aggregate::{AggregateOptions, AggregationReport, aggregate_week};
use crate::archive::ArchiveStore;
use crate::error::StorageError;
use crate::normalize::NormalizeOptions;
use crate::orchestrator::{SummaryOutcome, ensure_summary};
use crate::site::{Render, build_site};
use crate::sources::{Fetch, SourceQuery, fetch_all};
use crate::summarize::Summarize;
use crate::week::WeekKey;

/// Inputs of the fetch step.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub as_of: NaiveDate,
    /// Days of publication history accepted; 0 disables the filter.
    pub lookback_days: u32,
    pub queries: Vec<SourceQuery>,
}

impl FetchPlan {
    /// The ISO week `as_of` falls in.
    pub fn week(&self) -> WeekKey {
        WeekKey::from_date(self.as_of)
    }

    /// Earliest publication date kept, if the lookback filter is on.
    pub fn not_before(&self) -> Option<NaiveDate> {
        if self.lookback_days == 0 {
            return None;
        }
        self.as_of.checked_sub_days(Days::new(u64::from(self.lookback_days)))
    }
}

/// What a full run did.
#[derive(Debug)]
pub struct RunReport {
    pub week: WeekKey,
    pub aggregation: AggregationReport,
    pub summary: SummaryOutcome,
    pub pages_written: usize,
}

impl RunReport {
    /// Human-readable reasons the run was degraded, empty when it was not.
    pub fn degradations(&self) -> Vec<String> {
        let mut reasons: Vec<String> = self
            .aggregation
            .sources_failed
            .iter()
            .map(|f| format!("source {} failed: {}", f.query, f.error))
            .collect();
        if self.aggregation.all_sources_failed {
            reasons.push("all sources failed; dataset left unchanged".to_string());
        }
        if let SummaryOutcome::Failed(e) = &self.summary {
            reasons.push(format!("summary not refreshed: {e}"));
        }
        reasons
    }

    pub fn is_degraded(&self) -> bool {
        !self.degradations().is_empty()
    }
}

/// Fetch every query of the plan and merge the results into the plan's week.
#[instrument(level = "info", skip_all, fields(as_of = %plan.as_of, week = %plan.week()))]
pub async fn run_fetch<A, F>(archive: &mut A, fetcher: &F, plan: &FetchPlan) -> Result<AggregationReport, StorageError>
where
    A: ArchiveStore,
    F: Fetch,
{
    let batches = fetch_all(fetcher, &plan.queries).await;
    let opts = AggregateOptions {
        week: plan.week(),
        fetch_date: plan.as_of,
        lookback_days: plan.lookback_days,
        normalize: NormalizeOptions {
            not_before: plan.not_before(),
        },
    };
    aggregate_week(archive, batches, &opts).await
}

/// Bring one week's summary up to date. See [`ensure_summary`].
pub async fn run_summarize<A, S, C>(
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
    ensure_summary(archive, summarizer, week, clock).await
}

/// Re-render the whole site from the archive. Returns the number of files
/// written.
pub async fn run_site<A, R>(archive: &A, renderer: &R, site_dir: &Path) -> Result<usize, StorageError>
where
    A: ArchiveStore,
    R: Render,
{
    build_site(archive, renderer, site_dir).await
}

/// Everything, in order. `clock` stamps a regenerated summary.
#[instrument(level = "info", skip_all, fields(week = %plan.week()))]
pub async fn run<A, F, S, R, C>(
    archive: &mut A,
    fetcher: &F,
    summarizer: &S,
    renderer: &R,
    plan: &FetchPlan,
    site_dir: &Path,
    clock: &C,
) -> Result<RunReport, StorageError>
where
    A: ArchiveStore,
    F: Fetch,
    S: Summarize,
    R: Render,
    C: Fn() -> DateTime<FixedOffset>,
{
    let week = plan.week();
    let aggregation = run_fetch(archive, fetcher, plan).await?;
    let summary = run_summarize(archive, summarizer, &week, clock).await?;
    let pages_written = run_site(archive, renderer, site_dir).await?;

    let report = RunReport {
        week,
        aggregation,
        summary,
        pages_written,
    };
    let degradations = report.degradations();
    if degradations.is_empty() {
        info!(total = report.aggregation.total_count, pages = pages_written, "Run complete");
    } else {
        for reason in &degradations {
            warn!(%reason, "Run degraded");
        }
    }
    Ok(report)
}
