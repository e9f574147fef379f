//! Merging one run's source batches into the week's dataset.
//!
//! Batches are consumed in plan order and items within a batch in the order
//! the source returned them, so "first seen" is well defined: an item whose
//! dedup key is already in the dataset (from a previous run or an earlier
//! batch of this run) is dropped and only counted.

use chrono::NaiveDate;
use tracing::{info, instrument, warn};

use crate::archive::ArchiveStore;
use crate::error::StorageError;
use crate::models::{MergeStats, WeeklyDataset};
use crate::normalize::{NormalizeOptions, normalize_batch};
use crate::sources::SourceBatch;
use crate::week::WeekKey;

/// A source query that produced nothing because it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSource {
    pub query: String,
    pub error: String,
}

/// Counters and flags describing one aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationReport {
    pub sources_ok: usize,
    pub sources_failed: Vec<FailedSource>,
    pub raw_items: usize,
    pub malformed: usize,
    pub stale: usize,
    pub duplicates: usize,
    pub added: usize,
    pub total_count: usize,
    /// Every source failed; whatever was stored before is kept as is.
    pub all_sources_failed: bool,
}

impl AggregationReport {
    /// At least one source failed.
    pub fn is_degraded(&self) -> bool {
        !self.sources_failed.is_empty()
    }
}

/// Settings for one aggregation run.
#[derive(Debug, Clone, Copy)]
pub struct AggregateOptions {
    pub week: WeekKey,
    pub fetch_date: NaiveDate,
    pub lookback_days: u32,
    pub normalize: NormalizeOptions,
}

/// Pure merge of `batches` into `existing`.
///
/// Returns `None` only when there is nothing to store: every source failed
/// and the week had no dataset yet.
pub fn aggregate(
    existing: Option<WeeklyDataset>,
    batches: Vec<SourceBatch>,
    opts: &AggregateOptions,
) -> (Option<WeeklyDataset>, AggregationReport) {
    let mut report = AggregationReport::default();
    let had_dataset = existing.is_some();
    let mut dataset = existing
        .unwrap_or_else(|| WeeklyDataset::empty(opts.week, opts.fetch_date, opts.lookback_days));
    let mut merged = MergeStats::default();

    for batch in batches {
        let raws = match batch.outcome {
            Ok(raws) => raws,
            Err(e) => {
                report.sources_failed.push(FailedSource {
                    query: batch.query.label(),
                    error: e.to_string(),
                });
                continue;
            }
        };
        report.sources_ok += 1;
        report.raw_items += raws.len();

        let (items, stats) = normalize_batch(&raws, batch.query.source, &opts.normalize);
        report.malformed += stats.malformed;
        report.stale += stats.stale;

        let step = dataset.merge_items(items);
        merged.added += step.added;
        merged.duplicates += step.duplicates;
    }

    report.added = merged.added;
    report.duplicates = merged.duplicates;
    report.all_sources_failed = report.sources_ok == 0 && !report.sources_failed.is_empty();
    if merged.added > 0 {
        dataset.fetch_date = dataset.fetch_date.max(opts.fetch_date);
        dataset.lookback_days = opts.lookback_days;
    }
    report.total_count = dataset.total_count;

    if report.all_sources_failed && !had_dataset {
        return (None, report);
    }
    (Some(dataset), report)
}

/// Load the week, merge the batches, store the result.
#[instrument(level = "info", skip_all, fields(week = %opts.week))]
pub async fn aggregate_week<A: ArchiveStore>(
    archive: &mut A,
    batches: Vec<SourceBatch>,
    opts: &AggregateOptions,
) -> Result<AggregationReport, StorageError> {
    let existing = archive.get_dataset(&opts.week).await?;
    let previous_count = existing.as_ref().map_or(0, |d| d.total_count);
    let (dataset, mut report) = aggregate(existing, batches, opts);

    for failed in &report.sources_failed {
        warn!(query = %failed.query, error = %failed.error, "Source excluded from this run");
    }

    match dataset {
        Some(dataset) => {
            let stored = archive.put_dataset(dataset).await?;
            report.total_count = stored.total_count;
        }
        None => {
            warn!("All sources failed and the week has no data yet; nothing stored");
        }
    }

    if report.all_sources_failed {
        warn!(total = report.total_count, "All sources failed; week dataset left unchanged");
    }
    info!(
        previous = previous_count,
        added = report.added,
        duplicates = report.duplicates,
        malformed = report.malformed,
        stale = report.stale,
        total = report.total_count,
        sources_ok = report.sources_ok,
        sources_failed = report.sources_failed.len(),
        "Aggregated week"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::error::SourceFetchError;
    use crate::models::fixtures::{day, week};
    use crate::models::{NewsItem, SourceId};
    use crate::sources::SourceQuery;
    use crate::sources::stub::raw;

    fn opts() -> AggregateOptions {
        AggregateOptions {
            week: week("2024-W03"),
            fetch_date: day(2024, 1, 17),
            lookback_days: 7,
            normalize: NormalizeOptions::default(),
        }
    }

    fn ok(source: SourceId, query: &str, items: Vec<crate::models::RawItem>) -> SourceBatch {
        SourceBatch {
            query: SourceQuery::new(source, Some(query)),
            outcome: Ok(items),
        }
    }

    fn failed(source: SourceId) -> SourceBatch {
        SourceBatch {
            query: SourceQuery::new(source, None),
            outcome: Err(SourceFetchError::Status {
                url: "https://example.com".to_string(),
                status: 503,
            }),
        }
    }

    fn keys(ds: &WeeklyDataset) -> Vec<String> {
        ds.all_news.iter().map(NewsItem::dedup_key).collect()
    }

    fn sample_batches() -> Vec<SourceBatch> {
        vec![
            ok(
                SourceId::SearchEn,
                "AI fintech",
                vec![raw("A", "https://example.com/u1"), raw("C", "https://example.com/u2")],
            ),
            ok(
                SourceId::SearchZh,
                "AI 金融科技",
                vec![raw("B", "https://example.com/u1?utm=1"), raw("D", "https://example.cn/u3")],
            ),
        ]
    }

    #[test]
    fn test_utm_duplicate_keeps_first_source() {
        let (ds, report) = aggregate(None, sample_batches(), &opts());
        let ds = ds.unwrap();

        assert_eq!(ds.total_count, 3);
        assert_eq!(ds.all_news.len(), 3);
        assert_eq!(ds.all_news[0].title, "A");
        assert_eq!(ds.all_news[0].source, SourceId::SearchEn);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.added, 3);
        assert_eq!(ds.en_news.len(), 2);
        assert_eq!(ds.zh_news.len(), 1);
        assert!(ds.invariants_hold());
    }

    #[test]
    fn test_aggregating_twice_is_idempotent() {
        let (once, _) = aggregate(None, sample_batches(), &opts());
        let once = once.unwrap();
        let (twice, report) = aggregate(Some(once.clone()), sample_batches(), &opts());

        assert_eq!(twice.unwrap(), once);
        assert_eq!(report.added, 0);
        assert_eq!(report.duplicates, 4);
    }

    #[test]
    fn test_incremental_superset_matches_single_merge() {
        let first_run = vec![ok(
            SourceId::SearchEn,
            "AI fintech",
            vec![raw("A", "https://example.com/u1")],
        )];
        let (partial, _) = aggregate(None, first_run, &opts());
        let (incremental, _) = aggregate(partial, sample_batches(), &opts());
        let (single, _) = aggregate(None, sample_batches(), &opts());

        assert_eq!(incremental.unwrap(), single.unwrap());
    }

    #[test]
    fn test_growth_is_monotonic_across_runs() {
        let mut stored: Option<WeeklyDataset> = None;
        let mut previous_keys: Vec<String> = Vec::new();
        for run in 0..4 {
            let items = (0..=run)
                .map(|i| raw(&format!("Story {i}"), &format!("https://example.com/s/{i}")))
                .collect();
            let (next, report) = aggregate(stored, vec![ok(SourceId::SearchEn, "AI fintech", items)], &opts());
            let next = next.unwrap();

            assert_eq!(report.total_count, next.all_news.len());
            assert!(next.all_news.len() >= previous_keys.len());
            let now_keys = keys(&next);
            assert!(previous_keys.iter().all(|k| now_keys.contains(k)));
            previous_keys = now_keys;
            stored = Some(next);
        }
        assert_eq!(previous_keys.len(), 4);
    }

    #[test]
    fn test_partial_failure_keeps_other_sources() {
        let mut batches = sample_batches();
        batches.insert(1, failed(SourceId::Kr36));
        let (ds, report) = aggregate(None, batches, &opts());

        assert_eq!(ds.unwrap().total_count, 3);
        assert_eq!(report.sources_ok, 2);
        assert_eq!(report.sources_failed.len(), 1);
        assert!(report.sources_failed[0].error.contains("503"));
        assert!(report.is_degraded());
        assert!(!report.all_sources_failed);
    }

    #[test]
    fn test_all_sources_failed_keeps_existing_dataset() {
        let (existing, _) = aggregate(None, sample_batches(), &opts());
        let existing = existing.unwrap();
        let later = AggregateOptions {
            fetch_date: day(2024, 1, 20),
            ..opts()
        };

        let (ds, report) = aggregate(
            Some(existing.clone()),
            vec![failed(SourceId::SearchEn), failed(SourceId::Sspai)],
            &later,
        );
        assert_eq!(ds.unwrap(), existing);
        assert!(report.all_sources_failed);
        assert!(report.is_degraded());
    }

    #[test]
    fn test_all_sources_failed_without_history_stores_nothing() {
        let (ds, report) = aggregate(None, vec![failed(SourceId::SearchEn)], &opts());
        assert!(ds.is_none());
        assert!(report.all_sources_failed);
    }

    #[test]
    fn test_malformed_items_are_counted() {
        let batches = vec![ok(
            SourceId::Kr36,
            "AI 金融",
            vec![
                crate::models::RawItem::default(),
                raw("银行大模型", "https://36kr.com/p/1"),
            ],
        )];
        let (ds, report) = aggregate(None, batches, &opts());
        assert_eq!(ds.unwrap().total_count, 1);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.raw_items, 2);
    }

    #[test]
    fn test_fetch_date_only_moves_when_items_are_added() {
        let (first, _) = aggregate(None, sample_batches(), &opts());
        let later = AggregateOptions {
            fetch_date: day(2024, 1, 19),
            ..opts()
        };
        let (same, _) = aggregate(first.clone(), sample_batches(), &later);
        assert_eq!(same.unwrap().fetch_date, day(2024, 1, 17));

        let extra = vec![ok(SourceId::SearchEn, "AI fintech", vec![raw("E", "https://example.com/u9")])];
        let (grown, _) = aggregate(first, extra, &later);
        assert_eq!(grown.unwrap().fetch_date, day(2024, 1, 19));
    }

    #[tokio::test]
    async fn test_aggregate_week_round_trips_through_archive() {
        let mut archive = MemoryArchive::default();
        let report = aggregate_week(&mut archive, sample_batches(), &opts()).await.unwrap();
        assert_eq!(report.total_count, 3);

        let report = aggregate_week(&mut archive, sample_batches(), &opts()).await.unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.total_count, 3);

        let stored = archive.get_dataset(&week("2024-W03")).await.unwrap().unwrap();
        assert_eq!(stored.total_count, 3);
        assert_eq!(archive.list_weeks().await.unwrap(), vec![week("2024-W03")]);
    }

    #[tokio::test]
    async fn test_aggregate_week_total_failure_writes_no_week() {
        let mut archive = MemoryArchive::default();
        let report = aggregate_week(&mut archive, vec![failed(SourceId::SearchEn)], &opts())
            .await
            .unwrap();
        assert!(report.all_sources_failed);
        assert!(archive.list_weeks().await.unwrap().is_empty());
    }
}
