//! Data models for fetched news and the weekly archive records.
//!
//! - [`RawItem`]: whatever a source handed back, before normalization
//! - [`NewsItem`]: a normalized item with a derivable dedup key
//! - [`WeeklyDataset`]: the deduplicated items of one ISO week
//! - [`WeeklySummary`]: the generated digest text for one ISO week
//!
//! Field names of the persisted records match the JSON files the site and
//! external viewers read (`news_<week>.json`, `summary_<week>.json`).

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize;
use crate::week::WeekKey;

/// Default publication window, in days, applied when fetching.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;

/// Language bucket of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    En,
    Zh,
}

impl Locale {
    /// Upper-case tag used in prompts and page badges.
    pub fn tag(&self) -> &'static str {
        match self {
            Locale::En => "EN",
            Locale::Zh => "ZH",
        }
    }
}

/// Where an item came from. Declaration order is not significant; the
/// configured query plan decides which source wins a dedup tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceId {
    #[serde(rename = "search-en")]
    SearchEn,
    #[serde(rename = "search-zh")]
    SearchZh,
    #[serde(rename = "36kr")]
    Kr36,
    #[serde(rename = "sspai")]
    Sspai,
}

impl SourceId {
    /// Language of the items this source returns. Only the English search
    /// edition is English.
    pub fn locale(&self) -> Locale {
        match self {
            SourceId::SearchEn => Locale::En,
            SourceId::SearchZh | SourceId::Kr36 | SourceId::Sspai => Locale::Zh,
        }
    }

    /// Stable identifier, as stored in JSON records.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::SearchEn => "search-en",
            SourceId::SearchZh => "search-zh",
            SourceId::Kr36 => "36kr",
            SourceId::Sspai => "sspai",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unvalidated item as returned by a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    pub title: Option<String>,
    pub url: Option<String>,
    /// Outlet name when the source is an aggregator (e.g. Google News).
    pub publisher: Option<String>,
    /// Short teaser text provided by the source.
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// A normalized news item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    /// Canonical URL, or empty when the source gave none.
    #[serde(default)]
    pub url: String,
    pub source: SourceId,
    pub locale: Locale,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl NewsItem {
    /// Identity used to collapse duplicates. See [`normalize::dedup_key`].
    pub fn dedup_key(&self) -> String {
        normalize::dedup_key(&self.url, &self.title, self.source)
    }
}

/// Result of merging items into a dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub duplicates: usize,
}

/// All deduplicated items collected for one ISO week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyDataset {
    pub fetch_date: NaiveDate,
    pub week: WeekKey,
    pub total_count: usize,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default)]
    pub en_news: Vec<NewsItem>,
    #[serde(default)]
    pub zh_news: Vec<NewsItem>,
    #[serde(default)]
    pub all_news: Vec<NewsItem>,
}

fn default_lookback_days() -> u32 {
    DEFAULT_LOOKBACK_DAYS
}

impl WeeklyDataset {
    /// A week with no items yet.
    pub fn empty(week: WeekKey, fetch_date: NaiveDate, lookback_days: u32) -> Self {
        Self {
            fetch_date,
            week,
            total_count: 0,
            lookback_days,
            en_news: Vec::new(),
            zh_news: Vec::new(),
            all_news: Vec::new(),
        }
    }

    pub fn dedup_keys(&self) -> HashSet<String> {
        self.all_news.iter().map(NewsItem::dedup_key).collect()
    }

    /// Append every item whose dedup key is not present yet, in iteration
    /// order. Earlier items win; stored items are never removed or reordered.
    pub fn merge_items<I>(&mut self, items: I) -> MergeStats
    where
        I: IntoIterator<Item = NewsItem>,
    {
        let mut seen = self.dedup_keys();
        let mut stats = MergeStats::default();
        for item in items {
            if !seen.insert(item.dedup_key()) {
                stats.duplicates += 1;
                continue;
            }
            match item.locale {
                Locale::En => self.en_news.push(item.clone()),
                Locale::Zh => self.zh_news.push(item.clone()),
            }
            self.all_news.push(item);
            stats.added += 1;
        }
        self.total_count = self.all_news.len();
        stats
    }

    /// Union `newer` into `self`. `fetch_date` only advances when something
    /// was actually added, so re-merging the same content is a no-op.
    pub fn merge(&mut self, newer: WeeklyDataset) -> MergeStats {
        let WeeklyDataset {
            fetch_date,
            lookback_days,
            en_news,
            zh_news,
            all_news,
            ..
        } = newer;
        let stats = self.merge_items(all_news.into_iter().chain(en_news).chain(zh_news));
        if stats.added > 0 {
            self.fetch_date = self.fetch_date.max(fetch_date);
            self.lookback_days = lookback_days;
        }
        stats
    }

    /// Rebuild the locale lists and count from the stored items, dropping
    /// duplicate keys. Records loaded from disk go through this so hand
    /// edits cannot break the dataset invariants.
    pub fn reindexed(self) -> Self {
        let mut fresh = WeeklyDataset::empty(self.week, self.fetch_date, self.lookback_days);
        fresh.merge_items(
            self.all_news
                .into_iter()
                .chain(self.en_news)
                .chain(self.zh_news),
        );
        fresh
    }

    /// `total_count` matches, keys are unique, locale lists are covered.
    pub fn invariants_hold(&self) -> bool {
        let keys = self.dedup_keys();
        self.total_count == self.all_news.len()
            && keys.len() == self.all_news.len()
            && self
                .en_news
                .iter()
                .chain(&self.zh_news)
                .all(|item| keys.contains(&item.dedup_key()))
    }
}

/// Generated digest for one week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySummary {
    pub week: WeekKey,
    pub generated_at: DateTime<FixedOffset>,
    pub summary: String,
    pub model: String,
    pub news_count: usize,
}

impl WeeklySummary {
    /// A summary is only current while it covers exactly the stored items.
    pub fn is_current_for(&self, dataset: &WeeklyDataset) -> bool {
        self.week == dataset.week && self.news_count == dataset.total_count
    }
}
