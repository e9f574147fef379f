//! Static site projection of the archive.
//!
//! [`project`] is a pure function from an [`ArchiveSnapshot`] to a page set;
//! [`publish`] writes that set under the site directory. Rendering finishes
//! before the first write, and every file is staged before any is swapped in,
//! so a failure at either step leaves the previous site untouched.
//!
//! # Output Structure
//!
//! ```text
//! site_dir/
//! ├── index.html            # most recent week
//! ├── archives.html         # every week, newest first
//! ├── archives/
//! │   └── 2024-W02.html     # one page per earlier week
//! ├── static/style.css
//! └── data/weeks.json
//! ```

pub mod html;

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::archive::ArchiveStore;
use crate::error::{RenderError, StorageError};
use crate::models::{WeeklyDataset, WeeklySummary};
use crate::utils::{commit_staged, discard_staged, stage_file};
use crate::week::WeekKey;

pub use html::HtmlRenderer;

/// One stored week as seen by the site.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekEntry {
    pub dataset: WeeklyDataset,
    pub summary: Option<WeeklySummary>,
}

impl WeekEntry {
    /// The ISO week this entry belongs to.
    pub fn week(&self) -> WeekKey {
        self.dataset.week
    }

    /// Stored summary that no longer covers every item.
    pub fn summary_is_stale(&self) -> bool {
        self.summary
            .as_ref()
            .is_some_and(|s| !s.is_current_for(&self.dataset))
    }
}

/// Every stored week, ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveSnapshot {
    pub weeks: Vec<WeekEntry>,
}

impl ArchiveSnapshot {
    /// The most recent stored week, rendered as the site's front page.
    pub fn current(&self) -> Option<&WeekEntry> {
        self.weeks.last()
    }
}

/// Read every stored week and its summary, if any.
///
/// A week that is listed but whose dataset cannot be found any more is
/// skipped with a warning.
#[instrument(level = "info", skip_all)]
pub async fn load_snapshot<A: ArchiveStore>(archive: &A) -> Result<ArchiveSnapshot, StorageError> {
    let mut weeks = Vec::new();
    for week in archive.list_weeks().await? {
        let Some(dataset) = archive.get_dataset(&week).await? else {
            warn!(%week, "Week listed but dataset vanished; skipping");
            continue;
        };
        let summary = archive.get_summary(&week).await?;
        weeks.push(WeekEntry { dataset, summary });
    }
    weeks.sort_by_key(WeekEntry::week);
    info!(weeks = weeks.len(), "Loaded archive snapshot");
    Ok(ArchiveSnapshot { weeks })
}

/// Role of a page in the site. Also decides the order pages are swapped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Current,
    Historical,
    Index,
    Asset,
}

/// A rendered file, addressed by a `/`-separated path relative to the site
/// root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub path: String,
    pub kind: PageKind,
    pub body: String,
}

/// Link prefix from a page back to the site root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Root,
    Archives,
}

impl Depth {
    /// `""` for pages at the root, `"../"` for pages under `archives/`.
    pub fn prefix(&self) -> &'static str {
        match self {
            Depth::Root => "",
            Depth::Archives => "../",
        }
    }
}

/// Turns snapshot entries into page bodies.
pub trait Render {
    /// A week's page. `current` is the most recent week, used for the
    /// navigation links.
    fn week_page(&self, entry: &WeekEntry, current: WeekKey, depth: Depth) -> Result<String, RenderError>;

    /// Listing of all weeks, newest first.
    fn archive_index(&self, newest_first: &[&WeekEntry], current: WeekKey) -> Result<String, RenderError>;

    fn stylesheet(&self) -> String;
}

#[derive(Debug, Serialize)]
struct WeekIndexRecord {
    week: WeekKey,
    fetch_date: NaiveDate,
    total_count: usize,
    has_summary: bool,
    summary_is_current: bool,
}

/// Site-relative path of an archived week's page.
pub fn week_page_path(week: &WeekKey) -> String {
    format!("archives/{week}.html")
}

/// Render the whole site in memory.
///
/// # Arguments
///
/// * `snapshot` - Every stored week, ascending
/// * `renderer` - Produces the page bodies
///
/// # Returns
///
/// The front page for the most recent week, one page per earlier week, the
/// archive index, the stylesheet and `data/weeks.json`, in that order. An
/// empty archive yields no pages. The same snapshot always yields the same
/// pages.
pub fn project<R: Render>(snapshot: &ArchiveSnapshot, renderer: &R) -> Result<Vec<Page>, RenderError> {
    let Some(current) = snapshot.current() else {
        return Ok(Vec::new());
    };
    let current_week = current.week();

    let mut pages = vec![Page {
        path: "index.html".to_string(),
        kind: PageKind::Current,
        body: renderer.week_page(current, current_week, Depth::Root)?,
    }];

    for entry in snapshot.weeks.iter().filter(|e| e.week() != current_week) {
        pages.push(Page {
            path: week_page_path(&entry.week()),
            kind: PageKind::Historical,
            body: renderer.week_page(entry, current_week, Depth::Archives)?,
        });
    }

    let newest_first: Vec<&WeekEntry> = snapshot.weeks.iter().rev().collect();
    pages.push(Page {
        path: "archives.html".to_string(),
        kind: PageKind::Index,
        body: renderer.archive_index(&newest_first, current_week)?,
    });

    pages.push(Page {
        path: "static/style.css".to_string(),
        kind: PageKind::Asset,
        body: renderer.stylesheet(),
    });

    let records: Vec<WeekIndexRecord> = newest_first
        .iter()
        .map(|e| WeekIndexRecord {
            week: e.week(),
            fetch_date: e.dataset.fetch_date,
            total_count: e.dataset.total_count,
            has_summary: e.summary.is_some(),
            summary_is_current: e.summary.is_some() && !e.summary_is_stale(),
        })
        .collect();
    let mut json = serde_json::to_string_pretty(&records)?;
    json.push('\n');
    pages.push(Page {
        path: "data/weeks.json".to_string(),
        kind: PageKind::Asset,
        body: json,
    });

    Ok(pages)
}

fn page_file(site_dir: &Path, page: &Page) -> PathBuf {
    page.path
        .split('/')
        .fold(site_dir.to_path_buf(), |dir, part| dir.join(part))
}

/// Pages that others link to are swapped in after the pages they link to,
/// so the front page goes last.
fn swap_rank(kind: PageKind) -> u8 {
    match kind {
        PageKind::Asset => 0,
        PageKind::Historical => 1,
        PageKind::Index => 2,
        PageKind::Current => 3,
    }
}

/// Write every page under `site_dir`.
///
/// All pages are staged as hidden temp files first. If any of them cannot be
/// staged, the staged files are removed and the published site is left as it
/// was. Only then are the files renamed into place, with `index.html` last.
#[instrument(level = "info", skip_all, fields(site_dir = %site_dir.display(), pages = pages.len()))]
pub async fn publish(pages: &[Page], site_dir: &Path) -> Result<(), StorageError> {
    let mut ordered: Vec<&Page> = pages.iter().collect();
    ordered.sort_by_key(|page| swap_rank(page.kind));

    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(ordered.len());
    for page in ordered {
        let target = page_file(site_dir, page);
        match stage_file(&target, page.body.as_bytes()).await {
            Ok(tmp) => staged.push((tmp, target)),
            Err(e) => {
                discard_staged(staged.iter().map(|(tmp, _)| tmp.as_path())).await;
                warn!(page = %page.path, error = %e, "Could not stage page; previous site left in place");
                return Err(e);
            }
        }
    }

    for (i, (tmp, target)) in staged.iter().enumerate() {
        if let Err(e) = commit_staged(tmp, target).await {
            discard_staged(staged[i + 1..].iter().map(|(tmp, _)| tmp.as_path())).await;
            return Err(e);
        }
    }
    info!("Site published");
    Ok(())
}

/// Load, render and publish in one go. Returns the number of files written.
pub async fn build_site<A, R>(archive: &A, renderer: &R, site_dir: &Path) -> Result<usize, StorageError>
where
    A: ArchiveStore,
    R: Render,
{
    let snapshot = load_snapshot(archive).await?;
    let pages = project(&snapshot, renderer)?;
    if pages.is_empty() {
        warn!("Archive is empty; no pages rendered");
        return Ok(0);
    }
    publish(&pages, site_dir).await?;
    Ok(pages.len())
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::archive::MemoryArchive;
    use crate::config::SiteConfig;
    use crate::models::fixtures::dataset_with;

    fn summary(ds: &WeeklyDataset, news_count: usize) -> WeeklySummary {
        WeeklySummary {
            week: ds.week,
            generated_at: DateTime::parse_from_rfc3339("2024-01-21T10:00:00+08:00").unwrap(),
            summary: format!("## This week at a glance\n\nDigest for {}.", ds.week),
            model: "gpt-4o-mini".to_string(),
            news_count,
        }
    }

    fn snapshot() -> ArchiveSnapshot {
        let w2 = dataset_with("2024-W02", 3);
        let w3 = dataset_with("2024-W03", 4);
        let w4 = dataset_with("2024-W04", 2);
        ArchiveSnapshot {
            weeks: vec![
                WeekEntry {
                    summary: Some(summary(&w2, 3)),
                    dataset: w2,
                },
                WeekEntry {
                    summary: Some(summary(&w3, 2)),
                    dataset: w3,
                },
                WeekEntry {
                    dataset: w4,
                    summary: None,
                },
            ],
        }
    }

    fn renderer() -> HtmlRenderer {
        HtmlRenderer::new(&SiteConfig::default())
    }

    fn paths(pages: &[Page]) -> Vec<&str> {
        pages.iter().map(|p| p.path.as_str()).collect()
    }

    #[test]
    fn test_project_page_set() {
        let pages = project(&snapshot(), &renderer()).unwrap();
        assert_eq!(
            paths(&pages),
            vec![
                "index.html",
                "archives/2024-W02.html",
                "archives/2024-W03.html",
                "archives.html",
                "static/style.css",
                "data/weeks.json",
            ]
        );
        assert_eq!(pages[0].kind, PageKind::Current);
        assert!(pages[0].body.contains("2024-W04"));
        assert_eq!(pages[1].kind, PageKind::Historical);
    }

    #[test]
    fn test_project_is_deterministic() {
        let a = project(&snapshot(), &renderer()).unwrap();
        let b = project(&snapshot(), &renderer()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_index_lists_newest_first() {
        let pages = project(&snapshot(), &renderer()).unwrap();
        let index = &pages.iter().find(|p| p.path == "archives.html").unwrap().body;
        let w4 = index.find("2024-W04").unwrap();
        let w3 = index.find("2024-W03").unwrap();
        let w2 = index.find("2024-W02").unwrap();
        assert!(w4 < w3 && w3 < w2);
        assert!(index.contains(r#"href="archives/2024-W02.html""#));
        assert!(index.contains(r#"href="index.html""#));
    }

    #[test]
    fn test_weeks_json() {
        let pages = project(&snapshot(), &renderer()).unwrap();
        let json = &pages.last().unwrap().body;
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value[0]["week"], "2024-W04");
        assert_eq!(value[0]["has_summary"], false);
        assert_eq!(value[1]["summary_is_current"], false);
        assert_eq!(value[2]["summary_is_current"], true);
        assert_eq!(value[2]["total_count"], 3);
    }

    #[test]
    fn test_single_week_has_no_historical_pages() {
        let snap = ArchiveSnapshot {
            weeks: vec![WeekEntry {
                dataset: dataset_with("2024-W10", 1),
                summary: None,
            }],
        };
        let pages = project(&snap, &renderer()).unwrap();
        assert!(pages.iter().all(|p| p.kind != PageKind::Historical));
    }

    #[test]
    fn test_empty_archive_projects_nothing() {
        assert!(project(&ArchiveSnapshot::default(), &renderer()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_build_site_writes_files() {
        let mut archive = MemoryArchive::default();
        archive.put_dataset(dataset_with("2024-W02", 2)).await.unwrap();
        archive.put_dataset(dataset_with("2024-W03", 1)).await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let written = build_site(&archive, &renderer(), dir.path()).await.unwrap();
        assert_eq!(written, 5);
        assert!(dir.path().join("index.html").is_file());
        assert!(dir.path().join("archives").join("2024-W02.html").is_file());
        assert!(dir.path().join("static").join("style.css").is_file());

        let first = std::fs::read(dir.path().join("index.html")).unwrap();
        build_site(&archive, &renderer(), dir.path()).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("index.html")).unwrap(), first);
    }

    #[tokio::test]
    async fn test_build_site_on_empty_archive_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let written = build_site(&MemoryArchive::default(), &renderer(), dir.path()).await.unwrap();
        assert_eq!(written, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    fn leftover_temp_files(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir).unwrap().filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                found.extend(leftover_temp_files(&path));
            } else if path.to_string_lossy().ends_with(".tmp") {
                found.push(path);
            }
        }
        found
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_previous_site() {
        let mut archive = MemoryArchive::default();
        archive.put_dataset(dataset_with("2024-W03", 2)).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        build_site(&archive, &renderer(), dir.path()).await.unwrap();

        let index_before = std::fs::read(dir.path().join("index.html")).unwrap();
        let weeks_before = std::fs::read(dir.path().join("data").join("weeks.json")).unwrap();

        // a page that can no longer be replaced
        std::fs::remove_file(dir.path().join("archives.html")).unwrap();
        std::fs::create_dir(dir.path().join("archives.html")).unwrap();
        archive.put_dataset(dataset_with("2024-W04", 1)).await.unwrap();

        let err = build_site(&archive, &renderer(), dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("archives.html"));

        assert_eq!(std::fs::read(dir.path().join("index.html")).unwrap(), index_before);
        assert_eq!(std::fs::read(dir.path().join("data").join("weeks.json")).unwrap(), weeks_before);
        assert!(!dir.path().join("archives").join("2024-W03.html").exists());
        assert!(leftover_temp_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_publish_swaps_front_page_last() {
        let pages = project(&snapshot(), &renderer()).unwrap();
        let mut ordered: Vec<&Page> = pages.iter().collect();
        ordered.sort_by_key(|page| swap_rank(page.kind));
        assert_eq!(ordered.last().unwrap().path, "index.html");
        assert_eq!(ordered.first().unwrap().kind, PageKind::Asset);

        let dir = tempfile::tempdir().unwrap();
        publish(&pages, dir.path()).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("index.html")).unwrap(), pages[0].body);
        assert!(leftover_temp_files(dir.path()).is_empty());
    }
}
