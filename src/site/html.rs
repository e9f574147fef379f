//! HTML rendering of week pages and the archive index.
//!
//! Pages come from the askama templates under `templates/`, which escape
//! every interpolated value. The only pre-rendered fragment is the digest
//! body, produced by [`markdown_to_html`].

use askama::Template;
use chrono::NaiveDate;
use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, html};

use super::{Depth, Render, WeekEntry, week_page_path};
use crate::config::SiteConfig;
use crate::error::RenderError;
use crate::models::NewsItem;
use crate::week::WeekKey;

const STYLESHEET: &str = include_str!("style.css");

/// URL schemes a digest link may point to. Relative links are always kept.
const SAFE_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

#[derive(Debug, Clone)]
pub struct HtmlRenderer {
    title: String,
    description: String,
}

impl HtmlRenderer {
    pub fn new(site: &SiteConfig) -> Self {
        Self {
            title: site.title.clone(),
            description: site.description.clone(),
        }
    }
}

struct ItemView<'a> {
    tag: &'static str,
    title: &'a str,
    url: &'a str,
    publisher: &'a str,
    date: Option<NaiveDate>,
    teaser: Option<&'a str>,
}

impl<'a> From<&'a NewsItem> for ItemView<'a> {
    fn from(item: &'a NewsItem) -> Self {
        Self {
            tag: item.locale.tag(),
            title: &item.title,
            url: &item.url,
            publisher: item.publisher.as_deref().unwrap_or(item.source.as_str()),
            date: item.published_at,
            teaser: item.summary.as_deref(),
        }
    }
}

struct ItemSection<'a> {
    heading: &'static str,
    items: Vec<ItemView<'a>>,
}

impl<'a> ItemSection<'a> {
    fn new(heading: &'static str, items: &'a [NewsItem]) -> Self {
        Self {
            heading,
            items: items.iter().map(ItemView::from).collect(),
        }
    }
}

struct DigestView<'a> {
    html: String,
    generated_at: String,
    model: &'a str,
    news_count: usize,
    stale: bool,
}

#[derive(Template)]
#[template(path = "week.html")]
struct WeekTemplate<'a> {
    root: &'static str,
    heading: String,
    site_title: &'a str,
    description: &'a str,
    total_count: usize,
    fetch_date: NaiveDate,
    archived_latest: Option<WeekKey>,
    digest: Option<DigestView<'a>>,
    sections: Vec<ItemSection<'a>>,
}

struct ArchiveRow {
    href: String,
    week: WeekKey,
    monday: NaiveDate,
    sunday: NaiveDate,
    total_count: usize,
    digest: &'static str,
}

#[derive(Template)]
#[template(path = "archives.html")]
struct ArchivesTemplate<'a> {
    root: &'static str,
    heading: &'static str,
    site_title: &'a str,
    description: &'a str,
    rows: Vec<ArchiveRow>,
}

/// Markdown to HTML for LLM-written digests.
///
/// Raw HTML in the source is shown as text, and link or image targets with a
/// scheme other than `http`, `https` or `mailto` are emptied.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: safe_destination(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: safe_destination(dest_url),
            title,
            id,
        }),
        other => other,
    });
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

/// Keep relative targets and allowed schemes, blank out the rest.
///
/// Browsers ignore whitespace and control characters inside a scheme, so
/// those are dropped before looking at it.
fn safe_destination(dest: CowStr<'_>) -> CowStr<'_> {
    let cleaned: String = dest
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_control())
        .collect();
    match cleaned.find([':', '/', '?', '#']) {
        Some(end) if cleaned[end..].starts_with(':') => {
            let scheme = cleaned[..end].to_ascii_lowercase();
            if SAFE_SCHEMES.contains(&scheme.as_str()) {
                dest
            } else {
                CowStr::Borrowed("")
            }
        }
        _ => dest,
    }
}

impl Render for HtmlRenderer {
    fn week_page(&self, entry: &WeekEntry, current: WeekKey, depth: Depth) -> Result<String, RenderError> {
        let dataset = &entry.dataset;
        let week = dataset.week;
        let digest = entry.summary.as_ref().map(|summary| DigestView {
            html: markdown_to_html(&summary.summary),
            generated_at: summary.generated_at.to_rfc3339(),
            model: &summary.model,
            news_count: summary.news_count,
            stale: entry.summary_is_stale(),
        });

        let page = WeekTemplate {
            root: depth.prefix(),
            heading: format!("{week}: {} to {}", week.monday(), week.sunday()),
            site_title: &self.title,
            description: &self.description,
            total_count: dataset.total_count,
            fetch_date: dataset.fetch_date,
            archived_latest: (week != current).then_some(current),
            digest,
            sections: vec![
                ItemSection::new("English news", &dataset.en_news),
                ItemSection::new("Chinese news", &dataset.zh_news),
            ],
        };
        Ok(page.render()?)
    }

    fn archive_index(&self, newest_first: &[&WeekEntry], current: WeekKey) -> Result<String, RenderError> {
        let rows = newest_first
            .iter()
            .map(|entry| {
                let week = entry.week();
                ArchiveRow {
                    href: if week == current {
                        "index.html".to_string()
                    } else {
                        week_page_path(&week)
                    },
                    week,
                    monday: week.monday(),
                    sunday: week.sunday(),
                    total_count: entry.dataset.total_count,
                    digest: match &entry.summary {
                        None => "none",
                        Some(_) if entry.summary_is_stale() => "outdated",
                        Some(_) => "yes",
                    },
                }
            })
            .collect();

        let page = ArchivesTemplate {
            root: Depth::Root.prefix(),
            heading: "Archives",
            site_title: &self.title,
            description: &self.description,
            rows,
        };
        Ok(page.render()?)
    }

    fn stylesheet(&self) -> String {
        STYLESHEET.to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::models::fixtures::{dataset_with, item, week};
    use crate::models::{SourceId, WeeklySummary};

    fn renderer() -> HtmlRenderer {
        HtmlRenderer::new(&SiteConfig::default())
    }

    #[test]
    fn test_markdown_to_html_escapes_raw_html() {
        let html = markdown_to_html("## Key stories\n\n<script>alert(1)</script>\n\n- **Bank** adopts AI");
        assert!(html.contains("<h2>Key stories</h2>"));
        assert!(html.contains("<strong>Bank</strong>"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_markdown_to_html_blanks_script_links() {
        let html = markdown_to_html(
            "[read more](javascript:alert(document.cookie)) ![chart](JaVaScRiPt:alert(1)) \
             [data](data:text/html;base64,PHNjcmlwdD4=) <vbscript:msgbox(1)>",
        );
        let lower = html.to_lowercase();
        assert!(!lower.contains("javascript:"));
        assert!(!lower.contains("data:text"));
        assert!(!lower.contains("href=\"vbscript"));
        assert!(html.contains(r#"<a href="">read more</a>"#));
    }

    #[test]
    fn test_markdown_to_html_keeps_web_and_relative_links() {
        let html = markdown_to_html(
            "[Reuters](https://www.reuters.com/a?x=1) [old](archives/2024-W02.html) \
             [desk](mailto:desk@example.com) [top](#key-stories)",
        );
        assert!(html.contains(r#"href="https://www.reuters.com/a?x=1""#));
        assert!(html.contains(r#"href="archives/2024-W02.html""#));
        assert!(html.contains(r#"href="mailto:desk@example.com""#));
        assert!(html.contains(r##"href="#key-stories""##));
    }

    #[test]
    fn test_safe_destination_ignores_hidden_whitespace() {
        assert_eq!(&*safe_destination(CowStr::Borrowed("java\tscript:alert(1)")), "");
        assert_eq!(&*safe_destination(CowStr::Borrowed(" javascript:alert(1)")), "");
        assert_eq!(&*safe_destination(CowStr::Borrowed("HTTPS://example.com")), "HTTPS://example.com");
        assert_eq!(&*safe_destination(CowStr::Borrowed("week/2024:W03")), "week/2024:W03");
    }

    #[test]
    fn test_week_page_without_summary_lists_items() {
        let mut ds = dataset_with("2024-W03", 1);
        let mut zh = item("银行 <大模型> & 风控", "https://36kr.com/p/1?a=1&b=2", SourceId::Kr36);
        zh.published_at = chrono::NaiveDate::from_ymd_opt(2024, 1, 16);
        ds.merge_items([zh]);
        let entry = WeekEntry {
            dataset: ds,
            summary: None,
        };

        let page = renderer().week_page(&entry, week("2024-W03"), Depth::Root).unwrap();
        assert!(page.contains("No digest has been generated"));
        assert!(page.contains("银行 &lt;大模型&gt; &amp; 风控"));
        assert!(page.contains(r#"href="https://36kr.com/p/1?a=1&amp;b=2""#));
        assert!(page.contains("<span class=\"meta\">36kr"));
        assert!(page.contains("· 2024-01-16"));
        assert!(page.contains(r#"href="static/style.css""#));
        assert!(!page.contains("Archived week"));
    }

    #[test]
    fn test_historical_page_links_up_and_flags_stale_summary() {
        let ds = dataset_with("2024-W02", 5);
        let entry = WeekEntry {
            summary: Some(WeeklySummary {
                week: ds.week,
                generated_at: DateTime::parse_from_rfc3339("2024-01-12T08:00:00+00:00").unwrap(),
                summary: "## This week at a glance\n\nQuiet.".to_string(),
                model: "gpt-4o-mini".to_string(),
                news_count: 3,
            }),
            dataset: ds,
        };

        let page = renderer().week_page(&entry, week("2024-W03"), Depth::Archives).unwrap();
        assert!(page.contains(r#"href="../static/style.css""#));
        assert!(page.contains("Latest issue: 2024-W03"));
        assert!(page.contains("covers 3 of 5 items"));
        assert!(page.contains(r#"<a href="../index.html">Latest issue"#));
        assert!(page.contains("<h2>This week at a glance</h2>"));
    }

    #[test]
    fn test_item_without_url_is_plain_text() {
        let mut ds = dataset_with("2024-W03", 0);
        ds.merge_items([item("无链接新闻", "", SourceId::Sspai)]);
        let entry = WeekEntry {
            dataset: ds,
            summary: None,
        };
        let page = renderer().week_page(&entry, week("2024-W03"), Depth::Root).unwrap();
        assert!(page.contains("<span class=\"title\">无链接新闻</span>"));
    }

    #[test]
    fn test_site_title_is_escaped() {
        let site = SiteConfig {
            title: "AI & <Fintech> Weekly".to_string(),
            ..SiteConfig::default()
        };
        let entry = WeekEntry {
            dataset: dataset_with("2024-W03", 1),
            summary: None,
        };
        let page = HtmlRenderer::new(&site)
            .archive_index(&[&entry], week("2024-W03"))
            .unwrap();
        assert!(page.contains("AI &amp; &lt;Fintech&gt; Weekly"));
        assert!(page.contains(r#"<a href="index.html">2024-W03</a>"#));
        assert!(page.contains("<td>none</td>"));
    }
}
