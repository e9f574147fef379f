//! Google News RSS search.
//!
//! Queries `https://news.google.com/rss/search` in either the US-English or
//! the Simplified-Chinese edition. Titles come back as
//! `Headline - Publisher`; the publisher suffix is removed from the title
//! and taken from the `<source>` element instead.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::error::SourceFetchError;
use crate::models::RawItem;

const SEARCH_URL: &str = "https://news.google.com/rss/search";

static PUBLISHER_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+-\s+[^-]+$").unwrap());

/// Regional edition of the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edition {
    En,
    Zh,
}

impl Edition {
    fn params(&self) -> [(&'static str, &'static str); 3] {
        match self {
            Edition::En => [("hl", "en-US"), ("gl", "US"), ("ceid", "US:en")],
            Edition::Zh => [("hl", "zh-CN"), ("gl", "CN"), ("ceid", "CN:zh-Hans")],
        }
    }
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    source: Option<FeedSource>,
}

#[derive(Debug, Deserialize)]
struct FeedSource {
    #[serde(rename = "$text")]
    name: Option<String>,
}

/// Search one query and return at most `limit` items.
#[instrument(level = "info", skip(client))]
pub async fn search(
    client: &reqwest::Client,
    query: &str,
    edition: Edition,
    limit: usize,
) -> Result<Vec<RawItem>, SourceFetchError> {
    let mut params = vec![("q", query.to_string())];
    params.extend(edition.params().iter().map(|(k, v)| (*k, v.to_string())));
    let body = super::get_text(client, SEARCH_URL, &params).await?;

    let mut items = parse_feed(&body)?;
    items.truncate(limit);
    info!(count = items.len(), "Parsed Google News feed");
    Ok(items)
}

/// Parse an RSS document into raw items, in feed order.
pub fn parse_feed(xml: &str) -> Result<Vec<RawItem>, SourceFetchError> {
    let rss: Rss = quick_xml::de::from_str(xml)
        .map_err(|e| SourceFetchError::Parse(format!("Google News RSS: {e}")))?;

    Ok(rss
        .channel
        .items
        .into_iter()
        .map(|item| {
            let published_at = item.pub_date.as_deref().and_then(parse_pub_date);
            if item.pub_date.is_some() && published_at.is_none() {
                debug!(pub_date = ?item.pub_date, "Unparseable pubDate");
            }
            RawItem {
                title: item.title.as_deref().map(strip_publisher_suffix),
                url: item.link,
                publisher: item.source.and_then(|s| s.name),
                summary: item.description.as_deref().map(html_to_text),
                published_at,
            }
        })
        .collect())
}

fn parse_pub_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `"Bank adopts AI - Reuters"` -> `"Bank adopts AI"`.
pub fn strip_publisher_suffix(title: &str) -> String {
    PUBLISHER_SUFFIX.replace(title.trim(), "").into_owned()
}

/// Visible text of an HTML fragment.
pub(crate) fn html_to_text(fragment: &str) -> String {
    Html::parse_fragment(fragment)
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
