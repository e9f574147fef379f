//! SSPAI (少数派) latest articles.
//!
//! The endpoint has no search, so we list the most recent articles and keep
//! the ones whose title or teaser mentions one of [`KEYWORDS`].

use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::error::SourceFetchError;
use crate::models::RawItem;

const ARTICLES_URL: &str = "https://sspai.com/api/v1/articles";
const PAGE_SIZE: usize = 20;

/// Case-insensitive topic filter.
pub const KEYWORDS: &[&str] = &["ai", "人工智能", "gpt", "金融", "fintech", "支付", "银行"];

#[derive(Debug, Deserialize)]
struct ArticleList {
    #[serde(default)]
    data: Vec<Article>,
}

#[derive(Debug, Deserialize)]
struct Article {
    id: Option<u64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    released_at: i64,
}

#[instrument(level = "info", skip(client))]
pub async fn latest(client: &reqwest::Client, limit: usize) -> Result<Vec<RawItem>, SourceFetchError> {
    let params = [
        ("offset", "0".to_string()),
        ("limit", PAGE_SIZE.to_string()),
        ("sort", "released_at".to_string()),
    ];
    let body = super::get_text(client, ARTICLES_URL, &params).await?;
    let items = parse_response(&body, limit)?;
    info!(count = items.len(), "Parsed SSPAI articles");
    Ok(items)
}

fn is_relevant(title: &str, summary: &str) -> bool {
    let haystack = format!("{title} {summary}").to_lowercase();
    KEYWORDS.iter().any(|kw| haystack.contains(kw))
}

/// Keep relevant, dated articles, at most `limit` of them.
pub fn parse_response(body: &str, limit: usize) -> Result<Vec<RawItem>, SourceFetchError> {
    let list: ArticleList =
        serde_json::from_str(body).map_err(|e| SourceFetchError::Parse(format!("SSPAI JSON: {e}")))?;

    Ok(list
        .data
        .into_iter()
        .filter(|a| is_relevant(&a.title, &a.summary))
        .filter_map(|a| {
            // undated entries are drafts or pinned promos
            let published_at = Utc.timestamp_opt(a.released_at, 0).single().filter(|_| a.released_at > 0);
            if published_at.is_none() {
                debug!(title = %a.title, "Skipping undated SSPAI article");
                return None;
            }
            Some(RawItem {
                title: Some(a.title),
                url: a.id.map(|id| format!("https://sspai.com/post/{id}")),
                publisher: Some("少数派".to_string()),
                summary: Some(a.summary).filter(|s| !s.is_empty()),
                published_at,
            })
        })
        .take(limit)
        .collect())
}
