//! News sources and the partial-results fetch loop.
//!
//! Each configured [`SourceQuery`] is one call to [`Fetch::fetch`]. Queries
//! run one after another in plan order, and a failing query only removes its
//! own contribution: the loop records the error in the [`SourceBatch`] and
//! moves on.
//!
//! # Supported Sources
//!
//! | Source | Module | Method |
//! |--------|--------|--------|
//! | Google News (en / zh) | [`google_news`] | RSS search feed |
//! | 36Kr | [`kr36`] | JSON search API |
//! | SSPAI | [`sspai`] | JSON article list, keyword filtered |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::SourceFetchError;
use crate::models::{RawItem, SourceId};

pub mod google_news;
pub mod kr36;
pub mod sspai;

/// Browser-like agent; the Chinese outlets reject obviously scripted clients.
const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko)";

/// One entry of the query plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceQuery {
    pub source: SourceId,
    /// Search terms. Ignored by sources that only list recent articles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Overrides the global per-query item limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl SourceQuery {
    /// A query with the fetcher's default item limit.
    pub fn new(source: SourceId, query: Option<&str>) -> Self {
        Self {
            source,
            query: query.map(str::to_string),
            limit: None,
        }
    }

    /// Short label for logs and reports, e.g. `search-en "AI fintech"`.
    pub fn label(&self) -> String {
        match &self.query {
            Some(q) => format!("{} {:?}", self.source, q),
            None => self.source.to_string(),
        }
    }
}

/// Capability to turn one query into raw items.
pub trait Fetch {
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<RawItem>, SourceFetchError>;
}

/// What one query produced.
#[derive(Debug)]
pub struct SourceBatch {
    pub query: SourceQuery,
    pub outcome: Result<Vec<RawItem>, SourceFetchError>,
}

/// Run every query in plan order. Never fails as a whole.
#[instrument(level = "info", skip_all, fields(queries = plan.len()))]
pub async fn fetch_all<F: Fetch>(fetcher: &F, plan: &[SourceQuery]) -> Vec<SourceBatch> {
    let mut batches = Vec::with_capacity(plan.len());
    for query in plan {
        let outcome = fetcher.fetch(query).await;
        match &outcome {
            Ok(items) => info!(query = %query.label(), count = items.len(), "Fetched source"),
            Err(e) => warn!(query = %query.label(), error = %e, "Source failed; continuing without it"),
        }
        batches.push(SourceBatch {
            query: query.clone(),
            outcome,
        });
    }
    batches
}

/// The real network-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    default_limit: usize,
}

impl HttpFetcher {
    /// Build the shared HTTP client.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Applied to every request
    /// * `default_limit` - Items kept per query when the query sets no limit
    pub fn new(timeout: Duration, default_limit: usize) -> Result<Self, SourceFetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            default_limit,
        })
    }
}

impl Fetch for HttpFetcher {
    #[instrument(level = "info", skip_all, fields(source = %query.source))]
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<RawItem>, SourceFetchError> {
        let limit = query.limit.unwrap_or(self.default_limit);
        let terms = query.query.as_deref().unwrap_or_default();
        match query.source {
            SourceId::SearchEn => google_news::search(&self.client, terms, google_news::Edition::En, limit).await,
            SourceId::SearchZh => google_news::search(&self.client, terms, google_news::Edition::Zh, limit).await,
            SourceId::Kr36 => kr36::search(&self.client, terms, limit).await,
            SourceId::Sspai => sspai::latest(&self.client, limit).await,
        }
    }
}

/// GET `url` and return the body, turning non-2xx answers into errors.
pub(crate) async fn get_text(
    client: &reqwest::Client,
    url: &str,
    params: &[(&str, String)],
) -> Result<String, SourceFetchError> {
    let resp = client.get(url).query(params).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(SourceFetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(resp.text().await?)
}


#[cfg(test)]
mod tests {
    use super::stub::*;
    use super::*;

    #[tokio::test]
    async fn test_fetch_all_isolates_failures() {
        let en = SourceQuery::new(SourceId::SearchEn, Some("AI fintech"));
        let broken = SourceQuery::new(SourceId::Kr36, Some("AI 金融"));
        let zh = SourceQuery::new(SourceId::SearchZh, Some("人工智能 银行"));
        let fetcher = StubFetcher::default()
            .with(&en, vec![raw("A", "https://a.com/1")])
            .with(&zh, vec![raw("B", "https://b.cn/2"), raw("C", "https://b.cn/3")]);

        let batches = fetch_all(&fetcher, &[en.clone(), broken.clone(), zh.clone()]).await;

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].query, en);
        assert_eq!(batches[0].outcome.as_ref().unwrap().len(), 1);
        assert!(batches[1].outcome.is_err());
        assert_eq!(batches[2].outcome.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_query_label() {
        assert_eq!(
            SourceQuery::new(SourceId::SearchEn, Some("AI fintech")).label(),
            "search-en \"AI fintech\""
        );
        assert_eq!(SourceQuery::new(SourceId::Sspai, None).label(), "sspai");
    }
}
