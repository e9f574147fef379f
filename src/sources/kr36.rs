//! 36Kr search column API.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;
use tracing::{info, instrument};

use crate::error::SourceFetchError;
use crate::models::RawItem;

const SEARCH_URL: &str = "https://36kr.com/api/search-column/mainsite";

#[instrument(level = "info", skip(client))]
pub async fn search(
    client: &reqwest::Client,
    keyword: &str,
    limit: usize,
) -> Result<Vec<RawItem>, SourceFetchError> {
    let params = [
        ("per_page", limit.to_string()),
        ("page", "1".to_string()),
        ("keyword", keyword.to_string()),
    ];
    let body = super::get_text(client, SEARCH_URL, &params).await?;
    let mut items = parse_response(&body)?;
    items.truncate(limit);
    info!(count = items.len(), "Parsed 36Kr results");
    Ok(items)
}

/// Items live at `data.items[].widget_data`. Entries without an id get no
/// URL and fall back to title identity downstream.
pub fn parse_response(body: &str) -> Result<Vec<RawItem>, SourceFetchError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| SourceFetchError::Parse(format!("36Kr JSON: {e}")))?;
    let entries = value
        .pointer("/data/items")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceFetchError::Parse("36Kr JSON: missing data.items".to_string()))?;

    Ok(entries
        .iter()
        .filter_map(|entry| entry.get("widget_data"))
        .map(|widget| {
            let id = match widget.get("id") {
                Some(Value::Number(n)) => Some(n.to_string()),
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => None,
            };
            RawItem {
                title: widget.get("title").and_then(Value::as_str).map(str::to_string),
                url: id.map(|id| format!("https://36kr.com/p/{id}")),
                publisher: Some("36氪".to_string()),
                summary: widget.get("summary").and_then(Value::as_str).map(str::to_string),
                published_at: widget.get("published_at").and_then(parse_published_at),
            }
        })
        .collect())
}

/// The API has been seen returning RFC 3339 strings, bare dates and epoch
/// milliseconds for the same field.
fn parse_published_at(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                let day = NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok()?;
                Some(day.and_hms_opt(0, 0, 0)?.and_utc())
            }),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw > 100_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}
