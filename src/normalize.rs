//! Turning raw source items into [`NewsItem`]s.
//!
//! # Dedup contract
//!
//! Two items are the same story when their dedup keys are equal:
//!
//! - With a usable URL the key is `url:<canonical url>`. Canonicalization
//!   forces `https`, lowercases the host and drops a leading `www.`, drops
//!   the fragment, the default port and tracking parameters (`utm_*`,
//!   `utm`, `fbclid`, `gclid`, `oc`, ...), sorts what is left of the query and
//!   trims a trailing `/` from the path.
//! - Without one the key is `title:<source>:<hash>` where the hash is the
//!   first 16 hex digits of SHA-256 over the normalized title. The same
//!   headline from two different sources therefore does *not* collapse; we
//!   accept that false negative rather than merging unrelated stories that
//!   happen to share a short title.

use chrono::NaiveDate;
use itertools::Itertools;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use crate::error::ItemRejected;
use crate::models::{NewsItem, RawItem, SourceId};

/// Query parameters that only identify a campaign or click.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "spm", "ref", "ref_src",
    "oc",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key == "utm" || key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Canonical string form of a URL, or `None` when it is not a usable web link.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = match Url::parse(raw) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{raw}")).ok()?,
        Err(_) => return None,
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() || !host.contains('.') {
        return None;
    }

    let mut canonical = format!("https://{host}");
    if let Some(port) = parsed.port() {
        if port != 443 && port != 80 {
            canonical.push_str(&format!(":{port}"));
        }
    }
    canonical.push_str(parsed.path().trim_end_matches('/'));

    let query = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .sorted()
        .collect::<Vec<_>>();
    if !query.is_empty() {
        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &query {
            ser.append_pair(k, v);
        }
        canonical.push('?');
        canonical.push_str(&ser.finish());
    }
    Some(canonical)
}

/// Lowercase, punctuation to spaces, whitespace collapsed. Unicode-aware so
/// CJK headlines keep their characters.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .join(" ")
}

/// Dedup key for an already-canonical URL (possibly empty) and title.
pub fn dedup_key(canonical_url: &str, title: &str, source: SourceId) -> String {
    if !canonical_url.is_empty() {
        return format!("url:{canonical_url}");
    }
    let digest = Sha256::digest(normalize_title(title).as_bytes());
    let hash = hex::encode(digest);
    format!("title:{}:{}", source, &hash[..16])
}

fn clean_text(s: Option<&str>) -> Option<String> {
    let s = s?.split_whitespace().join(" ");
    (!s.is_empty()).then_some(s)
}

/// Options shared by every item of one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    /// Items published before this date are rejected.
    pub not_before: Option<NaiveDate>,
}

/// Normalize a single raw item.
pub fn normalize(
    raw: &RawItem,
    source: SourceId,
    opts: &NormalizeOptions,
) -> Result<NewsItem, ItemRejected> {
    let url = raw.url.as_deref().and_then(canonicalize_url);
    let title = clean_text(raw.title.as_deref())
        .filter(|t| !normalize_title(t).is_empty());

    let title = match (title, &url) {
        (Some(t), _) => t,
        (None, Some(u)) => u.clone(),
        (None, None) => return Err(ItemRejected::MissingTitleAndUrl),
    };

    let published_at = raw.published_at.map(|dt| dt.date_naive());
    if let (Some(published), Some(not_before)) = (published_at, opts.not_before) {
        if published < not_before {
            return Err(ItemRejected::Stale {
                published,
                not_before,
            });
        }
    }

    Ok(NewsItem {
        title,
        url: url.unwrap_or_default(),
        source,
        locale: source.locale(),
        published_at,
        publisher: clean_text(raw.publisher.as_deref()),
        summary: clean_text(raw.summary.as_deref()),
    })
}

/// Counters for one normalized batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub accepted: usize,
    pub malformed: usize,
    pub stale: usize,
}

/// Normalize a whole batch, skipping and counting rejected items.
pub fn normalize_batch(
    raws: &[RawItem],
    source: SourceId,
    opts: &NormalizeOptions,
) -> (Vec<NewsItem>, NormalizeStats) {
    let mut stats = NormalizeStats::default();
    let mut items = Vec::with_capacity(raws.len());
    for (index, raw) in raws.iter().enumerate() {
        match normalize(raw, source, opts) {
            Ok(item) => {
                stats.accepted += 1;
                items.push(item);
            }
            Err(e @ ItemRejected::Stale { .. }) => {
                debug!(%source, index, reason = %e, "Dropping item outside lookback window");
                stats.stale += 1;
            }
            Err(e) => {
                warn!(%source, index, reason = %e, "Skipping malformed item");
                stats.malformed += 1;
            }
        }
    }
    (items, stats)
}
