// src/ingest/fetcher.rs
//! Feed fetching and parsing for one source: bounded retries with local
//! backoff state, then a tolerant RSS/Atom parse.

use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::domain::Source;
use crate::error::FetchError;
use crate::ingest::normalize_text;
use crate::ingest::types::{FeedItem, FeedPage};

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = "wirebrief/0.3 (+https://github.com/wirebrief/wirebrief)";
const ACCEPT: &str = "application/rss+xml, application/xml, text/xml, */*";
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(2_000);
const BACKOFF_FACTOR: f64 = 1.5;
pub const MAX_ARTICLES_PER_FEED: usize = 50;

pub struct FeedFetcher {
    http: reqwest::Client,
}

impl Default for FeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedFetcher {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self { http }
    }

    /// Fetch and parse one source. Transport failures and 5xx are retried
    /// up to three times with a 2 s delay growing by 1.5x; the backoff
    /// schedule is local to this invocation so concurrent fetches never
    /// share retry state. 4xx, invalid URLs and parse failures are
    /// terminal immediately.
    pub async fn fetch(&self, source: &Source) -> Result<FeedPage, FetchError> {
        let url = reqwest::Url::parse(&source.url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", source.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }

        let t0 = std::time::Instant::now();
        let mut delay = INITIAL_RETRY_DELAY;
        let mut last_err: Option<FetchError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.fetch_once(&url).await {
                Ok(body) => {
                    let fetched_at = Utc::now();
                    let items = parse_feed(&body, fetched_at)?;
                    histogram!("feed_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
                    counter!("feed_items_total").increment(items.len() as u64);
                    debug!(source = %source.id, items = items.len(), attempt, "feed fetched");
                    return Ok(FeedPage {
                        source_id: source.id.clone(),
                        items,
                        fetched_at,
                    });
                }
                Err(e) if e.is_retriable() && attempt < MAX_ATTEMPTS => {
                    warn!(source = %source.id, attempt, error = %e, "retriable fetch failure");
                    tokio::time::sleep(delay).await;
                    delay = Duration::from_secs_f64(delay.as_secs_f64() * BACKOFF_FACTOR);
                    last_err = Some(e);
                }
                Err(e) => {
                    counter!("feed_errors_total").increment(1);
                    return Err(e);
                }
            }
        }

        counter!("feed_errors_total").increment(1);
        Err(last_err.unwrap_or(FetchError::Timeout(MAX_ATTEMPTS)))
    }

    async fn fetch_once(&self, url: &reqwest::Url) -> Result<String, FetchError> {
        let resp = self
            .http
            .get(url.clone())
            .header(reqwest::header::ACCEPT, ACCEPT)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if status.is_client_error() {
            return Err(FetchError::HttpClient(status.as_u16()));
        }
        if status.is_server_error() {
            return Err(FetchError::HttpServer(status.as_u16()));
        }
        resp.text().await.map_err(classify_transport)
    }
}

fn classify_transport(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        return FetchError::Timeout(1);
    }
    let msg = e.to_string();
    if e.is_connect() {
        if msg.contains("dns") || msg.contains("resolve") {
            return FetchError::Dns(msg);
        }
        return FetchError::ConnectionRefused(msg);
    }
    // Body/stream failures mid-transfer behave like a flaky upstream.
    FetchError::ConnectionRefused(msg)
}

// ---- RSS shape ----

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "content:encoded")]
    content_encoded: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text")]
    value: Option<String>,
}

// ---- Atom shape ----

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextValue>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    id: Option<String>,
    summary: Option<TextValue>,
    content: Option<TextValue>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    #[serde(rename = "$text")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

fn parse_feed_date(ts: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let unix = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()
        .map(|dt| dt.unix_timestamp());
    match unix.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0)) {
        Some(dt) => dt,
        None => fallback,
    }
}

/// Parse the common RSS or Atom shape, keeping the most recent
/// `MAX_ARTICLES_PER_FEED` items. Missing fields become empty strings and
/// missing dates become `now`.
pub fn parse_feed(xml: &str, now: DateTime<Utc>) -> Result<Vec<FeedItem>, FetchError> {
    let mut items = if let Ok(rss) = from_str::<Rss>(xml) {
        rss.channel
            .item
            .into_iter()
            .map(|it| {
                let description = normalize_text(it.description.as_deref().unwrap_or_default());
                let content = match it.content_encoded.as_deref() {
                    Some(c) if !c.trim().is_empty() => normalize_text(c),
                    _ => description.clone(),
                };
                let link = it.link.unwrap_or_default().trim().to_string();
                FeedItem {
                    title: normalize_text(it.title.as_deref().unwrap_or_default()),
                    description,
                    content,
                    guid: it
                        .guid
                        .and_then(|g| g.value)
                        .unwrap_or_else(|| link.clone()),
                    pub_date: it
                        .pub_date
                        .as_deref()
                        .map(|ts| parse_feed_date(ts, now))
                        .unwrap_or(now),
                    link,
                }
            })
            .collect::<Vec<_>>()
    } else {
        let feed: AtomFeed =
            from_str(xml).map_err(|e| FetchError::Parse(format!("not rss or atom: {e}")))?;
        feed.entries
            .into_iter()
            .map(|en| {
                let link = en
                    .links
                    .iter()
                    .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                    .or(en.links.first())
                    .and_then(|l| l.href.clone())
                    .unwrap_or_default();
                let summary = normalize_text(
                    en.summary
                        .as_ref()
                        .and_then(|t| t.value.as_deref())
                        .unwrap_or_default(),
                );
                let content = match en.content.as_ref().and_then(|t| t.value.as_deref()) {
                    Some(c) if !c.trim().is_empty() => normalize_text(c),
                    _ => summary.clone(),
                };
                FeedItem {
                    title: normalize_text(
                        en.title
                            .as_ref()
                            .and_then(|t| t.value.as_deref())
                            .unwrap_or_default(),
                    ),
                    description: summary,
                    content,
                    guid: en.id.unwrap_or_else(|| link.clone()),
                    pub_date: en
                        .published
                        .as_deref()
                        .or(en.updated.as_deref())
                        .map(|ts| parse_feed_date(ts, now))
                        .unwrap_or(now),
                    link,
                }
            })
            .collect::<Vec<_>>()
    };

    // Keep only items that point somewhere.
    items.retain(|it| !it.link.is_empty() || !it.title.is_empty());

    // Most recent first, then cap.
    items.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
    items.truncate(MAX_ARTICLES_PER_FEED);
    Ok(items)
}
