// src/ingest/types.rs
use chrono::{DateTime, Utc};

/// One parsed feed entry. Fields fall back to empty strings; `pub_date`
/// falls back to the fetch time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub description: String,
    pub content: String,
    pub link: String,
    pub pub_date: DateTime<Utc>,
    pub guid: String,
}

/// Result of one successful fetch of one source.
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub source_id: String,
    pub items: Vec<FeedItem>,
    pub fetched_at: DateTime<Utc>,
}
