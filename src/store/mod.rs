// src/store/mod.rs
//! Persistence contract. The pipeline talks intent (upsert, window
//! queries, probe updates); adapters own rows and SQL. All writes are
//! idempotent under replay of the same batch.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::warn;

use crate::domain::{Article, Brief, Category, ProcessingLog, Source};

/// Articles are written in chunks of this size; a failed chunk never
/// blocks the rest.
pub const UPSERT_CHUNK: usize = 50;

#[async_trait]
pub trait Store: Send + Sync {
    async fn active_sources(&self) -> Result<Vec<Source>>;
    async fn get_source(&self, id: &str) -> Result<Option<Source>>;
    /// Record a probe outcome on the source row (`last_checked`, and the
    /// error string when the fetch failed).
    async fn update_source_probe(
        &self,
        id: &str,
        checked_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()>;

    /// Write one chunk of articles. Callers go through
    /// [`upsert_articles`], which dedupes and chunks.
    async fn upsert_article_chunk(&self, articles: &[Article]) -> Result<()>;
    async fn upsert_briefs(&self, briefs: &[Brief]) -> Result<()>;
    /// The one permitted article mutation.
    async fn mark_brief_generated(&self, article_ids: &[String]) -> Result<()>;
    async fn append_processing_log(&self, log: &ProcessingLog) -> Result<()>;

    async fn articles_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Article>>;
    async fn count_articles_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        category: Option<Category>,
    ) -> Result<u64>;

    async fn article_url_exists(&self, url: &str) -> Result<bool>;
    /// Stored titles containing `window` as a substring, capped at
    /// `limit`; feeds the fuzzy novelty pass.
    async fn titles_containing(&self, window: &str, limit: usize) -> Result<Vec<String>>;
}

/// Dedupe a batch by id and by URL (first occurrence wins), then upsert
/// in chunks. Returns the ids actually written and the chunk-local
/// errors; a failed chunk never blocks the rest.
pub async fn upsert_articles(
    store: &dyn Store,
    articles: &[Article],
) -> (Vec<String>, Vec<String>) {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    let mut seen_urls: HashSet<&str> = HashSet::new();
    let deduped: Vec<Article> = articles
        .iter()
        .filter(|a| seen_ids.insert(a.id.as_str()) && seen_urls.insert(a.url.as_str()))
        .cloned()
        .collect();

    let mut written = Vec::new();
    let mut errors = Vec::new();
    for (n, chunk) in deduped.chunks(UPSERT_CHUNK).enumerate() {
        match store.upsert_article_chunk(chunk).await {
            Ok(()) => written.extend(chunk.iter().map(|a| a.id.clone())),
            Err(e) => {
                warn!(chunk = n, error = %e, "article chunk upsert failed");
                errors.push(format!("article chunk {n}: {e}"));
            }
        }
    }
    (written, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn article(id: &str, url: &str) -> Article {
        let now = Utc::now();
        Article {
            id: id.to_string(),
            title: format!("title {id}"),
            description: String::new(),
            content: String::new(),
            url: url.to_string(),
            source_id: "s".to_string(),
            category: Category::UsNational,
            published_at: now,
            captured_at: now,
            tags: vec![],
            brief_generated: false,
        }
    }

    #[tokio::test]
    async fn upsert_dedupes_by_id_and_url() {
        let store = MemoryStore::new();
        let batch = vec![
            article("a", "https://x/1"),
            article("a", "https://x/2"), // id collision
            article("b", "https://x/1"), // url collision
            article("c", "https://x/3"),
        ];
        let (written, errors) = upsert_articles(&store, &batch).await;
        assert_eq!(written, vec!["a".to_string(), "c".to_string()]);
        assert!(errors.is_empty());
        assert_eq!(store.article_count(), 2);
    }

    #[tokio::test]
    async fn replay_is_idempotent() {
        let store = MemoryStore::new();
        let batch = vec![article("a", "https://x/1"), article("b", "https://x/2")];
        upsert_articles(&store, &batch).await;
        upsert_articles(&store, &batch).await;
        assert_eq!(store.article_count(), 2);
    }
}
