// src/store/postgres.rs
//! Postgres adapter. Schema management lives with the deployment glue;
//! this module assumes the following shape and owns only the queries:
//!
//! ```sql
//! sources(id TEXT PRIMARY KEY, name TEXT, url TEXT UNIQUE, category TEXT,
//!         active BOOL, last_checked TIMESTAMPTZ, last_error TEXT)
//! articles(id TEXT PRIMARY KEY, title TEXT, description TEXT, content TEXT,
//!          url TEXT UNIQUE, source_id TEXT, category TEXT,
//!          published_at TIMESTAMPTZ, captured_at TIMESTAMPTZ,
//!          tags TEXT[], brief_generated BOOL)
//! briefs(id TEXT PRIMARY KEY, headline TEXT, body TEXT, sources TEXT[],
//!        category TEXT, published_at TIMESTAMPTZ, tags TEXT[], status TEXT,
//!        model TEXT, prompt_version TEXT, tokens BIGINT, cost DOUBLE PRECISION,
//!        processing_ms BIGINT, subjectivity DOUBLE PRECISION, revisions INT)
//! processing_logs(id BIGSERIAL PRIMARY KEY, success BOOL,
//!                 articles_processed BIGINT, briefs_generated BIGINT,
//!                 errors TEXT[], processing_ms BIGINT, tokens BIGINT,
//!                 cost DOUBLE PRECISION, model TEXT, prompt_version TEXT,
//!                 timestamp TIMESTAMPTZ)
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::domain::{Article, Brief, Category, ProcessingLog, Source};
use crate::store::Store;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn source_from_row(row: &sqlx::postgres::PgRow) -> Result<Source> {
    let category: String = row.try_get("category")?;
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        category: Category::parse(&category)
            .ok_or_else(|| anyhow!("unknown category {category}"))?,
        active: row.try_get("active")?,
        last_checked: row.try_get("last_checked")?,
        last_error: row.try_get("last_error")?,
    })
}

fn article_from_row(row: &sqlx::postgres::PgRow) -> Result<Article> {
    let category: String = row.try_get("category")?;
    Ok(Article {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        content: row.try_get("content")?,
        url: row.try_get("url")?,
        source_id: row.try_get("source_id")?,
        category: Category::parse(&category)
            .ok_or_else(|| anyhow!("unknown category {category}"))?,
        published_at: row.try_get("published_at")?,
        captured_at: row.try_get("captured_at")?,
        tags: row.try_get("tags")?,
        brief_generated: row.try_get("brief_generated")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn active_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM sources WHERE active ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn update_source_probe(
        &self,
        id: &str,
        checked_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE sources SET last_checked = $2, last_error = $3 WHERE id = $1")
            .bind(id)
            .bind(checked_at)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_article_chunk(&self, articles: &[Article]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for a in articles {
            sqlx::query(
                r#"
                INSERT INTO articles
                    (id, title, description, content, url, source_id, category,
                     published_at, captured_at, tags, brief_generated)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (id) DO UPDATE SET
                    title = EXCLUDED.title,
                    description = EXCLUDED.description,
                    content = EXCLUDED.content,
                    tags = EXCLUDED.tags,
                    brief_generated = articles.brief_generated OR EXCLUDED.brief_generated
                "#,
            )
            .bind(&a.id)
            .bind(&a.title)
            .bind(&a.description)
            .bind(&a.content)
            .bind(&a.url)
            .bind(&a.source_id)
            .bind(a.category.as_str())
            .bind(a.published_at)
            .bind(a.captured_at)
            .bind(&a.tags)
            .bind(a.brief_generated)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_briefs(&self, briefs: &[Brief]) -> Result<()> {
        for b in briefs {
            // Conflict keeps the stored row so externally driven status
            // transitions survive a replay.
            sqlx::query(
                r#"
                INSERT INTO briefs
                    (id, headline, body, sources, category, published_at, tags,
                     status, model, prompt_version, tokens, cost, processing_ms,
                     subjectivity, revisions)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&b.id)
            .bind(&b.headline)
            .bind(&b.body)
            .bind(&b.sources)
            .bind(b.category.as_str())
            .bind(b.published_at)
            .bind(&b.tags)
            .bind(b.status.as_str())
            .bind(&b.llm.model)
            .bind(&b.llm.prompt_version)
            .bind(b.llm.tokens as i64)
            .bind(b.llm.cost)
            .bind(b.llm.processing_ms as i64)
            .bind(b.llm.subjectivity)
            .bind(b.llm.revisions as i32)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn mark_brief_generated(&self, article_ids: &[String]) -> Result<()> {
        sqlx::query("UPDATE articles SET brief_generated = TRUE WHERE id = ANY($1)")
            .bind(article_ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_processing_log(&self, log: &ProcessingLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_logs
                (success, articles_processed, briefs_generated, errors,
                 processing_ms, tokens, cost, model, prompt_version, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(log.success)
        .bind(log.articles_processed as i64)
        .bind(log.briefs_generated as i64)
        .bind(&log.errors)
        .bind(log.processing_ms as i64)
        .bind(log.tokens as i64)
        .bind(log.cost)
        .bind(&log.model)
        .bind(&log.prompt_version)
        .bind(log.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn articles_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            "SELECT * FROM articles WHERE published_at >= $1 AND published_at <= $2 \
             ORDER BY published_at",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(article_from_row).collect()
    }

    async fn count_articles_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        category: Option<Category>,
    ) -> Result<u64> {
        let count: i64 = match category {
            Some(c) => sqlx::query_scalar(
                "SELECT COUNT(*) FROM articles \
                 WHERE published_at >= $1 AND published_at <= $2 AND category = $3",
            )
            .bind(start)
            .bind(end)
            .bind(c.as_str())
            .fetch_one(&self.pool)
            .await?,
            None => sqlx::query_scalar(
                "SELECT COUNT(*) FROM articles \
                 WHERE published_at >= $1 AND published_at <= $2",
            )
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool)
            .await?,
        };
        Ok(count as u64)
    }

    async fn article_url_exists(&self, url: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM articles WHERE url = $1)")
            .bind(url)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn titles_containing(&self, window: &str, limit: usize) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT title FROM articles WHERE strpos(title, $1) > 0 LIMIT $2",
        )
        .bind(window)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
