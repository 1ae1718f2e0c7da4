//! # Domain Types
//! Sources, articles, briefs and batch records shared across the pipeline.
//! Pure data plus the deterministic identity scheme; no I/O.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::types::FeedItem;
use crate::tags;

/// Topical category. Immutable for a given source; copied onto each
/// article at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "US_NATIONAL")]
    UsNational,
    #[serde(rename = "INTERNATIONAL")]
    International,
    #[serde(rename = "FINANCE_MACRO")]
    FinanceMacro,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::UsNational,
        Category::International,
        Category::FinanceMacro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::UsNational => "US_NATIONAL",
            Category::International => "INTERNATIONAL",
            Category::FinanceMacro => "FINANCE_MACRO",
        }
    }

    /// Lowercase slug used as the leading segment of brief ids.
    pub fn slug(&self) -> &'static str {
        match self {
            Category::UsNational => "us-national",
            Category::International => "international",
            Category::FinanceMacro => "finance-macro",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s {
            "US_NATIONAL" => Some(Category::UsNational),
            "INTERNATIONAL" => Some(Category::International),
            "FINANCE_MACRO" => Some(Category::FinanceMacro),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured feed. Loaded once at startup and rarely mutated; only the
/// probe fields (`last_checked`, `last_error`) change at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub url: String,
    pub category: Category,
    pub active: bool,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Allowed skew between a feed-reported publish time and our capture time.
const PUBLISH_SKEW: i64 = 5 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub url: String,
    pub source_id: String,
    pub category: Category,
    pub published_at: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub brief_generated: bool,
}

impl Article {
    /// Capture a parsed feed item as an article. Identity is derived from
    /// `(source_id, guid, url)` so a replayed feed collapses onto the same
    /// row; the category is inherited from the source.
    pub fn capture(item: &FeedItem, source: &Source, now: DateTime<Utc>) -> Article {
        // Feeds occasionally report publish times in the future; clamp to
        // capture time plus a small skew so day-window accounting holds.
        let published_at = item.pub_date.min(now + Duration::seconds(PUBLISH_SKEW));
        Article {
            id: article_id(&source.id, &item.guid, &item.link),
            title: item.title.clone(),
            description: item.description.clone(),
            content: item.content.clone(),
            url: item.link.clone(),
            source_id: source.id.clone(),
            category: source.category,
            published_at,
            captured_at: now,
            tags: tags::extract(&item.title, &item.description),
            brief_generated: false,
        }
    }

    pub fn hours_since_publish(&self, now: DateTime<Utc>) -> f64 {
        (now - self.published_at).num_seconds().max(0) as f64 / 3600.0
    }
}

/// 32-bit FNV-1a. `DefaultHasher` is not guaranteed stable across std
/// releases; article identity must survive replays, so the fold is spelled
/// out here.
pub fn fnv1a32(data: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in data.as_bytes() {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Deterministic article id: the folded hash of each identity component,
/// concatenated as fixed-width hex.
pub fn article_id(source_id: &str, guid: &str, url: &str) -> String {
    format!(
        "{:08x}{:08x}{:08x}",
        fnv1a32(source_id),
        fnv1a32(guid),
        fnv1a32(url)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BriefStatus {
    Pending,
    Approved,
    Rejected,
    Published,
    Unpublished,
    Archived,
}

impl BriefStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BriefStatus::Pending => "pending",
            BriefStatus::Approved => "approved",
            BriefStatus::Rejected => "rejected",
            BriefStatus::Published => "published",
            BriefStatus::Unpublished => "unpublished",
            BriefStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<BriefStatus> {
        match s {
            "pending" => Some(BriefStatus::Pending),
            "approved" => Some(BriefStatus::Approved),
            "rejected" => Some(BriefStatus::Rejected),
            "published" => Some(BriefStatus::Published),
            "unpublished" => Some(BriefStatus::Unpublished),
            "archived" => Some(BriefStatus::Archived),
            _ => None,
        }
    }
}

/// Per-call accounting attached to every generated brief.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMetadata {
    pub model: String,
    pub prompt_version: String,
    pub tokens: u64,
    pub cost: f64,
    pub processing_ms: u64,
    /// `|biased terms| / |body words|`, clipped to 1. Never increases
    /// across revisions of the same brief.
    pub subjectivity: f64,
    pub revisions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brief {
    pub id: String,
    pub headline: String,
    pub body: String,
    /// At least one entry; always contains the originating article URL.
    pub sources: Vec<String>,
    pub category: Category,
    pub published_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub status: BriefStatus,
    pub llm: LlmMetadata,
}

/// Brief id: `<category-slug>-<slug3>-<epoch_ms>` where slug3 joins the
/// first three alphanumeric words of the headline.
pub fn brief_id(category: Category, headline: &str, epoch_ms: i64) -> String {
    format!("{}-{}-{}", category.slug(), slug3(headline), epoch_ms)
}

fn slug3(headline: &str) -> String {
    let words: Vec<String> = headline
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|w| !w.is_empty())
        .take(3)
        .collect();
    if words.is_empty() {
        "brief".to_string()
    } else {
        words.join("-")
    }
}

/// Append-only outcome record, one per batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLog {
    pub success: bool,
    pub articles_processed: u64,
    pub briefs_generated: u64,
    pub errors: Vec<String>,
    pub processing_ms: u64,
    pub tokens: u64,
    pub cost: f64,
    pub model: String,
    pub prompt_version: String,
    pub timestamp: DateTime<Utc>,
}

/// Batch result returned to callers (manual trigger included). Errors are
/// accumulated strings; nothing exception-like crosses the batch boundary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub articles_processed: u64,
    pub briefs_generated: u64,
    pub errors: Vec<String>,
    pub categories_at_limit: Vec<Category>,
    pub processing_ms: u64,
    pub tokens: u64,
    pub cost: f64,
}

impl ProcessingResult {
    pub fn skipped(reason: &str) -> Self {
        ProcessingResult {
            success: false,
            errors: vec![reason.to_string()],
            ..Default::default()
        }
    }
}
