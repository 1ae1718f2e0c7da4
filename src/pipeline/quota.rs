// src/pipeline/quota.rs
//! Daily quota distribution: per-category caps derived from the daily
//! limit and an even three-way split, ranked selection inside each
//! category, and a round-robin trim if the union overruns the day total.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::domain::{Article, Category};
use crate::pipeline::dedup::article_score;
use crate::store::Store;

/// Even split across the three categories.
pub const CATEGORY_SPLIT: f64 = 1.0 / 3.0;

/// Start of the local day expressed in UTC. Quotas reset here.
pub fn local_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let local_day = now.with_timezone(&Local).date_naive();
    let midnight = local_day.and_hms_opt(0, 0, 0).expect("valid midnight");
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

#[derive(Debug, Default)]
pub struct QuotaOutcome {
    /// Selected articles, category-major, best score first inside each.
    pub selected: Vec<Article>,
    pub categories_at_limit: Vec<Category>,
}

/// Apply daily and per-category caps to the deduplicated candidates.
pub async fn distribute(
    store: &dyn Store,
    cfg: &PipelineConfig,
    candidates: Vec<Article>,
    now: DateTime<Utc>,
) -> Result<QuotaOutcome> {
    let midnight = local_midnight(now);
    let per_category_target = (cfg.daily_article_limit as f64 * CATEGORY_SPLIT).floor() as i64;

    let mut by_category: HashMap<Category, Vec<Article>> = HashMap::new();
    for a in candidates {
        by_category.entry(a.category).or_default().push(a);
    }

    let mut outcome = QuotaOutcome::default();
    let mut picked: HashMap<Category, Vec<Article>> = HashMap::new();

    for category in Category::ALL {
        let Some(mut pool) = by_category.remove(&category) else {
            continue;
        };
        let already = store
            .count_articles_in_window(midnight, now, Some(category))
            .await? as i64;
        let remaining = (per_category_target - already).max(0) as usize;
        let cap = remaining.min(cfg.max_articles_per_category as usize);

        // Stable sort keeps input order among equal scores, so the whole
        // selection is deterministic for a given batch.
        pool.sort_by(|a, b| {
            article_score(b, now)
                .partial_cmp(&article_score(a, now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if pool.len() > cap {
            outcome.categories_at_limit.push(category);
        }
        pool.truncate(cap);
        debug!(
            category = %category,
            already,
            cap,
            selected = pool.len(),
            "quota selection"
        );
        picked.insert(category, pool);
    }

    trim_union(
        &mut picked,
        cfg.daily_article_limit as usize,
        &mut outcome.categories_at_limit,
    );

    for category in Category::ALL {
        if let Some(pool) = picked.remove(&category) {
            outcome.selected.extend(pool);
        }
    }
    outcome.categories_at_limit.sort();
    Ok(outcome)
}

/// Trim the union down to the day total by walking the categories
/// round-robin, each step shedding that category's current lowest-scored
/// item. With the stock constants the per-category caps already sum to at
/// most the day total; this only bites under operator overrides.
fn trim_union(
    picked: &mut HashMap<Category, Vec<Article>>,
    limit: usize,
    at_limit: &mut Vec<Category>,
) {
    let mut total: usize = picked.values().map(Vec::len).sum();
    let mut rotation = Category::ALL.iter().cycle();
    while total > limit {
        let category = rotation.next().expect("cycle never ends");
        if let Some(pool) = picked.get_mut(category) {
            // Pools are sorted best-first, so the tail is the lowest score.
            if pool.pop().is_some() {
                total -= 1;
                if !at_limit.contains(category) {
                    at_limit.push(*category);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryUsage {
    pub used: u64,
    pub cap: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyLimits {
    pub total_used: u64,
    pub total_limit: u32,
    pub per_category: HashMap<Category, CategoryUsage>,
}

/// Day-window counters for the control surface.
pub async fn daily_limits(
    store: &dyn Store,
    cfg: &PipelineConfig,
    now: DateTime<Utc>,
) -> Result<DailyLimits> {
    let midnight = local_midnight(now);
    let per_category_target = (cfg.daily_article_limit as f64 * CATEGORY_SPLIT).floor() as u32;
    let mut per_category = HashMap::new();
    let mut total_used = 0u64;
    for category in Category::ALL {
        let used = store
            .count_articles_in_window(midnight, now, Some(category))
            .await?;
        total_used += used;
        let cap = per_category_target.min(cfg.max_articles_per_category);
        per_category.insert(
            category,
            CategoryUsage {
                used,
                cap,
                remaining: (cap as i64 - used as i64).max(0) as u32,
            },
        );
    }
    Ok(DailyLimits {
        total_used,
        total_limit: cfg.daily_article_limit,
        per_category,
    })
}
