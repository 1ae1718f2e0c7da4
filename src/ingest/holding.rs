// src/ingest/holding.rs
//! Holding queue between sweeps and batches: FIFO of novel articles with
//! a breaking-news scan on enqueue and a preemption signal toward the
//! scheduler, raised at most once per batch interval.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::sync::Notify;
use tracing::info;

use crate::domain::{Article, Category};
use crate::pipeline::dedup::article_score;

pub const BREAKING_KEYWORDS: &[&str] = &[
    "breaking",
    "urgent",
    "alert",
    "crisis",
    "emergency",
    "attack",
    "disaster",
    "election",
    "resignation",
    "impeachment",
    "war",
    "conflict",
    "coup",
    "market crash",
    "economic crisis",
    "natural disaster",
];

/// Title or content containing any breaking keyword, case-insensitive.
pub fn is_breaking(title: &str, content: &str) -> bool {
    let haystack = format!("{} {}", title, content).to_lowercase();
    BREAKING_KEYWORDS.iter().any(|k| haystack.contains(k))
}

pub struct HoldingQueue {
    inner: Mutex<VecDeque<Article>>,
    /// Past this size, lowest-scored items are dropped to bound memory.
    high_water: usize,
    preempt: Notify,
    preempt_armed: AtomicBool,
}

impl HoldingQueue {
    pub fn new(high_water: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            high_water,
            preempt: Notify::new(),
            preempt_armed: AtomicBool::new(false),
        }
    }

    /// Append novel items, scanning for breaking news. The preemption
    /// signal fires on the first breaking item and stays quiet until the
    /// next `drain`.
    pub fn enqueue(&self, items: Vec<Article>) {
        if items.is_empty() {
            return;
        }
        let breaking = items
            .iter()
            .find(|a| is_breaking(&a.title, &a.content))
            .map(|a| a.title.clone());

        {
            let mut q = self.inner.lock().expect("holding mutex poisoned");
            q.extend(items);
            if q.len() > self.high_water {
                let dropped = shed_lowest(&mut q, self.high_water);
                counter!("holding_dropped_total").increment(dropped as u64);
            }
            gauge!("holding_queue_size").set(q.len() as f64);
        }

        if let Some(title) = breaking {
            if !self.preempt_armed.swap(true, Ordering::SeqCst) {
                counter!("holding_preemptions_total").increment(1);
                info!(%title, "breaking news, requesting immediate batch");
                self.preempt.notify_one();
            }
        }
    }

    /// Take everything and re-arm the preemption signal. Drain and clear
    /// happen under one lock so the sweep writer never interleaves.
    pub fn drain(&self) -> Vec<Article> {
        let drained: Vec<Article> = {
            let mut q = self.inner.lock().expect("holding mutex poisoned");
            let out = q.drain(..).collect();
            gauge!("holding_queue_size").set(0.0);
            out
        };
        self.preempt_armed.store(false, Ordering::SeqCst);
        drained
    }

    pub fn size(&self) -> usize {
        self.inner.lock().expect("holding mutex poisoned").len()
    }

    pub fn by_category(&self) -> HashMap<Category, usize> {
        let q = self.inner.lock().expect("holding mutex poisoned");
        let mut out = HashMap::new();
        for a in q.iter() {
            *out.entry(a.category).or_insert(0) += 1;
        }
        out
    }

    pub fn clear(&self) {
        self.drain();
    }

    /// Resolves when breaking news has been enqueued since the last drain.
    pub async fn preempted(&self) {
        self.preempt.notified().await;
    }
}

/// Drop the lowest-scored items until the queue is back at `keep` items,
/// preserving arrival order of the survivors. Returns the drop count.
fn shed_lowest(q: &mut VecDeque<Article>, keep: usize) -> usize {
    let excess = q.len().saturating_sub(keep);
    if excess == 0 {
        return 0;
    }
    let now = Utc::now();
    let mut ranked: Vec<(usize, f64)> = q
        .iter()
        .enumerate()
        .map(|(i, a)| (i, article_score(a, now)))
        .collect();
    ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    let drop: std::collections::HashSet<usize> =
        ranked.iter().take(excess).map(|(i, _)| *i).collect();
    let survivors: VecDeque<Article> = q
        .drain(..)
        .enumerate()
        .filter(|(i, _)| !drop.contains(i))
        .map(|(_, a)| a)
        .collect();
    *q = survivors;
    excess
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn article(id: &str, title: &str, content_len: usize) -> Article {
        Article {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            content: "x".repeat(content_len),
            url: format!("https://example.com/{id}"),
            source_id: "src".to_string(),
            category: Category::UsNational,
            published_at: Utc::now() - Duration::hours(10),
            captured_at: Utc::now(),
            tags: vec![],
            brief_generated: false,
        }
    }

    #[test]
    fn breaking_scan_is_case_insensitive() {
        assert!(is_breaking("BREAKING: major earthquake in Region Y", ""));
        assert!(is_breaking("calm title", "officials declared an Emergency"));
        assert!(!is_breaking("markets drift sideways", "quiet afternoon"));
    }

    #[tokio::test]
    async fn preemption_fires_once_until_drain() {
        let q = HoldingQueue::new(100);
        q.enqueue(vec![article("a", "BREAKING: flood", 10)]);
        // Signal buffered even though nobody was awaiting yet.
        tokio::time::timeout(std::time::Duration::from_millis(50), q.preempted())
            .await
            .expect("first preemption should fire");

        // Second breaking item before drain stays quiet.
        q.enqueue(vec![article("b", "URGENT: another", 10)]);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), q.preempted())
                .await
                .is_err()
        );

        // Drain re-arms.
        q.drain();
        q.enqueue(vec![article("c", "BREAKING once more", 10)]);
        tokio::time::timeout(std::time::Duration::from_millis(50), q.preempted())
            .await
            .expect("preemption re-armed after drain");
    }

    #[test]
    fn drain_clears_and_counts_by_category() {
        let q = HoldingQueue::new(100);
        q.enqueue(vec![article("a", "one", 10), article("b", "two", 10)]);
        assert_eq!(q.size(), 2);
        assert_eq!(q.by_category()[&Category::UsNational], 2);
        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn backpressure_sheds_lowest_scored() {
        let q = HoldingQueue::new(3);
        // Longer content scores higher under the ranking function.
        q.enqueue(vec![
            article("long1", "t", 2000),
            article("short", "t", 10),
            article("long2", "t", 1800),
            article("long3", "t", 1500),
        ]);
        assert_eq!(q.size(), 3);
        let ids: Vec<String> = q.drain().into_iter().map(|a| a.id).collect();
        assert!(!ids.contains(&"short".to_string()));
    }
}
