// src/pipeline/dedup.rs
//! Batch deduplication: an exact pass on normalized title/url/content
//! keys, then pairwise weighted similarity clustering, then best-of-cluster
//! selection. Deterministic for a given input order.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::domain::Article;

/// Source ids whose articles get the official-source weight in ranking.
pub const OFFICIAL_SOURCES: &[&str] = &[
    "white-house",
    "state-dept",
    "defense-dept",
    "federal-reserve",
    "un-news",
];

/// Ranking score shared by the deduplicator, the quota distributor and
/// the holding-queue backpressure: content depth capped at 2, a flat
/// official-source bonus, and a freshness term that decays to zero five
/// hours after publish.
pub fn article_score(a: &Article, now: DateTime<Utc>) -> f64 {
    let depth = (a.content.len() as f64 / 1000.0).min(2.0);
    let official = if OFFICIAL_SOURCES.contains(&a.source_id.as_str()) {
        3.0
    } else {
        0.0
    };
    let freshness = (5.0 - a.hours_since_publish(now)).max(0.0);
    depth + official + freshness
}

#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Cluster winners, in cluster-formation order.
    pub unique: Vec<Article>,
    /// Winner id → ids folded into that winner's cluster.
    pub groups: HashMap<String, Vec<String>>,
}

/// Deduplicate `candidates` (typically: today's stored articles followed
/// by the drained holding queue, so stored rows win exact collisions).
pub fn dedup(candidates: Vec<Article>, threshold: f64, now: DateTime<Utc>) -> DedupOutcome {
    let n = candidates.len();
    let mut duplicate_of: Vec<Option<usize>> = vec![None; n];

    // Exact pass: later key collisions fold into the first occurrence.
    let mut seen: HashMap<String, usize> = HashMap::new();
    for (i, a) in candidates.iter().enumerate() {
        let key = exact_key(a);
        match seen.get(&key) {
            Some(&first) => duplicate_of[i] = Some(first),
            None => {
                seen.insert(key, i);
            }
        }
    }

    // Similarity pass over survivors. The cache is scoped to this call.
    let mut cache: HashMap<(usize, usize), f64> = HashMap::new();
    for i in 0..n {
        if duplicate_of[i].is_some() {
            continue;
        }
        for j in (i + 1)..n {
            if duplicate_of[j].is_some() {
                continue;
            }
            let sim = *cache
                .entry((i, j))
                .or_insert_with(|| weighted_similarity(&candidates[i], &candidates[j]));
            if sim >= threshold {
                duplicate_of[j] = Some(i);
            }
        }
    }

    // Gather clusters in first-member order.
    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut order: Vec<usize> = Vec::new();
    for i in 0..n {
        let root = duplicate_of[i].unwrap_or(i);
        let entry = members.entry(root).or_default();
        if entry.is_empty() {
            order.push(root);
        }
        entry.push(i);
    }

    let mut outcome = DedupOutcome::default();
    for root in order {
        let cluster = &members[&root];
        let winner = best_of_cluster(&candidates, cluster, now);
        let losers: Vec<String> = cluster
            .iter()
            .filter(|&&i| i != winner)
            .map(|&i| candidates[i].id.clone())
            .collect();
        if !losers.is_empty() {
            outcome
                .groups
                .insert(candidates[winner].id.clone(), losers);
        }
        outcome.unique.push(candidates[winner].clone());
    }
    outcome
}

fn exact_key(a: &Article) -> String {
    let content_head: String = a.content.to_lowercase().chars().take(100).collect();
    format!(
        "{}\u{1}{}\u{1}{}",
        a.title.to_lowercase(),
        a.url.to_lowercase(),
        content_head
    )
}

/// Highest score wins; ties break toward the earliest publish time, then
/// the lexicographically smallest id.
fn best_of_cluster(candidates: &[Article], cluster: &[usize], now: DateTime<Utc>) -> usize {
    let mut best = cluster[0];
    for &i in &cluster[1..] {
        let (a, b) = (&candidates[i], &candidates[best]);
        let (sa, sb) = (article_score(a, now), article_score(b, now));
        let better = match sa.partial_cmp(&sb) {
            Some(std::cmp::Ordering::Greater) => true,
            Some(std::cmp::Ordering::Less) => false,
            _ => match a.published_at.cmp(&b.published_at) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Greater => false,
                std::cmp::Ordering::Equal => a.id < b.id,
            },
        };
        if better {
            best = i;
        }
    }
    best
}

fn word_set(s: &str) -> HashSet<String> {
    s.split_whitespace().map(|w| w.to_lowercase()).collect()
}

fn jaccard(a: &str, b: &str) -> f64 {
    let (wa, wb) = (word_set(a), word_set(b));
    let inter = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

/// Weighted pair similarity in [0, 1]: title and content Jaccard at 0.4
/// each, URL segment overlap at 0.2. A field empty on either side drops
/// its factor and the remaining weights renormalize.
pub fn weighted_similarity(a: &Article, b: &Article) -> f64 {
    let mut acc = 0.0;
    let mut total = 0.0;
    if !a.title.is_empty() && !b.title.is_empty() {
        acc += jaccard(&a.title, &b.title) * 0.4;
        total += 0.4;
    }
    if !a.content.is_empty() && !b.content.is_empty() {
        acc += jaccard(&a.content, &b.content) * 0.4;
        total += 0.4;
    }
    if !a.url.is_empty() && !b.url.is_empty() {
        acc += url_similarity(&a.url, &b.url) * 0.2;
        total += 0.2;
    }
    if total == 0.0 {
        0.0
    } else {
        acc / total
    }
}

/// URL similarity: 0 across hosts; with a shared host, the fraction of
/// path segments the two URLs have in common (1 when both paths are
/// empty, 0.5 when only one is).
fn url_similarity(a: &str, b: &str) -> f64 {
    let (ua, ub) = match (reqwest::Url::parse(a), reqwest::Url::parse(b)) {
        (Ok(ua), Ok(ub)) => (ua, ub),
        _ => return 0.0,
    };
    if ua.host_str() != ub.host_str() {
        return 0.0;
    }
    let seg = |u: &reqwest::Url| -> Vec<String> {
        u.path_segments()
            .map(|s| {
                s.filter(|p| !p.is_empty())
                    .map(|p| p.to_string())
                    .collect()
            })
            .unwrap_or_default()
    };
    let (pa, pb) = (seg(&ua), seg(&ub));
    match (pa.is_empty(), pb.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.5,
        (false, false) => {
            let sa: HashSet<&String> = pa.iter().collect();
            let sb: HashSet<&String> = pb.iter().collect();
            let common = sa.intersection(&sb).count();
            common as f64 / pa.len().max(pb.len()) as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;
    use chrono::Duration;

    fn article(id: &str, source: &str, title: &str, content: &str, url: &str) -> Article {
        let now = Utc::now();
        Article {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            content: content.to_string(),
            url: url.to_string(),
            source_id: source.to_string(),
            category: Category::FinanceMacro,
            published_at: now - Duration::hours(1),
            captured_at: now,
            tags: vec![],
            brief_generated: false,
        }
    }

    #[test]
    fn exact_pass_drops_later_collisions() {
        let a = article("a1", "s1", "Same Title", "same content body", "https://x/y");
        let b = article("a2", "s2", "same title", "Same Content body extended", "https://x/y");
        // Same lowered title+url+first-100 content prefix? Different content
        // heads, so only a true triple match collapses.
        let c = article("a3", "s3", "Same Title", "same content body", "https://x/y");
        let out = dedup(vec![a, b, c], 0.99, Utc::now());
        // a1 and a3 share the exact key; a2 differs in the content head.
        assert_eq!(out.unique.len(), 2);
        assert_eq!(out.groups["a1"], vec!["a3".to_string()]);
    }

    #[test]
    fn similarity_pass_merges_same_story() {
        let body = "The Federal Open Market Committee kept the federal funds target range \
                    unchanged and signalled patience on future moves while inflation cools.";
        let a = article(
            "fed-1",
            "federal-reserve",
            "Fed holds rates steady at 5.25-5.50",
            body,
            "https://www.federalreserve.gov/newsevents/pressreleases/monetary20260614a.htm",
        );
        let b = article(
            "npr-1",
            "npr-economy",
            "Fed holds rates steady at 5.25-5.50 range",
            body,
            "https://www.federalreserve.gov/newsevents/pressreleases/monetary20260614b.htm",
        );
        let sim = weighted_similarity(&a, &b);
        assert!(sim >= 0.82, "expected merge-level similarity, got {sim}");

        let out = dedup(vec![b.clone(), a.clone()], 0.82, Utc::now());
        assert_eq!(out.unique.len(), 1);
        // Official source outranks the syndicated copy.
        assert_eq!(out.unique[0].source_id, "federal-reserve");
    }

    #[test]
    fn cross_host_pairs_stay_below_threshold() {
        let body = "Identical body text for both stories about the same event.";
        let a = article("a", "s1", "Identical headline", body, "https://host-one.com/p/q");
        let b = article("b", "s2", "Identical headline", body, "https://host-two.com/p/q");
        // Hosts differ: URL factor contributes zero, capping the weighted
        // similarity at 0.8.
        let sim = weighted_similarity(&a, &b);
        assert!(sim < 0.82);
        assert!((sim - 0.8).abs() < 1e-9);
    }

    #[test]
    fn missing_fields_renormalize_weights() {
        let a = article("a", "s1", "Exact same title words", "", "");
        let b = article("b", "s2", "Exact same title words", "", "");
        assert!((weighted_similarity(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn best_of_cluster_prefers_fresh_official_long() {
        let now = Utc::now();
        let mut official = article("off", "federal-reserve", "T", &"x".repeat(500), "");
        let mut wire = article("wire", "npr-economy", "T", &"x".repeat(2500), "");
        official.published_at = now - Duration::hours(1);
        wire.published_at = now - Duration::hours(1);
        // official: 0.5 + 3 + 4 = 7.5; wire: 2.0 + 0 + 4 = 6.0
        assert!(
            article_score(&official, now) > article_score(&wire, now),
            "official bonus should beat content depth"
        );
    }

    #[test]
    fn tie_breaks_on_publish_then_id() {
        let now = Utc::now();
        let mut a = article("b-id", "s", "T", "same", "");
        let mut b = article("a-id", "s", "T", "same", "");
        a.published_at = now - Duration::hours(2);
        b.published_at = now - Duration::hours(2);
        // Freshness differs with publish time; equalize and check id order.
        let cluster = [0usize, 1usize];
        let all = vec![a, b];
        let w = best_of_cluster(&all, &cluster, now);
        assert_eq!(all[w].id, "a-id");
    }
}
