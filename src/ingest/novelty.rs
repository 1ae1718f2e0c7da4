// src/ingest/novelty.rs
//! Novelty check for freshly fetched items: exact URL match first, then a
//! fuzzy title pass over a handful of stored candidates. Lookup failures
//! admit the candidate; a duplicate costs less than a lost story.

use metrics::counter;
use std::collections::HashSet;
use tracing::warn;

use crate::store::Store;

/// First-N-chars window used to pull fuzzy title candidates.
const TITLE_WINDOW: usize = 100;
/// How many stored candidates the fuzzy pass looks at.
const CANDIDATE_LIMIT: usize = 5;
/// Word-set ratio at or above which a candidate counts as already stored.
const TITLE_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Decide whether a candidate is new to the store.
pub async fn is_new(store: &dyn Store, url: &str, title: &str) -> bool {
    match store.article_url_exists(url).await {
        Ok(true) => {
            counter!("novelty_rejected_total").increment(1);
            return false;
        }
        Ok(false) => {}
        Err(e) => {
            warn!(error = %e, "novelty url lookup failed, admitting candidate");
            return true;
        }
    }

    let window: String = title.chars().take(TITLE_WINDOW).collect();
    if window.trim().is_empty() {
        return true;
    }

    let candidates = match store.titles_containing(&window, CANDIDATE_LIMIT).await {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "novelty title lookup failed, admitting candidate");
            return true;
        }
    };

    for stored in &candidates {
        if title_similarity(stored, title) >= TITLE_SIMILARITY_THRESHOLD {
            counter!("novelty_rejected_total").increment(1);
            return false;
        }
    }
    true
}

fn word_set(s: &str) -> HashSet<String> {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Asymmetric word-set ratio `|W_stored| / |W_candidate|`. Candidates are
/// pre-filtered to stored titles that contain the candidate's title
/// window, so this only needs to check that the two titles are of
/// comparable length; values above 1 are possible.
pub fn title_similarity(stored_title: &str, candidate_title: &str) -> f64 {
    let stored = word_set(stored_title);
    let candidate = word_set(candidate_title);
    if candidate.is_empty() {
        return 0.0;
    }
    stored.len() as f64 / candidate.len() as f64
}
