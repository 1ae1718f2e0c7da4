// src/ingest/mod.rs
pub mod breaker;
pub mod fetcher;
pub mod holding;
pub mod novelty;
pub mod scheduler;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up wherever the operator
/// installs a recorder).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_items_total", "Items parsed from feeds.");
        describe_counter!("feed_errors_total", "Terminal fetch failures per sweep.");
        describe_counter!("sweep_runs_total", "Completed poller sweeps.");
        describe_counter!("batch_runs_total", "Completed batch executions.");
        describe_counter!(
            "batch_skipped_total",
            "Batch ticks skipped while one was in flight."
        );
        describe_counter!("breaker_open_total", "Circuit breaker open transitions.");
        describe_counter!("breaker_skips_total", "Sources skipped by an open breaker.");
        describe_counter!(
            "holding_preemptions_total",
            "Breaking-news preemption signals."
        );
        describe_counter!(
            "holding_dropped_total",
            "Items dropped by queue backpressure."
        );
        describe_counter!(
            "novelty_rejected_total",
            "Candidates rejected as already stored."
        );
        describe_counter!("briefs_generated_total", "Briefs persisted by batches.");
        describe_counter!(
            "briefs_fallback_total",
            "Fallback briefs emitted on LLM failure."
        );
        describe_histogram!(
            "feed_fetch_ms",
            "Wall time of one source fetch in milliseconds."
        );
        describe_histogram!("batch_ms", "Wall time of one batch in milliseconds.");
        describe_gauge!("holding_queue_size", "Articles waiting for the next batch.");
    });
}

/// Normalize feed text: entity-decode, strip tags, straighten quotes,
/// collapse whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize curly and angled quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap: 8000 chars keeps full wire copy but bounds memory
    if out.chars().count() > 8000 {
        out = out.chars().take(8000).collect();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_tags_and_entities() {
        let s = "  <p>Fed &amp; Treasury</p>\n\n respond ";
        assert_eq!(normalize_text(s), "Fed & Treasury respond");
    }

    #[test]
    fn normalize_text_straightens_quotes() {
        let s = "\u{201C}historic\u{201D} deal";
        assert_eq!(normalize_text(s), "\"historic\" deal");
    }
}
