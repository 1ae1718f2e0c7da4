// src/pipeline/mod.rs
//! Batch orchestration: drain → dedup → distribute → rewrite → persist →
//! log. Nothing exception-like crosses this boundary; the result is
//! always a populated [`ProcessingResult`].

pub mod dedup;
pub mod llm;
pub mod quota;
pub mod rewriter;
pub mod sections;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::domain::{Article, ProcessingLog, ProcessingResult};
use crate::pipeline::llm::ChatProvider;
use crate::pipeline::rewriter::{BriefPolicy, Rewriter};
use crate::store::{self, Store};

pub struct BatchRunner {
    store: Arc<dyn Store>,
    rewriter: Rewriter,
    model: String,
    prompt_version: String,
    cfg: PipelineConfig,
}

impl BatchRunner {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn ChatProvider>, cfg: PipelineConfig) -> Self {
        let model = provider.model_id().to_string();
        let prompt_version = cfg.llm.prompt_version.clone();
        let rewriter = Rewriter::new(provider, BriefPolicy::from_config(&cfg));
        Self {
            store,
            rewriter,
            model,
            prompt_version,
            cfg,
        }
    }

    /// One batch over the drained holding-queue contents. Ordering inside
    /// the batch: exact dedup before similarity, articles persisted
    /// before briefs, each brief persisted before the next article is
    /// touched. Cancellation abandons in-flight rewrites; persisted
    /// briefs stay.
    pub async fn run(&self, drained: Vec<Article>, cancel: CancellationToken) -> ProcessingResult {
        let t0 = std::time::Instant::now();
        let now = Utc::now();
        let mut errors: Vec<String> = Vec::new();
        let mut hard_failure = false;

        let new_ids: HashSet<String> = drained.iter().map(|a| a.id.clone()).collect();

        // Today's stored rows join the candidate set so fresh items that
        // duplicate an already-stored story cluster onto it and drop out.
        let midnight = quota::local_midnight(now);
        let stored_today = match self.store.articles_in_window(midnight, now).await {
            Ok(v) => v,
            Err(e) => {
                errors.push(format!("day-window lookup: {e}"));
                hard_failure = true;
                Vec::new()
            }
        };

        let mut candidates = stored_today;
        candidates.extend(drained);
        let deduped = dedup::dedup(candidates, self.cfg.dedup_similarity_threshold, now);
        if !deduped.groups.is_empty() {
            debug!(clusters = deduped.groups.len(), "duplicate groups folded");
        }
        let fresh: Vec<Article> = deduped
            .unique
            .into_iter()
            .filter(|a| new_ids.contains(&a.id))
            .collect();

        let distribution = match quota::distribute(&*self.store, &self.cfg, fresh, now).await {
            Ok(d) => d,
            Err(e) => {
                errors.push(format!("quota distribution: {e}"));
                hard_failure = true;
                quota::QuotaOutcome::default()
            }
        };

        let (written_ids, chunk_errors) =
            store::upsert_articles(&*self.store, &distribution.selected).await;
        if !chunk_errors.is_empty() {
            hard_failure = true;
            errors.extend(chunk_errors);
        }
        let written: HashSet<&String> = written_ids.iter().collect();

        // Brief generation is serialised to bound provider spend.
        let mut briefs_generated = 0u64;
        let mut tokens = 0u64;
        let mut cost = 0.0f64;
        for article in distribution
            .selected
            .iter()
            .filter(|a| written.contains(&a.id))
        {
            if cancel.is_cancelled() {
                errors.push("batch cancelled before completing all briefs".to_string());
                hard_failure = true;
                break;
            }
            match self.rewriter.rewrite(article, &cancel).await {
                Ok((brief, warnings)) => {
                    errors.extend(warnings);
                    // Nothing persists for an article whose rewrite was
                    // abandoned mid-flight.
                    if cancel.is_cancelled() {
                        errors.push("batch cancelled before completing all briefs".to_string());
                        hard_failure = true;
                        break;
                    }
                    tokens += brief.llm.tokens;
                    cost += brief.llm.cost;
                    match self.store.upsert_briefs(std::slice::from_ref(&brief)).await {
                        Ok(()) => {
                            briefs_generated += 1;
                            counter!("briefs_generated_total").increment(1);
                            if let Err(e) = self
                                .store
                                .mark_brief_generated(std::slice::from_ref(&article.id))
                                .await
                            {
                                errors.push(format!("article {}: flag update: {e}", article.id));
                            }
                        }
                        Err(e) => {
                            hard_failure = true;
                            errors.push(format!("brief {}: persist: {e}", brief.id));
                        }
                    }
                }
                Err(e) => {
                    errors.push(format!("article {}: {e}", article.id));
                }
            }
        }

        let processing_ms = t0.elapsed().as_millis() as u64;
        histogram!("batch_ms").record(processing_ms as f64);

        let result = ProcessingResult {
            success: !hard_failure,
            articles_processed: written_ids.len() as u64,
            briefs_generated,
            errors,
            categories_at_limit: distribution.categories_at_limit,
            processing_ms,
            tokens,
            cost,
        };

        // Exactly one log per batch, best-effort: a logging failure never
        // reaches the batch result.
        let log = ProcessingLog {
            success: result.success,
            articles_processed: result.articles_processed,
            briefs_generated: result.briefs_generated,
            errors: result.errors.clone(),
            processing_ms,
            tokens,
            cost,
            model: self.model.clone(),
            prompt_version: self.prompt_version.clone(),
            timestamp: now,
        };
        if let Err(e) = self.store.append_processing_log(&log).await {
            warn!(error = %e, "processing log emission failed");
        }

        info!(
            articles = result.articles_processed,
            briefs = result.briefs_generated,
            errors = result.errors.len(),
            ms = processing_ms,
            "batch complete"
        );
        result
    }
}
