// src/service.rs
//! Service assembly and the control surface exposed to outer glue:
//! manual batch trigger, breaker reset, status, daily limits. The
//! dependency graph is built once here; components receive collaborators
//! explicitly instead of reaching into globals.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::domain::{Article, ProcessingResult, Source};
use crate::ingest::breaker::{BreakerRegistry, CircuitState};
use crate::ingest::fetcher::FeedFetcher;
use crate::ingest::holding::HoldingQueue;
use crate::ingest::{self, novelty};
use crate::pipeline::llm::ChatProvider;
use crate::pipeline::quota::{self, DailyLimits};
use crate::pipeline::BatchRunner;
use crate::store::Store;

/// Upper bound on concurrent source fetches within one sweep.
const SWEEP_WORKERS: usize = 8;

#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub is_processing: bool,
    pub queue_size: usize,
    pub last_processed: Option<DateTime<Utc>>,
    pub circuit_snapshot: HashMap<String, CircuitState>,
}

pub struct NewsService {
    store: Arc<dyn Store>,
    fetcher: FeedFetcher,
    breakers: BreakerRegistry,
    queue: HoldingQueue,
    runner: BatchRunner,
    cfg: PipelineConfig,
    is_processing: AtomicBool,
    last_processed: Mutex<Option<DateTime<Utc>>>,
}

impl NewsService {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn ChatProvider>,
        cfg: PipelineConfig,
    ) -> Arc<Self> {
        ingest::ensure_metrics_described();
        Arc::new(Self {
            queue: HoldingQueue::new(cfg.holding_high_water()),
            runner: BatchRunner::new(store.clone(), provider, cfg.clone()),
            store,
            fetcher: FeedFetcher::new(),
            breakers: BreakerRegistry::new(),
            cfg,
            is_processing: AtomicBool::new(false),
            last_processed: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// One pass over all active sources, fanned out over a bounded worker
    /// set, feeding novel items into the holding queue.
    pub async fn run_sweep(&self) {
        let sources = match self.store.active_sources().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "sweep aborted: source listing failed");
                return;
            }
        };
        if sources.is_empty() {
            return;
        }
        let workers = sources.len().min(SWEEP_WORKERS);
        stream::iter(sources)
            .map(|src| self.sweep_source(src))
            .buffer_unordered(workers)
            .collect::<Vec<_>>()
            .await;
        counter!("sweep_runs_total").increment(1);
        debug!(queued = self.queue.size(), "sweep tick");
    }

    async fn sweep_source(&self, source: Source) {
        if !self.breakers.admit(&source.id) {
            debug!(source = %source.id, "skipped by open circuit");
            return;
        }
        match self.fetcher.fetch(&source).await {
            Ok(page) => {
                if let Err(e) = self
                    .store
                    .update_source_probe(&source.id, page.fetched_at, None)
                    .await
                {
                    warn!(source = %source.id, error = %e, "probe update failed");
                }
                self.breakers.record_success(&source.id);

                let mut novel = Vec::new();
                for item in &page.items {
                    let article = Article::capture(item, &source, page.fetched_at);
                    if article.url.is_empty() {
                        continue;
                    }
                    if novelty::is_new(&*self.store, &article.url, &article.title).await {
                        novel.push(article);
                    }
                }
                if !novel.is_empty() {
                    debug!(source = %source.id, novel = novel.len(), "novel items queued");
                    self.queue.enqueue(novel);
                }
            }
            Err(e) => {
                warn!(source = %source.id, kind = e.kind(), error = %e, "fetch failed");
                if let Err(pe) = self
                    .store
                    .update_source_probe(&source.id, Utc::now(), Some(&e.to_string()))
                    .await
                {
                    warn!(source = %source.id, error = %pe, "probe update failed");
                }
                self.breakers.record_failure(&source.id);
            }
        }
    }

    /// Run a batch unless one is already in flight; an in-flight batch
    /// makes this a no-op reporting the skip (manual triggers share the
    /// scheduler's semantics).
    pub async fn run_batch(&self) -> ProcessingResult {
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            counter!("batch_skipped_total").increment(1);
            info!("batch tick skipped: one already in flight");
            return ProcessingResult::skipped("batch already in flight");
        }

        counter!("batch_runs_total").increment(1);
        let drained = self.queue.drain();
        info!(drained = drained.len(), "batch started");

        // Batch-wide deadline: the watchdog cancels the token, in-flight
        // LLM work is abandoned, and already-persisted briefs stay.
        let cancel = CancellationToken::new();
        let watchdog = {
            let cancel = cancel.clone();
            let deadline = self.cfg.batch_deadline();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!("batch deadline reached, cancelling");
                cancel.cancel();
            })
        };
        let result = self.runner.run(drained, cancel).await;
        watchdog.abort();

        *self
            .last_processed
            .lock()
            .expect("last_processed mutex poisoned") = Some(Utc::now());
        self.is_processing.store(false, Ordering::SeqCst);
        result
    }

    pub async fn trigger_manual_batch(&self) -> ProcessingResult {
        self.run_batch().await
    }

    pub fn reset_circuit_breaker(&self, source_id: &str) {
        info!(source = source_id, "circuit breaker reset");
        self.breakers.reset(source_id);
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            is_processing: self.is_processing.load(Ordering::SeqCst),
            queue_size: self.queue.size(),
            last_processed: *self
                .last_processed
                .lock()
                .expect("last_processed mutex poisoned"),
            circuit_snapshot: self.breakers.snapshot(),
        }
    }

    pub async fn daily_limits_snapshot(&self) -> Result<DailyLimits> {
        quota::daily_limits(&*self.store, &self.cfg, Utc::now()).await
    }

    /// Resolves when the holding queue has flagged breaking news since
    /// the last drain.
    pub async fn preempted(&self) {
        self.queue.preempted().await;
    }
}
