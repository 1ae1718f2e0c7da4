// src/ingest/scheduler.rs
//! The poller: one task, two cadences. Sweeps run inline every 30 s
//! (first one 5 s after startup); batches fire every 30 min on their own
//! spawned task so a slow sweep never delays them. A preemption signal
//! from the holding queue starts a batch early; the in-flight guard in
//! the service turns overlapping ticks into skips.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::service::NewsService;

pub fn spawn_poller(svc: Arc<NewsService>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cfg = svc.config().clone();
        tokio::time::sleep(cfg.startup_delay()).await;

        let mut sweep = tokio::time::interval(cfg.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first batch waits a full interval; sweeps need time to fill
        // the queue.
        let mut batch = tokio::time::interval_at(
            tokio::time::Instant::now() + cfg.batch_interval(),
            cfg.batch_interval(),
        );
        batch.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            sweep_secs = cfg.sweep_interval_secs,
            batch_secs = cfg.batch_interval_secs,
            "poller started"
        );

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    svc.run_sweep().await;
                }
                _ = batch.tick() => {
                    let svc = svc.clone();
                    tokio::spawn(async move {
                        svc.run_batch().await;
                    });
                }
                _ = svc.preempted() => {
                    info!("preemption signal received, starting batch early");
                    let svc = svc.clone();
                    tokio::spawn(async move {
                        svc.run_batch().await;
                    });
                }
            }
        }
    })
}
