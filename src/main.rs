//! # Wirebrief — Binary Entrypoint
//! Boots the ingestion poller and batch pipeline: config, store, LLM
//! provider, then the scheduler, until ctrl-c.
//!
//! Environment:
//! - `DATABASE_URL` — Postgres store; without it the in-memory store
//!   (seeded from `config/sources.toml`) backs a local run.
//! - `WIREBRIEF_LLM_API_KEY` / `OPENAI_API_KEY` — chat-completions key;
//!   without one, briefs fall back to the deterministic path.
//! - `WIREBRIEF_CONFIG_PATH`, `WIREBRIEF_SOURCES_PATH` — config overrides.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

use wirebrief::config::{self, PipelineConfig};
use wirebrief::ingest::scheduler;
use wirebrief::pipeline::llm::{ChatProvider, HttpChatProvider, MockChatProvider};
use wirebrief::service::NewsService;
use wirebrief::store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let cfg = PipelineConfig::load_default()?;
    info!(
        profile = %cfg.brief.profile,
        sweep_secs = cfg.sweep_interval_secs,
        batch_secs = cfg.batch_interval_secs,
        "configuration loaded"
    );

    let store: Arc<dyn Store> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            info!("using postgres store");
            Arc::new(PgStore::connect(&url).await?)
        }
        Err(_) => {
            let sources = config::load_sources_default()?;
            if sources.is_empty() {
                warn!("no DATABASE_URL and no config/sources.toml; nothing to poll");
            } else {
                info!(sources = sources.len(), "using in-memory store");
            }
            Arc::new(MemoryStore::with_sources(sources))
        }
    };

    let api_key = std::env::var("WIREBRIEF_LLM_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .unwrap_or_default();
    let provider: Arc<dyn ChatProvider> = if api_key.is_empty() {
        warn!("no LLM api key; briefs will use the deterministic fallback");
        Arc::new(MockChatProvider::unavailable())
    } else {
        Arc::new(HttpChatProvider::new(&cfg.llm, api_key))
    };

    let service = NewsService::new(store, provider, cfg);
    let poller = scheduler::spawn_poller(service.clone());
    info!("wirebrief running; ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    poller.abort();

    let status = service.status();
    info!(
        queued = status.queue_size,
        was_processing = status.is_processing,
        "stopped"
    );
    Ok(())
}
