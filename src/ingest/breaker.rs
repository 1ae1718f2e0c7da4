// src/ingest/breaker.rs
//! Per-source circuit breakers. A source trips open after five straight
//! failures and stays closed to traffic for five minutes; the next admit
//! after the quiet period discards the entry so the following fetch acts
//! as the probe. Success or an administrative reset clears the entry.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

pub const FAILURE_THRESHOLD: u32 = 5;
pub const COOLDOWN_MS: i64 = 300_000;

/// Invariant: at most one entry per source id; an absent entry means
/// closed.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitState {
    pub failures: u32,
    pub last_failure_ms: i64,
    pub open: bool,
}

#[derive(Default)]
pub struct BreakerRegistry {
    inner: Mutex<HashMap<String, CircuitState>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, source_id: &str) -> bool {
        self.admit_at(source_id, Utc::now().timestamp_millis())
    }

    pub fn admit_at(&self, source_id: &str, now_ms: i64) -> bool {
        let mut map = self.inner.lock().expect("breaker mutex poisoned");
        match map.get(source_id) {
            None => true,
            Some(state) if !state.open => true,
            Some(state) => {
                if now_ms - state.last_failure_ms > COOLDOWN_MS {
                    // Quiet period elapsed: drop the entry and let the next
                    // fetch act as the probe.
                    map.remove(source_id);
                    debug!(source = source_id, "breaker cooled down, probing");
                    true
                } else {
                    counter!("breaker_skips_total").increment(1);
                    false
                }
            }
        }
    }

    pub fn record_failure(&self, source_id: &str) {
        self.record_failure_at(source_id, Utc::now().timestamp_millis())
    }

    pub fn record_failure_at(&self, source_id: &str, now_ms: i64) {
        let mut map = self.inner.lock().expect("breaker mutex poisoned");
        let state = map.entry(source_id.to_string()).or_insert(CircuitState {
            failures: 0,
            last_failure_ms: now_ms,
            open: false,
        });
        state.failures += 1;
        state.last_failure_ms = now_ms;
        if state.failures >= FAILURE_THRESHOLD && !state.open {
            state.open = true;
            counter!("breaker_open_total").increment(1);
            warn!(source = source_id, failures = state.failures, "circuit opened");
        }
    }

    pub fn record_success(&self, source_id: &str) {
        let mut map = self.inner.lock().expect("breaker mutex poisoned");
        if map.remove(source_id).is_some() {
            debug!(source = source_id, "circuit closed after success");
        }
    }

    /// Administrative override: unconditionally forget the source.
    pub fn reset(&self, source_id: &str) {
        let mut map = self.inner.lock().expect("breaker mutex poisoned");
        map.remove(source_id);
    }

    pub fn snapshot(&self) -> HashMap<String, CircuitState> {
        self.inner.lock().expect("breaker mutex poisoned").clone()
    }
}
