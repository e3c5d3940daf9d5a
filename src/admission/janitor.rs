//! Periodic sweeper for the per-sender admission maps.
//!
//! Rate counters are kept for two windows, repeat trackers for one, seen
//! message ids for their configured retention; expired cooldowns always go.
//! Pauses are owned by their expiry timers and are left alone. Each tick also
//! drops generator conversations that have sat idle too long.

use crate::admission::state::{SenderStateStore, SweepLimits, SweepReport};
use crate::config::{AdmissionConfig, JanitorConfig};
use crate::generator::ResponseGenerator;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result of an on-demand reclaim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimReport {
    pub swept: SweepReport,
    pub context_entries: usize,
}

pub struct Janitor {
    state: Arc<Mutex<SenderStateStore>>,
    generator: Arc<dyn ResponseGenerator>,
    limits: SweepLimits,
    interval: Duration,
    context_idle: Duration,
}

impl Janitor {
    pub fn new(
        state: Arc<Mutex<SenderStateStore>>,
        generator: Arc<dyn ResponseGenerator>,
        admission: &AdmissionConfig,
        config: &JanitorConfig,
    ) -> Self {
        let window = admission.rate_window();
        Self {
            state,
            generator,
            limits: SweepLimits {
                rate_retention: window * 2,
                repeat_retention: window,
                seen_id_retention: admission.seen_id_retention(),
            },
            interval: Duration::from_millis(config.interval_ms.max(1)),
            context_idle: config.context_idle(),
        }
    }

    pub fn limits(&self) -> SweepLimits {
        self.limits
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> SweepReport {
        let report = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sweep(Instant::now(), self.limits);
        if report.total() > 0 {
            debug!(
                rate_counters = report.rate_counters,
                repeat_trackers = report.repeat_trackers,
                cooldowns = report.cooldowns,
                seen_ids = report.seen_ids,
                "swept stale sender state"
            );
        }
        report
    }

    /// Drop idle generator conversations.
    pub fn sweep_contexts(&self) -> usize {
        let dropped = self.generator.sweep_idle_context(self.context_idle);
        if dropped > 0 {
            debug!(dropped, "swept idle conversation context");
        }
        dropped
    }

    /// Sweep and drop the generator's conversation context.
    pub fn reclaim(&self) -> ReclaimReport {
        let swept = self.sweep();
        let context_entries = self.generator.trim_context();
        info!(
            swept = swept.total(),
            context_entries, "reclaimed sender state and generator context"
        );
        ReclaimReport {
            swept,
            context_entries,
        }
    }

    /// Spawn the sweep loop; the first sweep runs one interval after start.
    pub fn run(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + self.interval,
                self.interval,
            );
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.sweep();
                        self.sweep_contexts();
                    }
                }
            }
            debug!("janitor stopped");
        })
    }
}
