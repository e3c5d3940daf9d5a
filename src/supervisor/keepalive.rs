//! Keep-alive prober.
//!
//! Periodically GETs a configured URL so the hosting platform keeps the
//! process warm, and feeds the result into the shared health record.
//!
//! # Outcomes
//!
//! - [`ProbeOutcome::Reachable`]: any status in `[200, 500)`. Refreshes the
//!   probe timestamp, resets the failure counter and ends a deployment.
//! - [`ProbeOutcome::Deploying`]: the configured deployment status (502).
//!   The first one flips the deployment state to `in_progress` and arms a
//!   timer; if the timer fires while still in progress the state becomes
//!   `failed` and a restart is requested. Never counted as a failure.
//! - [`ProbeOutcome::Unreachable`]: anything else, including transport
//!   errors. Counted, retried with exponential backoff, and escalated to a
//!   restart once the counter exceeds the configured maximum.

use crate::config::KeepAliveConfig;
use crate::supervisor::backoff::Backoff;
use crate::supervisor::connection::{ConnectionSupervisor, RestartOutcome};
use crate::supervisor::health::{DeploymentState, SharedHealth};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ── Classification ─────────────────────────────────────────────

/// Result of one probe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable(u16),
    Deploying,
    Unreachable(String),
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reachable(status) => write!(f, "reachable (HTTP {status})"),
            Self::Deploying => write!(f, "deployment in progress"),
            Self::Unreachable(detail) => write!(f, "unreachable: {detail}"),
        }
    }
}

/// Map an HTTP status to a probe outcome.
pub fn classify_status(status: u16, deployment_status: u16) -> ProbeOutcome {
    if status == deployment_status {
        ProbeOutcome::Deploying
    } else if (200..500).contains(&status) {
        ProbeOutcome::Reachable(status)
    } else {
        ProbeOutcome::Unreachable(format!("HTTP {status}"))
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> ProbeOutcome {
    if err.is_timeout() {
        ProbeOutcome::Unreachable("timeout".to_owned())
    } else if err.is_connect() {
        ProbeOutcome::Unreachable(format!("connection failed: {err}"))
    } else {
        ProbeOutcome::Unreachable(format!("transport error: {err}"))
    }
}

/// What the prober did with an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeAction {
    /// Reachable; counters reset.
    Recorded,
    /// Deployment signal; `started_timer` is true for the first one.
    DeploymentPending { started_timer: bool },
    /// Failure below the threshold; retry after the backoff.
    Retry { failures: u32 },
    /// Failure threshold exceeded; a restart was requested.
    Escalated(RestartOutcome),
}

// ── Prober ─────────────────────────────────────────────────────

struct DeploymentTimer {
    generation: u64,
    cancel: CancellationToken,
}

pub struct KeepAliveProber {
    client: reqwest::Client,
    url: String,
    health: SharedHealth,
    supervisor: Arc<ConnectionSupervisor>,
    interval: Duration,
    max_failures: u32,
    retry_backoff: Backoff,
    deployment_status: u16,
    deployment_timeout: Duration,
    failures: AtomicU32,
    deployment_timer: Mutex<Option<DeploymentTimer>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl KeepAliveProber {
    pub fn new(
        config: &KeepAliveConfig,
        health: SharedHealth,
        supervisor: Arc<ConnectionSupervisor>,
        shutdown: CancellationToken,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: config.url.clone(),
            health,
            supervisor,
            interval: Duration::from_millis(config.interval_ms),
            max_failures: config.max_failures,
            retry_backoff: Backoff {
                base: Duration::from_millis(config.retry_base_delay_ms),
                growth: 2.0,
                max_jitter: Duration::ZERO,
                max: Duration::from_millis(config.retry_max_delay_ms),
            },
            deployment_status: config.deployment_status,
            deployment_timeout: Duration::from_millis(config.deployment_timeout_ms),
            failures: AtomicU32::new(0),
            deployment_timer: Mutex::new(None),
            next_generation: AtomicU64::new(0),
            shutdown,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Issue one probe request.
    pub async fn probe_once(&self) -> ProbeOutcome {
        match self.client.get(&self.url).send().await {
            Ok(resp) => classify_status(resp.status().as_u16(), self.deployment_status),
            Err(e) => classify_reqwest_error(&e),
        }
    }

    /// Apply one outcome to the health record and counters.
    pub async fn handle_outcome(self: &Arc<Self>, outcome: ProbeOutcome) -> ProbeAction {
        match outcome {
            ProbeOutcome::Reachable(status) => {
                debug!(status, "keep-alive probe ok");
                self.health.record_probe_success();
                self.failures.store(0, Ordering::Release);
                if self.health.deployment_state() != DeploymentState::Stable {
                    info!("deployment finished, back to stable");
                    self.health.set_deployment_state(DeploymentState::Stable);
                }
                self.cancel_deployment_timer();
                ProbeAction::Recorded
            }
            ProbeOutcome::Deploying => {
                if self.health.deployment_state() == DeploymentState::InProgress {
                    debug!("deployment still in progress");
                    return ProbeAction::DeploymentPending {
                        started_timer: false,
                    };
                }
                info!(
                    timeout_ms = self.deployment_timeout.as_millis() as u64,
                    "deployment in progress"
                );
                self.health.set_deployment_state(DeploymentState::InProgress);
                self.start_deployment_timer();
                ProbeAction::DeploymentPending {
                    started_timer: true,
                }
            }
            ProbeOutcome::Unreachable(detail) => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(url = %self.url, failures, %detail, "keep-alive probe failed");
                self.health
                    .record_error("keepalive", format!("probe failed: {detail}"));
                if failures > self.max_failures {
                    error!(failures, "keep-alive failures exceeded, restarting services");
                    self.failures.store(0, Ordering::Release);
                    ProbeAction::Escalated(self.supervisor.restart_services().await)
                } else {
                    ProbeAction::Retry { failures }
                }
            }
        }
    }

    /// Probe, retrying failures with backoff until success, a deployment
    /// signal, escalation or shutdown.
    pub async fn run_cycle(self: &Arc<Self>) -> ProbeAction {
        loop {
            let outcome = self.probe_once().await;
            let action = self.handle_outcome(outcome).await;
            let ProbeAction::Retry { failures } = action else {
                return action;
            };
            let delay = self.retry_backoff.delay(failures);
            debug!(delay_ms = delay.as_millis() as u64, "retrying keep-alive probe");
            tokio::select! {
                _ = self.shutdown.cancelled() => return action,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Spawn the probe loop: one cycle immediately, then one per interval.
    pub fn run(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(url = %self.url, interval_ms = self.interval.as_millis() as u64, "keep-alive started");
            loop {
                self.run_cycle().await;
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
            self.cancel_deployment_timer();
            info!("keep-alive stopped");
        })
    }

    fn start_deployment_timer(self: &Arc<Self>) {
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = self.shutdown.child_token();
        {
            let mut slot = self.deployment_timer.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = slot.replace(DeploymentTimer {
                generation,
                cancel: cancel.clone(),
            }) {
                previous.cancel.cancel();
            }
        }

        let prober = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(prober.deployment_timeout) => {
                    prober.deployment_timed_out(generation).await;
                }
            }
        });
    }

    fn cancel_deployment_timer(&self) {
        let timer = self
            .deployment_timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(timer) = timer {
            timer.cancel.cancel();
        }
    }

    async fn deployment_timed_out(&self, generation: u64) {
        let current = {
            let mut slot = self.deployment_timer.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(timer) if timer.generation == generation => {
                    slot.take();
                    true
                }
                _ => false,
            }
        };
        if !current || self.health.deployment_state() != DeploymentState::InProgress {
            return;
        }
        error!(
            timeout_ms = self.deployment_timeout.as_millis() as u64,
            "deployment did not finish in time, restarting services"
        );
        self.health.set_deployment_state(DeploymentState::Failed);
        self.health.record_error("keepalive", "deployment timed out");
        self.supervisor.restart_services().await;
    }
}

#[cfg(test)]
#[path = "keepalive_tests.rs"]
mod keepalive_tests;
