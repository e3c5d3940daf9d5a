//! Periodic health evaluation.
//!
//! Every tick re-evaluates the shared [`HealthRecord`](super::health::HealthRecord)
//! and asks the supervisor for a restart when it is unhealthy, unless a
//! reconnection or restart is already running or a deployment is in
//! progress (the deployment timer owns that escalation).

use crate::config::HealthConfig;
use crate::supervisor::connection::{ConnectionSupervisor, RestartOutcome};
use crate::supervisor::health::{DeploymentState, SharedHealth};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one monitor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    Healthy,
    /// Unhealthy, but a reconnection or restart is already running.
    SkippedRecovering,
    /// Unhealthy because of a redeploy in progress.
    SkippedDeployment,
    Restarted(RestartOutcome),
}

pub struct HealthMonitor {
    health: SharedHealth,
    supervisor: Arc<ConnectionSupervisor>,
    interval: Duration,
    max_silence: Duration,
}

impl HealthMonitor {
    pub fn new(
        health: SharedHealth,
        supervisor: Arc<ConnectionSupervisor>,
        config: &HealthConfig,
    ) -> Self {
        Self {
            health,
            supervisor,
            interval: Duration::from_millis(config.check_interval_ms),
            max_silence: Duration::from_millis(config.max_silence_ms),
        }
    }

    pub async fn tick(&self) -> MonitorAction {
        if self.health.evaluate(self.max_silence) {
            debug!("health check passed");
            return MonitorAction::Healthy;
        }
        if self.health.deployment_state() == DeploymentState::InProgress {
            info!("unhealthy during deployment, leaving it to the deployment timer");
            return MonitorAction::SkippedDeployment;
        }
        if self.supervisor.is_recovering() {
            info!("unhealthy, recovery already in progress");
            return MonitorAction::SkippedRecovering;
        }
        warn!("system looks inactive, restarting services");
        MonitorAction::Restarted(self.supervisor.restart_services().await)
    }

    /// Spawn the monitor loop. The first check runs one interval after start.
    pub fn run(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, "health monitor started");
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + self.interval,
                self.interval,
            );
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
            info!("health monitor stopped");
        })
    }
}
