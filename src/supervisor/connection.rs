//! Connection supervisor for the external messaging session.
//!
//! Owns the session lifecycle: initialize, react to disconnect and
//! auth-failure events, reconnect with exponential backoff and jitter, and
//! restart the whole session on request from the health monitor or the
//! keep-alive prober.
//!
//! Two outcomes are fatal and end the process through [`ProcessControl`]:
//! exceeding the reconnect attempt cap, and a failed restart. An external
//! process manager is expected to start us again.

use crate::channels::traits::{DisconnectReason, SessionDriver, SessionEvent};
use crate::config::SupervisorConfig;
use crate::supervisor::backoff::Backoff;
use crate::supervisor::health::{ConnectionState, SharedHealth};
use crate::supervisor::session_store::CredentialStore;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit code used for every fatal supervisor outcome.
pub const FATAL_EXIT_CODE: i32 = 1;

/// Process termination seam.
pub trait ProcessControl: Send + Sync {
    fn terminate(&self, code: i32);
}

/// Exits the real process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExitProcess;

impl ProcessControl for ExitProcess {
    fn terminate(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Why a reconnection loop was entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectReason {
    InitialFailure,
    Disconnected(DisconnectReason),
    AuthFailure,
}

impl fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitialFailure => write!(f, "INITIAL_FAILURE"),
            Self::Disconnected(reason) => write!(f, "{reason}"),
            Self::AuthFailure => write!(f, "AUTH_FAILURE"),
        }
    }
}

/// How a reconnection request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// `initialize()` succeeded; readiness follows as a [`SessionEvent::Ready`].
    Initialized,
    /// Another reconnection loop was already running.
    AlreadyReconnecting,
    /// Attempt cap reached; the process was told to terminate.
    GaveUp,
    /// Shutdown interrupted the backoff sleep.
    Cancelled,
}

/// How a restart request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    Restarted,
    AlreadyRestarting,
    /// Teardown or re-initialization failed; the process was told to terminate.
    Failed,
}

/// Reconnection tuning derived from [`SupervisorConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub clear_credentials_after: u32,
    pub restart_pause: Duration,
}

impl From<&SupervisorConfig> for SupervisorSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            backoff: Backoff {
                base: Duration::from_millis(config.reconnect_base_delay_ms),
                growth: config.reconnect_growth_factor,
                max_jitter: Duration::from_millis(config.reconnect_jitter_ms),
                max: Duration::from_millis(config.reconnect_max_delay_ms),
            },
            clear_credentials_after: config.clear_credentials_after_attempts,
            restart_pause: Duration::from_millis(config.restart_pause_ms),
        }
    }
}

/// Resets a guard flag when dropped.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ConnectionSupervisor {
    driver: Arc<dyn SessionDriver>,
    credentials: Arc<dyn CredentialStore>,
    health: SharedHealth,
    process: Arc<dyn ProcessControl>,
    settings: SupervisorSettings,
    reconnecting: AtomicBool,
    restarting: AtomicBool,
    shutdown: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(
        driver: Arc<dyn SessionDriver>,
        credentials: Arc<dyn CredentialStore>,
        health: SharedHealth,
        process: Arc<dyn ProcessControl>,
        settings: SupervisorSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            driver,
            credentials,
            health,
            process,
            settings,
            reconnecting: AtomicBool::new(false),
            restarting: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn health(&self) -> &SharedHealth {
        &self.health
    }

    /// Whether a reconnection loop or restart is running.
    pub fn is_recovering(&self) -> bool {
        self.reconnecting.load(Ordering::Acquire) || self.restarting.load(Ordering::Acquire)
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start the session; a failure enters the reconnection loop.
    pub async fn initialize(&self) -> Option<ReconnectOutcome> {
        self.health.set_connection_state(ConnectionState::Connecting);
        info!(driver = self.driver.id(), "initializing session");
        match self.driver.initialize().await {
            Ok(()) => None,
            Err(e) => {
                error!(error = %e, "initial session start failed");
                self.health
                    .record_error("supervisor", format!("initialize failed: {e}"));
                Some(self.handle_reconnection(ReconnectReason::InitialFailure).await)
            }
        }
    }

    /// React to one session event.
    pub async fn handle_event(&self, event: SessionEvent) -> Option<ReconnectOutcome> {
        match event {
            SessionEvent::Ready => {
                info!("session ready");
                self.health.mark_connected();
                None
            }
            SessionEvent::Disconnected(reason) => {
                warn!(%reason, "session disconnected");
                self.health.set_connection_state(ConnectionState::Disconnected);
                self.health
                    .record_error("session", format!("disconnected: {reason}"));
                if reason.invalidates_session() {
                    self.clear_credentials().await;
                }
                Some(
                    self.handle_reconnection(ReconnectReason::Disconnected(reason))
                        .await,
                )
            }
            SessionEvent::AuthFailure(detail) => {
                warn!(%detail, "session authentication failed");
                self.health.set_connection_state(ConnectionState::AuthFailed);
                self.health
                    .record_error("session", format!("auth failure: {detail}"));
                // A rejected session is never reused, even when a reconnection
                // loop is already running.
                self.clear_credentials().await;
                Some(self.handle_reconnection(ReconnectReason::AuthFailure).await)
            }
        }
    }

    /// Consume session events until the channel closes or shutdown.
    ///
    /// `Ready` is applied inline; disconnect handling runs on its own task so
    /// a later `Ready` is never stuck behind a backoff sleep.
    pub async fn run_events(
        self: Arc<Self>,
        mut events: mpsc::Receiver<SessionEvent>,
    ) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if event == SessionEvent::Ready {
                self.handle_event(event).await;
            } else {
                let supervisor = Arc::clone(&self);
                tokio::spawn(async move {
                    supervisor.handle_event(event).await;
                });
            }
        }
        info!("session event loop stopped");
    }

    /// Bounded reconnection loop.
    ///
    /// Each pass checks the cap, counts an attempt, optionally clears
    /// credentials, sleeps the backoff delay and calls `initialize()`.
    pub async fn handle_reconnection(&self, reason: ReconnectReason) -> ReconnectOutcome {
        let Some(_guard) = FlagGuard::acquire(&self.reconnecting) else {
            info!(%reason, "reconnection already in progress");
            return ReconnectOutcome::AlreadyReconnecting;
        };

        let mut reason = reason;
        loop {
            let attempts = self.health.reconnect_attempts();
            if attempts >= self.settings.max_attempts {
                error!(
                    attempts,
                    max = self.settings.max_attempts,
                    "reconnect attempts exhausted, terminating"
                );
                self.health.set_connection_state(ConnectionState::Failed);
                self.health.set_healthy(false);
                self.health
                    .record_error("supervisor", "reconnect attempts exhausted");
                if let Err(e) = self.driver.destroy().await {
                    warn!(error = %e, "session cleanup before exit failed");
                }
                self.process.terminate(FATAL_EXIT_CODE);
                return ReconnectOutcome::GaveUp;
            }

            let attempt = self.health.begin_reconnect_attempt();
            self.health.set_connection_state(ConnectionState::Reconnecting);

            if attempt > self.settings.clear_credentials_after {
                self.clear_credentials().await;
            }

            let delay = self.settings.backoff.delay(attempt);
            info!(
                %reason,
                attempt,
                max = self.settings.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => return ReconnectOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.driver.initialize().await {
                Ok(()) => return ReconnectOutcome::Initialized,
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    self.health
                        .record_error("supervisor", format!("reconnect attempt {attempt}: {e}"));
                    reason = ReconnectReason::InitialFailure;
                }
            }
        }
    }

    /// Tear down and re-create the session.
    ///
    /// Only one restart runs at a time. A failure in teardown or
    /// re-initialization terminates the process.
    pub async fn restart_services(&self) -> RestartOutcome {
        let Some(_guard) = FlagGuard::acquire(&self.restarting) else {
            info!("restart already in progress");
            return RestartOutcome::AlreadyRestarting;
        };

        warn!("restarting session services");
        self.health.mark_restart();
        self.health.set_connection_state(ConnectionState::Connecting);

        let result = async {
            self.driver
                .destroy()
                .await
                .map_err(|e| format!("destroy failed: {e}"))?;
            self.credentials
                .clear()
                .await
                .map_err(|e| format!("credential clear failed: {e}"))?;
            tokio::time::sleep(self.settings.restart_pause).await;
            self.driver
                .initialize()
                .await
                .map_err(|e| format!("initialize failed: {e}"))
        }
        .await;

        match result {
            Ok(()) => {
                info!("session services restarted");
                RestartOutcome::Restarted
            }
            Err(detail) => {
                error!(%detail, "restart failed, terminating");
                self.health.set_connection_state(ConnectionState::Failed);
                self.health.set_healthy(false);
                self.health.record_error("supervisor", format!("restart: {detail}"));
                self.process.terminate(FATAL_EXIT_CODE);
                RestartOutcome::Failed
            }
        }
    }

    /// Graceful stop: cancel loops and destroy the session.
    ///
    /// Credentials are kept so the next start resumes without a new login.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Err(e) = self.driver.destroy().await {
            warn!(error = %e, "session destroy during shutdown failed");
        }
        self.health.set_connection_state(ConnectionState::Disconnected);
        info!("session shut down");
    }

    async fn clear_credentials(&self) {
        if let Err(e) = self.credentials.clear().await {
            warn!(error = %e, "clearing session credentials failed");
            self.health.record_error("credentials", e.to_string());
        }
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod connection_tests;
