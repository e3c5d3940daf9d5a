//! Process-wide health record.
//!
//! [`HealthRecord`] holds the two liveness timestamps (last successful
//! keep-alive probe, last processed inbound event), the connection and
//! deployment states, reconnect counters and a bounded error log.
//! [`SharedHealth`] is the cloneable handle the pipeline, supervisor, prober
//! and monitor all mutate.
//!
//! # Health rule
//!
//! The record is healthy iff the *smaller* of the two silences is below the
//! configured maximum, the connection is [`ConnectionState::Connected`] and
//! the deployment is [`DeploymentState::Stable`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

// ── States ─────────────────────────────────────────────────────

/// External session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    AuthFailed,
    /// Reconnect cap exceeded; the process is exiting.
    Failed,
}

/// Whether the hosting platform is redeploying us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Stable,
    InProgress,
    Failed,
}

// ── Error log ──────────────────────────────────────────────────

/// One logged supervisor-level error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    pub source: String,
    pub message: String,
}

/// Ring buffer keeping the most recent `capacity` errors.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    capacity: usize,
    entries: VecDeque<ErrorEntry>,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(256)),
        }
    }

    pub fn push(&mut self, entry: ErrorEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &ErrorEntry> {
        self.entries.iter()
    }
}

// ── Record ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HealthMetrics {
    pub total_reconnects: u64,
    pub error_log: ErrorLog,
    pub last_restart_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub last_probe_success_at: DateTime<Utc>,
    pub last_event_processed_at: DateTime<Utc>,
    pub is_healthy: bool,
    pub connection_state: ConnectionState,
    pub deployment_state: DeploymentState,
    pub reconnect_attempts: u32,
    pub metrics: HealthMetrics,
}

impl HealthRecord {
    /// Fresh record; both liveness timestamps start at `now`.
    pub fn new(now: DateTime<Utc>, error_capacity: usize) -> Self {
        Self {
            last_probe_success_at: now,
            last_event_processed_at: now,
            is_healthy: true,
            connection_state: ConnectionState::Uninitialized,
            deployment_state: DeploymentState::Stable,
            reconnect_attempts: 0,
            metrics: HealthMetrics {
                total_reconnects: 0,
                error_log: ErrorLog::new(error_capacity),
                last_restart_at: None,
            },
        }
    }

    /// The smaller of the probe silence and the event silence.
    pub fn silence(&self, now: DateTime<Utc>) -> Duration {
        let since = |at: DateTime<Utc>| (now - at).to_std().unwrap_or(Duration::ZERO);
        since(self.last_probe_success_at).min(since(self.last_event_processed_at))
    }

    /// Recompute and store `is_healthy`.
    pub fn evaluate(&mut self, now: DateTime<Utc>, max_silence: Duration) -> bool {
        self.is_healthy = self.silence(now) < max_silence
            && self.connection_state == ConnectionState::Connected
            && self.deployment_state == DeploymentState::Stable;
        self.is_healthy
    }
}

// ── Snapshot ───────────────────────────────────────────────────

/// Process memory usage in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetrics {
    pub rss_bytes: Option<u64>,
    pub peak_rss_bytes: Option<u64>,
}

/// Read-only view served on the health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub last_ping: DateTime<Utc>,
    pub last_message: DateTime<Utc>,
    pub connection_state: ConnectionState,
    pub deployment_state: DeploymentState,
    pub reconnect_attempts: u32,
    pub total_reconnects: u64,
    pub last_restart_at: Option<DateTime<Utc>>,
    pub errors: Vec<ErrorEntry>,
    pub memory: MemoryMetrics,
}

impl HealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

// ── Shared handle ──────────────────────────────────────────────

/// Cloneable handle to the single [`HealthRecord`].
///
/// Connection state changes made through the handle are also published on a
/// watch channel so the admission worker can wait for a usable session.
#[derive(Debug, Clone)]
pub struct SharedHealth {
    inner: Arc<Mutex<HealthRecord>>,
    connection: Arc<watch::Sender<ConnectionState>>,
}

impl SharedHealth {
    pub fn new(error_capacity: usize) -> Self {
        let record = HealthRecord::new(Utc::now(), error_capacity);
        let (connection, _) = watch::channel(record.connection_state);
        Self {
            inner: Arc::new(Mutex::new(record)),
            connection: Arc::new(connection),
        }
    }

    /// Follow connection state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Run `f` with the record locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut HealthRecord) -> R) -> R {
        let mut record = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut record)
    }

    pub fn record_event(&self) {
        self.with(|r| r.last_event_processed_at = Utc::now());
    }

    pub fn record_probe_success(&self) {
        self.with(|r| r.last_probe_success_at = Utc::now());
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.with(|r| r.connection_state)
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.with(|r| {
            r.connection_state = state;
            self.connection.send_replace(state);
        });
    }

    pub fn deployment_state(&self) -> DeploymentState {
        self.with(|r| r.deployment_state)
    }

    pub fn set_deployment_state(&self, state: DeploymentState) {
        self.with(|r| r.deployment_state = state);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.with(|r| r.is_healthy = healthy);
    }

    pub fn is_healthy(&self) -> bool {
        self.with(|r| r.is_healthy)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.with(|r| r.reconnect_attempts)
    }

    /// Count one reconnect attempt. Returns the new attempt number.
    pub fn begin_reconnect_attempt(&self) -> u32 {
        self.with(|r| {
            r.reconnect_attempts = r.reconnect_attempts.saturating_add(1);
            r.metrics.total_reconnects = r.metrics.total_reconnects.saturating_add(1);
            r.reconnect_attempts
        })
    }

    /// Session ready: attempts back to zero, connected and healthy.
    pub fn mark_connected(&self) {
        self.with(|r| {
            r.reconnect_attempts = 0;
            r.connection_state = ConnectionState::Connected;
            r.is_healthy = true;
            self.connection.send_replace(ConnectionState::Connected);
        });
    }

    pub fn mark_restart(&self) {
        self.with(|r| r.metrics.last_restart_at = Some(Utc::now()));
    }

    /// Append to the bounded error log.
    pub fn record_error(&self, source: &str, message: impl Into<String>) {
        let entry = ErrorEntry {
            at: Utc::now(),
            source: source.to_owned(),
            message: message.into(),
        };
        self.with(|r| r.metrics.error_log.push(entry));
    }

    /// Re-evaluate health at the current time.
    pub fn evaluate(&self, max_silence: Duration) -> bool {
        self.with(|r| r.evaluate(Utc::now(), max_silence))
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let memory = memory_metrics();
        self.with(|r| HealthSnapshot {
            status: if r.is_healthy { "healthy" } else { "unhealthy" },
            last_ping: r.last_probe_success_at,
            last_message: r.last_event_processed_at,
            connection_state: r.connection_state,
            deployment_state: r.deployment_state,
            reconnect_attempts: r.reconnect_attempts,
            total_reconnects: r.metrics.total_reconnects,
            last_restart_at: r.metrics.last_restart_at,
            errors: r.metrics.error_log.entries().cloned().collect(),
            memory,
        })
    }
}

// ── Memory ─────────────────────────────────────────────────────

/// Current and peak resident set size of this process.
pub fn memory_metrics() -> MemoryMetrics {
    MemoryMetrics {
        rss_bytes: current_rss_bytes(),
        peak_rss_bytes: peak_rss_bytes(),
    }
}

#[cfg(target_os = "linux")]
fn current_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page_size = u64::try_from(page_size).ok()?;
    Some(resident_pages.saturating_mul(page_size))
}

#[cfg(not(target_os = "linux"))]
fn current_rss_bytes() -> Option<u64> {
    None
}

#[cfg(unix)]
fn peak_rss_bytes() -> Option<u64> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if ret != 0 {
        return None;
    }
    // Linux reports kilobytes, macOS bytes.
    let max_rss = u64::try_from(usage.ru_maxrss).ok()?;
    if cfg!(target_os = "macos") {
        Some(max_rss)
    } else {
        Some(max_rss.saturating_mul(1024))
    }
}

#[cfg(not(unix))]
fn peak_rss_bytes() -> Option<u64> {
    None
}
