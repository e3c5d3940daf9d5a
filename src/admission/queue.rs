//! Bounded single-consumer admission queue.
//!
//! Inbound messages are processed strictly one at a time in arrival order by
//! a single worker task. When the queue is full the *oldest* pending entry is
//! evicted and its submitter is told [`SubmitOutcome::Dropped`]; it is never
//! processed.
//!
//! Each message runs on its own task so a panicking collaborator settles that
//! one entry as [`Rule::Failed`] and the worker moves on. When started with a
//! connection gate, the worker only takes entries while the messaging session
//! is [`ConnectionState::Connected`]; capacity eviction still bounds the
//! backlog while it waits.

use crate::admission::policy::Rule;
use crate::channels::traits::InboundMessage;
use crate::supervisor::health::ConnectionState;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a submitted message was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "rule", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Processed; `Rule` says which admission rule settled it.
    Processed(Rule),
    /// Evicted by a newer message while waiting.
    Dropped,
    /// The worker stopped before the message was processed.
    Closed,
}

/// What happened when a message was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueAction {
    Enqueued,
    /// The queue was full and its oldest entry was evicted to make room.
    DroppedOldest,
}

/// Processes one message; implemented by the admission pipeline.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: &InboundMessage) -> Rule;

    /// Called when `process` panicked on `message`.
    fn aborted(&self, message: &InboundMessage, detail: &str) {
        let _ = (message, detail);
    }
}

struct PendingEntry {
    message: InboundMessage,
    done: oneshot::Sender<SubmitOutcome>,
    enqueued_at: Instant,
}

/// Queue counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: bool,
    pub dropped_total: u64,
    pub processed_total: u64,
}

pub struct AdmissionQueue {
    pending: Mutex<VecDeque<PendingEntry>>,
    notify: Notify,
    capacity: usize,
    in_flight: AtomicBool,
    closed: AtomicBool,
    dropped_total: AtomicU64,
    processed_total: AtomicU64,
}

impl AdmissionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
            capacity: capacity.max(1),
            in_flight: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            dropped_total: AtomicU64::new(0),
            processed_total: AtomicU64::new(0),
        }
    }

    /// Add a message, evicting the oldest pending one if the queue is full.
    ///
    /// The receiver resolves once the message is processed, dropped or the
    /// worker stops.
    pub fn enqueue(
        &self,
        message: InboundMessage,
    ) -> (EnqueueAction, oneshot::Receiver<SubmitOutcome>) {
        let (done, rx) = oneshot::channel();
        if self.closed.load(Ordering::Acquire) {
            let _ = done.send(SubmitOutcome::Closed);
            return (EnqueueAction::Enqueued, rx);
        }

        let evicted = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let evicted = if pending.len() >= self.capacity {
                pending.pop_front()
            } else {
                None
            };
            pending.push_back(PendingEntry {
                message,
                done,
                enqueued_at: Instant::now(),
            });
            evicted
        };
        self.notify.notify_one();

        match evicted {
            Some(entry) => {
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sender = %entry.message.sender,
                    message_id = %entry.message.message_id,
                    capacity = self.capacity,
                    "admission queue full, dropped oldest message"
                );
                let _ = entry.done.send(SubmitOutcome::Dropped);
                (EnqueueAction::DroppedOldest, rx)
            }
            None => (EnqueueAction::Enqueued, rx),
        }
    }

    /// Enqueue and wait until the message is settled.
    pub async fn submit(&self, message: InboundMessage) -> SubmitOutcome {
        let (_, rx) = self.enqueue(message);
        rx.await.unwrap_or(SubmitOutcome::Closed)
    }

    pub fn stats(&self) -> QueueStats {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).len();
        QueueStats {
            pending,
            in_flight: self.in_flight.load(Ordering::Acquire),
            dropped_total: self.dropped_total.load(Ordering::Relaxed),
            processed_total: self.processed_total.load(Ordering::Relaxed),
        }
    }

    fn pop(&self) -> Option<PendingEntry> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Worker loop: process entries one at a time until cancelled.
    ///
    /// The next entry is not taken until the current one has fully settled.
    /// On cancellation every still-pending entry resolves as
    /// [`SubmitOutcome::Closed`].
    pub async fn run(self: Arc<Self>, processor: Arc<dyn MessageProcessor>, cancel: CancellationToken) {
        self.run_gated(processor, None, cancel).await;
    }

    /// Like [`run`](Self::run), but entries are only taken while `connection`
    /// reports [`ConnectionState::Connected`].
    pub async fn run_when_connected(
        self: Arc<Self>,
        processor: Arc<dyn MessageProcessor>,
        connection: watch::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) {
        self.run_gated(processor, Some(connection), cancel).await;
    }

    async fn run_gated(
        self: Arc<Self>,
        processor: Arc<dyn MessageProcessor>,
        mut gate: Option<watch::Receiver<ConnectionState>>,
        cancel: CancellationToken,
    ) {
        info!(capacity = self.capacity, gated = gate.is_some(), "admission worker started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(connection) = gate.as_mut() {
                let state = *connection.borrow();
                if state != ConnectionState::Connected {
                    debug!(?state, "admission worker waiting for session");
                }
                let open = tokio::select! {
                    _ = cancel.cancelled() => break,
                    open = async {
                        connection
                            .wait_for(|state| *state == ConnectionState::Connected)
                            .await
                            .is_ok()
                    } => open,
                };
                if !open {
                    warn!("connection state source dropped, admission worker ungated");
                    gate = None;
                }
            }
            if let Some(entry) = self.pop() {
                self.in_flight.store(true, Ordering::Release);
                debug!(
                    sender = %entry.message.sender,
                    waited_ms = entry.enqueued_at.elapsed().as_millis() as u64,
                    "processing message"
                );
                let rule = process_isolated(&processor, &entry.message).await;
                self.in_flight.store(false, Ordering::Release);
                self.processed_total.fetch_add(1, Ordering::Relaxed);
                let _ = entry.done.send(SubmitOutcome::Processed(rule));
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.notify.notified() => {}
            }
        }

        self.closed.store(true, Ordering::Release);
        let remaining: Vec<PendingEntry> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for entry in remaining {
            let _ = entry.done.send(SubmitOutcome::Closed);
        }
        info!("admission worker stopped");
    }

}

/// Run one message on its own task so a panic cannot take the worker down.
async fn process_isolated(processor: &Arc<dyn MessageProcessor>, message: &InboundMessage) -> Rule {
    let task = {
        let processor = Arc::clone(processor);
        let message = message.clone();
        tokio::spawn(async move { processor.process(&message).await })
    };
    match task.await {
        Ok(rule) => rule,
        Err(e) => {
            let detail = join_error_detail(e);
            error!(
                sender = %message.sender,
                message_id = %message.message_id,
                %detail,
                "message processing aborted"
            );
            processor.aborted(message, &detail);
            Rule::Failed
        }
    }
}

fn join_error_detail(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic".to_owned()
    }
}
