//! Per-message admission processing.
//!
//! [`AdmissionPipeline`] is the single consumer behind the
//! [`AdmissionQueue`](super::queue::AdmissionQueue). For each message it
//! skips redelivered ids, evaluates the admission rules, sends at most one
//! reply, arms pause expiry timers and calls the response generator when no
//! rule short-circuits. Every failure on this path ends in a templated reply
//! or a log line; nothing propagates to the worker.

use crate::admission::policy::{AdmissionPolicy, Rule, Verdict};
use crate::admission::queue::MessageProcessor;
use crate::admission::replies;
use crate::admission::state::{PauseReason, PauseTicket, SenderStateStore};
use crate::channels::traits::{InboundMessage, MessagingClient};
use crate::generator::{GenerateError, ResponseGenerator, generate_with_retry};
use crate::supervisor::health::SharedHealth;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Generator call settings.
#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub timeout: Duration,
    pub max_timeout_retries: u32,
}

pub struct AdmissionPipeline {
    policy: AdmissionPolicy,
    state: Arc<Mutex<SenderStateStore>>,
    messenger: Arc<dyn MessagingClient>,
    generator: Arc<dyn ResponseGenerator>,
    health: SharedHealth,
    generation: GenerationSettings,
    shutdown: CancellationToken,
}

impl AdmissionPipeline {
    pub fn new(
        policy: AdmissionPolicy,
        state: Arc<Mutex<SenderStateStore>>,
        messenger: Arc<dyn MessagingClient>,
        generator: Arc<dyn ResponseGenerator>,
        health: SharedHealth,
        generation: GenerationSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            policy,
            state,
            messenger,
            generator,
            health,
            generation,
            shutdown,
        }
    }

    pub fn state(&self) -> &Arc<Mutex<SenderStateStore>> {
        &self.state
    }

    pub fn generator(&self) -> &Arc<dyn ResponseGenerator> {
        &self.generator
    }

    /// Process one message and record the event in the health record.
    pub async fn process_message(&self, message: &InboundMessage) -> Rule {
        let rule = self.admit(message).await;
        self.health.record_event();
        debug!(sender = %message.sender, ?rule, "message settled");
        rule
    }

    async fn admit(&self, message: &InboundMessage) -> Rule {
        let verdict = {
            let mut store = self.lock_state();
            let now = Instant::now();
            if !store.mark_seen(&message.message_id, now) {
                None
            } else {
                Some(self.policy.evaluate(&mut store, message, now))
            }
        };
        let Some(verdict) = verdict else {
            info!(message_id = %message.message_id, "duplicate delivery ignored");
            return Rule::Duplicate;
        };

        if let Some(ticket) = verdict.pause_ticket() {
            self.schedule_pause_expiry(ticket.clone());
        }

        match &verdict {
            Verdict::Generate { purchase_intent } => {
                self.generate_reply(message, *purchase_intent).await
            }
            _ => {
                if let Some(reply) = verdict.canned_reply() {
                    self.reply(&message.sender, &reply).await;
                } else {
                    debug!(sender = %message.sender, rule = ?verdict.rule(), "silent stop");
                }
                verdict.rule()
            }
        }
    }

    async fn generate_reply(&self, message: &InboundMessage, purchase_intent: bool) -> Rule {
        let result = generate_with_retry(
            self.generator.as_ref(),
            &message.text,
            &message.sender,
            self.generation.timeout,
            self.generation.max_timeout_retries,
        )
        .await;

        match result {
            Ok(text) => {
                let reply = if purchase_intent {
                    replies::with_purchase_footer(&text)
                } else {
                    text
                };
                self.reply(&message.sender, &reply).await;
                Rule::Generated
            }
            Err(GenerateError::Timeout(after)) => {
                warn!(sender = %message.sender, ?after, "response generation timed out");
                self.reply(&message.sender, replies::TIMEOUT).await;
                Rule::GenerationTimedOut
            }
            Err(GenerateError::Failed(detail)) => {
                warn!(sender = %message.sender, %detail, "response generation failed");
                self.reply(&message.sender, replies::ERROR).await;
                Rule::GenerationFailed
            }
        }
    }

    async fn reply(&self, to: &str, text: &str) {
        if let Err(e) = self.messenger.send(to, text).await {
            warn!(to, error = %e, "reply dispatch failed");
            self.health
                .record_error("messaging", format!("reply to {to} failed: {e}"));
        }
    }

    // ── Operator controls ──────────────────────────────────────────

    /// Freeze a sender: paused without the human-handoff flag, same expiry.
    pub fn pause_sender(&self, sender: &str) -> PauseTicket {
        let ticket = self.lock_state().pause(
            sender,
            PauseReason::Operator,
            Instant::now(),
            self.policy.config().pause_duration(),
        );
        info!(sender, "sender paused by operator");
        self.schedule_pause_expiry(ticket.clone());
        ticket
    }

    /// Clear pause and handoff and disarm the expiry timer.
    pub fn resume_sender(&self, sender: &str) -> bool {
        let resumed = self.lock_state().resume(sender);
        if resumed {
            info!(sender, "sender resumed by operator");
        }
        resumed
    }

    /// Arm the auto-expiry of a pause.
    ///
    /// The timer does nothing if its token was cancelled (superseding pause or
    /// resume) or if the store no longer holds the ticket's generation.
    fn schedule_pause_expiry(&self, ticket: PauseTicket) {
        let state = Arc::clone(&self.state);
        let messenger = Arc::clone(&self.messenger);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = ticket.cancel.cancelled() => return,
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(ticket.duration) => {}
            }
            let expired = state
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .expire_pause(&ticket.sender, ticket.generation);
            if !expired {
                return;
            }
            info!(sender = %ticket.sender, "pause expired");
            if let Err(e) = messenger
                .send(&ticket.sender, replies::BOT_AVAILABLE_AGAIN)
                .await
            {
                warn!(sender = %ticket.sender, error = %e, "availability notice failed");
            }
        });
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SenderStateStore> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MessageProcessor for AdmissionPipeline {
    async fn process(&self, message: &InboundMessage) -> Rule {
        self.process_message(message).await
    }

    fn aborted(&self, message: &InboundMessage, detail: &str) {
        self.health
            .record_error("admission", format!("{}: {detail}", message.sender));
        self.health.record_event();
    }
}
