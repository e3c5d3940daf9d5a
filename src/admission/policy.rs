//! Ordered admission rules.
//!
//! [`AdmissionPolicy::evaluate`] runs the checks in a fixed order and stops at
//! the first rule that matches. It only touches the state store; replies,
//! timers and generator calls are carried out by the pipeline from the
//! returned [`Verdict`].

use crate::admission::replies;
use crate::admission::spam::{SpamDetector, SpamSignal};
use crate::admission::state::{PauseReason, PauseTicket, RepeatCheck, SenderStateStore};
use crate::channels::traits::{InboundMessage, MediaKind};
use crate::config::AdmissionConfig;
use std::time::Instant;

/// What the pipeline should do with one message.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Over the per-window limit.
    RateLimited,
    /// Same text as last time, below the spam threshold.
    Repeated { occurrences: u32 },
    /// Repeat threshold reached; a cooldown was started.
    RepeatSpam,
    /// Spam cooldown active; drop without replying.
    CoolingDown,
    /// Spam content; a cooldown was started.
    Spam(SpamSignal),
    /// Sender asked for a human; paused with handoff.
    HandoffRequested(PauseTicket),
    /// Sender left a human handoff; pause cleared.
    ReturnedToBot,
    /// Paused; drop without replying.
    Paused,
    /// Media received; paused with handoff.
    Media { kind: MediaKind, ticket: PauseTicket },
    /// Direct query with a canned answer.
    Shortcut(&'static str),
    /// Hand the text to the response generator.
    Generate { purchase_intent: bool },
}

impl Verdict {
    /// Short rule name for logs and outcomes.
    pub fn rule(&self) -> Rule {
        match self {
            Self::RateLimited => Rule::RateLimited,
            Self::Repeated { .. } => Rule::Repeated,
            Self::RepeatSpam => Rule::RepeatSpam,
            Self::CoolingDown => Rule::CoolingDown,
            Self::Spam(_) => Rule::Spam,
            Self::HandoffRequested(_) => Rule::HandoffRequested,
            Self::ReturnedToBot => Rule::ReturnedToBot,
            Self::Paused => Rule::Paused,
            Self::Media { .. } => Rule::Media,
            Self::Shortcut(_) => Rule::Shortcut,
            Self::Generate { .. } => Rule::Generated,
        }
    }

    /// The fixed reply for this verdict. `None` for silent stops and generation.
    pub fn canned_reply(&self) -> Option<String> {
        match self {
            Self::RateLimited => Some(replies::RATE_LIMIT.to_owned()),
            Self::Repeated { .. } => Some(replies::REPEATED_MESSAGE.to_owned()),
            Self::RepeatSpam | Self::Spam(_) => Some(replies::SPAM_WARNING.to_owned()),
            Self::HandoffRequested(_) => Some(replies::HUMAN_REQUEST.to_owned()),
            Self::ReturnedToBot => Some(replies::WELCOME_BACK.to_owned()),
            Self::Media { kind, .. } => Some(replies::media_received(*kind)),
            Self::Shortcut(text) => Some((*text).to_owned()),
            Self::CoolingDown | Self::Paused | Self::Generate { .. } => None,
        }
    }

    /// Pause started by this verdict, whose expiry timer must be scheduled.
    pub fn pause_ticket(&self) -> Option<&PauseTicket> {
        match self {
            Self::HandoffRequested(ticket) | Self::Media { ticket, .. } => Some(ticket),
            _ => None,
        }
    }
}

/// Which rule settled a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Duplicate,
    RateLimited,
    Repeated,
    RepeatSpam,
    CoolingDown,
    Spam,
    HandoffRequested,
    ReturnedToBot,
    Paused,
    Media,
    Shortcut,
    Generated,
    GenerationTimedOut,
    GenerationFailed,
    /// Processing panicked before the message settled.
    Failed,
}

impl Rule {
    /// Whether this rule sends no reply.
    pub fn is_silent(self) -> bool {
        matches!(
            self,
            Self::Duplicate | Self::CoolingDown | Self::Paused | Self::Failed
        )
    }
}

/// The admission rule set plus the tuning it runs with.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    config: AdmissionConfig,
    spam: SpamDetector,
}

impl AdmissionPolicy {
    pub fn new(config: AdmissionConfig, spam: SpamDetector) -> Self {
        Self { config, spam }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Evaluate `message` against the rules and apply their state changes.
    ///
    /// Rate and repeat trackers are updated for every message, including
    /// those dropped by an active cooldown; a cooldown suppresses every reply
    /// and never starts a new cooldown.
    pub fn evaluate(
        &self,
        store: &mut SenderStateStore,
        message: &InboundMessage,
        now: Instant,
    ) -> Verdict {
        let sender = message.sender.as_str();
        let normalized = replies::normalize(&message.text);

        let rate = store.record_message(
            sender,
            now,
            self.config.rate_window(),
            self.config.max_messages_per_window,
        );
        let repeat = if normalized.is_empty() {
            RepeatCheck::Fresh
        } else {
            store.check_repeat(sender, &normalized, now, self.config.repeat_threshold)
        };

        if store.cooldown_active(sender, now) {
            return Verdict::CoolingDown;
        }

        if rate.is_exceeded() {
            return Verdict::RateLimited;
        }

        match repeat {
            RepeatCheck::Triggered => {
                store.start_cooldown(sender, now, self.config.repeat_cooldown());
                return Verdict::RepeatSpam;
            }
            RepeatCheck::Repeated { occurrences } => return Verdict::Repeated { occurrences },
            RepeatCheck::Fresh => {}
        }

        if let Some(signal) = self.spam.detect(&normalized) {
            store.start_cooldown(sender, now, self.config.spam_cooldown());
            return Verdict::Spam(signal);
        }

        if replies::requests_human(&normalized) {
            let ticket = store.pause(
                sender,
                PauseReason::HumanHandoff,
                now,
                self.config.pause_duration(),
            );
            return Verdict::HandoffRequested(ticket);
        }

        if replies::requests_bot(&normalized) && store.is_human_handoff(sender) {
            store.resume(sender);
            return Verdict::ReturnedToBot;
        }

        if store.is_paused(sender) {
            return Verdict::Paused;
        }

        if let Some(kind) = message.media {
            let ticket = store.pause(sender, PauseReason::Media, now, self.config.pause_duration());
            return Verdict::Media { kind, ticket };
        }

        if let Some(reply) = replies::shortcut(&normalized) {
            return Verdict::Shortcut(reply);
        }

        Verdict::Generate {
            purchase_intent: replies::has_purchase_intent(&normalized),
        }
    }
}
