//! Per-sender admission state.
//!
//! One store owns every per-sender map the admission pipeline consults: rate
//! counters, repeated-message trackers, pauses (with the human-handoff flag),
//! spam cooldowns and recently processed message ids. Entries are created
//! lazily on a sender's first message and removed by the janitor.
//!
//! A human handoff is always represented as a pause, so "handoff implies
//! pause" holds structurally: there is no handoff flag without a pause entry.

use crate::admission::rate_limit::{RateCounter, RateDecision};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Last normalized text seen from a sender and how often it repeated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatTracker {
    pub last_text: String,
    pub occurrences: u32,
    pub last_seen: Instant,
}

/// Result of comparing a message with the sender's repeat tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCheck {
    /// Different text from last time (or first message).
    Fresh,
    /// Same text again, below the trigger threshold.
    Repeated { occurrences: u32 },
    /// Threshold reached; the tracker has been reset to zero occurrences.
    Triggered,
}

/// Why a sender is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// The sender asked for a human.
    HumanHandoff,
    /// The sender sent media that needs human review.
    Media,
    /// An operator froze the conversation.
    Operator,
}

impl PauseReason {
    /// Whether this pause means "a human should answer instead of the bot".
    pub fn is_human_handoff(self) -> bool {
        matches!(self, Self::HumanHandoff | Self::Media)
    }
}

#[derive(Debug)]
struct PauseEntry {
    reason: PauseReason,
    generation: u64,
    expires_at: Instant,
    cancel: CancellationToken,
}

/// Handle for the auto-expiry timer of one pause.
///
/// The timer must call [`SenderStateStore::expire_pause`] with the ticket's
/// generation; a superseding pause or an explicit resume cancels the token
/// and bumps the generation, so a stale timer can never act.
#[derive(Debug, Clone)]
pub struct PauseTicket {
    pub sender: String,
    pub generation: u64,
    pub duration: Duration,
    pub cancel: CancellationToken,
}

/// Retention windows used by [`SenderStateStore::sweep`].
#[derive(Debug, Clone, Copy)]
pub struct SweepLimits {
    pub rate_retention: Duration,
    pub repeat_retention: Duration,
    pub seen_id_retention: Duration,
}

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub rate_counters: usize,
    pub repeat_trackers: usize,
    pub cooldowns: usize,
    pub seen_ids: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.rate_counters + self.repeat_trackers + self.cooldowns + self.seen_ids
    }
}

/// Current map sizes, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub rate_counters: usize,
    pub repeat_trackers: usize,
    pub paused: usize,
    pub cooldowns: usize,
    pub seen_ids: usize,
}

/// Owned store of every per-sender admission map.
#[derive(Debug, Default)]
pub struct SenderStateStore {
    rates: HashMap<String, RateCounter>,
    repeats: HashMap<String, RepeatTracker>,
    pauses: HashMap<String, PauseEntry>,
    cooldowns: HashMap<String, Instant>,
    seen_ids: HashMap<String, Instant>,
    next_generation: u64,
}

impl SenderStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Rate ─────────────────────────────────────────────────────────────

    /// Count one message from `sender`.
    pub fn record_message(
        &mut self,
        sender: &str,
        now: Instant,
        window: Duration,
        max_per_window: u32,
    ) -> RateDecision {
        match self.rates.get_mut(sender) {
            Some(counter) => counter.record(now, window, max_per_window),
            None => {
                let counter = RateCounter::start(now);
                self.rates.insert(sender.to_owned(), counter);
                if max_per_window == 0 {
                    RateDecision::Exceeded {
                        retry_after: window,
                    }
                } else {
                    RateDecision::Allowed {
                        remaining: max_per_window - 1,
                    }
                }
            }
        }
    }

    pub fn rate_counter(&self, sender: &str) -> Option<RateCounter> {
        self.rates.get(sender).copied()
    }

    // ── Repeats ──────────────────────────────────────────────────────────

    /// Compare `normalized` with the sender's last text.
    ///
    /// Same text increments the occurrence count; reaching `threshold` resets
    /// it to zero and reports [`RepeatCheck::Triggered`]. Different text
    /// restarts the tracker at one.
    pub fn check_repeat(
        &mut self,
        sender: &str,
        normalized: &str,
        now: Instant,
        threshold: u32,
    ) -> RepeatCheck {
        match self.repeats.get_mut(sender) {
            Some(tracker) if tracker.last_text == normalized => {
                tracker.occurrences = tracker.occurrences.saturating_add(1);
                tracker.last_seen = now;
                if tracker.occurrences >= threshold {
                    tracker.occurrences = 0;
                    RepeatCheck::Triggered
                } else if tracker.occurrences > 1 {
                    RepeatCheck::Repeated {
                        occurrences: tracker.occurrences,
                    }
                } else {
                    RepeatCheck::Fresh
                }
            }
            _ => {
                self.repeats.insert(
                    sender.to_owned(),
                    RepeatTracker {
                        last_text: normalized.to_owned(),
                        occurrences: 1,
                        last_seen: now,
                    },
                );
                RepeatCheck::Fresh
            }
        }
    }

    pub fn repeat_tracker(&self, sender: &str) -> Option<&RepeatTracker> {
        self.repeats.get(sender)
    }

    // ── Cooldowns ────────────────────────────────────────────────────────

    /// Silence `sender` until `now + duration`.
    pub fn start_cooldown(&mut self, sender: &str, now: Instant, duration: Duration) {
        self.cooldowns.insert(sender.to_owned(), now + duration);
    }

    /// Whether a cooldown is active. An expired cooldown is removed.
    pub fn cooldown_active(&mut self, sender: &str, now: Instant) -> bool {
        match self.cooldowns.get(sender) {
            Some(until) if now < *until => true,
            Some(_) => {
                self.cooldowns.remove(sender);
                false
            }
            None => false,
        }
    }

    // ── Pauses ───────────────────────────────────────────────────────────

    /// Pause `sender`, superseding (and cancelling the timer of) any earlier pause.
    pub fn pause(
        &mut self,
        sender: &str,
        reason: PauseReason,
        now: Instant,
        duration: Duration,
    ) -> PauseTicket {
        if let Some(previous) = self.pauses.remove(sender) {
            previous.cancel.cancel();
        }
        self.next_generation = self.next_generation.wrapping_add(1);
        let cancel = CancellationToken::new();
        self.pauses.insert(
            sender.to_owned(),
            PauseEntry {
                reason,
                generation: self.next_generation,
                expires_at: now + duration,
                cancel: cancel.clone(),
            },
        );
        PauseTicket {
            sender: sender.to_owned(),
            generation: self.next_generation,
            duration,
            cancel,
        }
    }

    pub fn is_paused(&self, sender: &str) -> bool {
        self.pauses.contains_key(sender)
    }

    pub fn is_human_handoff(&self, sender: &str) -> bool {
        self.pauses
            .get(sender)
            .is_some_and(|entry| entry.reason.is_human_handoff())
    }

    pub fn pause_reason(&self, sender: &str) -> Option<PauseReason> {
        self.pauses.get(sender).map(|entry| entry.reason)
    }

    /// When the sender's current pause auto-expires.
    pub fn pause_expires_at(&self, sender: &str) -> Option<Instant> {
        self.pauses.get(sender).map(|entry| entry.expires_at)
    }

    /// Clear the pause and handoff flag and cancel the expiry timer.
    ///
    /// Returns `false` when the sender was not paused.
    pub fn resume(&mut self, sender: &str) -> bool {
        match self.pauses.remove(sender) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Expire the pause identified by `generation`.
    ///
    /// Returns `false` (and changes nothing) if the sender was resumed or
    /// re-paused since the ticket was issued.
    pub fn expire_pause(&mut self, sender: &str, generation: u64) -> bool {
        let current = self
            .pauses
            .get(sender)
            .is_some_and(|entry| entry.generation == generation);
        if current {
            self.pauses.remove(sender);
        }
        current
    }

    // ── Duplicate delivery ───────────────────────────────────────────────

    /// Remember `message_id` as processed. Returns `false` if it already was.
    pub fn mark_seen(&mut self, message_id: &str, now: Instant) -> bool {
        if self.seen_ids.contains_key(message_id) {
            return false;
        }
        self.seen_ids.insert(message_id.to_owned(), now);
        true
    }

    // ── Maintenance ──────────────────────────────────────────────────────

    /// Drop stale counters, trackers, seen ids and expired cooldowns.
    ///
    /// Pauses are owned by their expiry timers and are never swept.
    pub fn sweep(&mut self, now: Instant, limits: SweepLimits) -> SweepReport {
        let before = self.stats();

        self.rates
            .retain(|_, counter| !counter.is_stale(now, limits.rate_retention));
        self.repeats.retain(|_, tracker| {
            now.saturating_duration_since(tracker.last_seen) <= limits.repeat_retention
        });
        self.cooldowns.retain(|_, until| now <= *until);
        self.seen_ids
            .retain(|_, at| now.saturating_duration_since(*at) <= limits.seen_id_retention);

        let after = self.stats();
        SweepReport {
            rate_counters: before.rate_counters - after.rate_counters,
            repeat_trackers: before.repeat_trackers - after.repeat_trackers,
            cooldowns: before.cooldowns - after.cooldowns,
            seen_ids: before.seen_ids - after.seen_ids,
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            rate_counters: self.rates.len(),
            repeat_trackers: self.repeats.len(),
            paused: self.pauses.len(),
            cooldowns: self.cooldowns.len(),
            seen_ids: self.seen_ids.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn first_message_opens_rate_window() {
        let mut store = SenderStateStore::new();
        let now = Instant::now();
        let decision = store.record_message("a", now, Duration::from_secs(60), 10);
        assert_eq!(decision, RateDecision::Allowed { remaining: 9 });
        assert_eq!(store.rate_counter("a").unwrap().count, 1);
    }

    #[test]
    fn repeat_threshold_resets_to_zero_not_one() {
        let mut store = SenderStateStore::new();
        let now = Instant::now();
        assert_eq!(store.check_repeat("a", "hola", now, 4), RepeatCheck::Fresh);
        assert_eq!(
            store.check_repeat("a", "hola", now, 4),
            RepeatCheck::Repeated { occurrences: 2 }
        );
        assert_eq!(
            store.check_repeat("a", "hola", now, 4),
            RepeatCheck::Repeated { occurrences: 3 }
        );
        assert_eq!(store.check_repeat("a", "hola", now, 4), RepeatCheck::Triggered);
        assert_eq!(store.repeat_tracker("a").unwrap().occurrences, 0);
    }

    #[test]
    fn different_text_resets_to_one() {
        let mut store = SenderStateStore::new();
        let now = Instant::now();
        store.check_repeat("a", "hola", now, 4);
        store.check_repeat("a", "hola", now, 4);
        assert_eq!(store.check_repeat("a", "adios", now, 4), RepeatCheck::Fresh);
        let tracker = store.repeat_tracker("a").unwrap();
        assert_eq!(tracker.occurrences, 1);
        assert_eq!(tracker.last_text, "adios");
    }

    #[test]
    fn cooldown_expires_lazily() {
        let mut store = SenderStateStore::new();
        let now = Instant::now();
        store.start_cooldown("a", now, Duration::from_secs(120));
        assert!(store.cooldown_active("a", now + Duration::from_secs(119)));
        assert!(!store.cooldown_active("a", now + Duration::from_secs(121)));
        assert_eq!(store.stats().cooldowns, 0);
    }

    #[test]
    fn handoff_implies_pause() {
        let mut store = SenderStateStore::new();
        let now = Instant::now();
        store.pause("a", PauseReason::HumanHandoff, now, HOUR);
        assert!(store.is_paused("a"));
        assert!(store.is_human_handoff("a"));

        store.pause("b", PauseReason::Operator, now, HOUR);
        assert!(store.is_paused("b"));
        assert!(!store.is_human_handoff("b"));

        assert!(store.resume("a"));
        assert!(!store.is_paused("a"));
        assert!(!store.is_human_handoff("a"));
        assert!(!store.resume("a"));
    }

    #[test]
    fn stale_expiry_ticket_is_ignored() {
        let mut store = SenderStateStore::new();
        let now = Instant::now();
        let first = store.pause("a", PauseReason::HumanHandoff, now, HOUR);
        let second = store.pause("a", PauseReason::Media, now, HOUR);

        assert!(first.cancel.is_cancelled());
        assert!(!store.expire_pause("a", first.generation));
        assert!(store.is_paused("a"));

        assert!(store.expire_pause("a", second.generation));
        assert!(!store.is_paused("a"));
    }

    #[test]
    fn resume_cancels_timer_and_invalidates_ticket() {
        let mut store = SenderStateStore::new();
        let ticket = store.pause("a", PauseReason::HumanHandoff, Instant::now(), HOUR);
        store.resume("a");
        assert!(ticket.cancel.is_cancelled());
        assert!(!store.expire_pause("a", ticket.generation));
    }

    #[test]
    fn mark_seen_detects_duplicates() {
        let mut store = SenderStateStore::new();
        let now = Instant::now();
        assert!(store.mark_seen("wamid.1", now));
        assert!(!store.mark_seen("wamid.1", now));
        assert!(store.mark_seen("wamid.2", now));
    }

    #[test]
    fn sweep_removes_only_stale_entries() {
        let mut store = SenderStateStore::new();
        let window = Duration::from_secs(60);
        let start = Instant::now();

        store.record_message("old", start, window, 10);
        store.check_repeat("old", "hola", start, 4);
        store.start_cooldown("old", start, Duration::from_secs(30));
        store.mark_seen("id-old", start);
        store.pause("old", PauseReason::HumanHandoff, start, HOUR);

        let later = start + Duration::from_secs(150);
        store.record_message("new", later, window, 10);
        store.check_repeat("new", "hola", later, 4);
        store.mark_seen("id-new", later);

        let report = store.sweep(
            later,
            SweepLimits {
                rate_retention: window * 2,
                repeat_retention: window,
                seen_id_retention: window * 2,
            },
        );

        assert_eq!(
            report,
            SweepReport {
                rate_counters: 1,
                repeat_trackers: 1,
                cooldowns: 1,
                seen_ids: 1,
            }
        );
        assert_eq!(report.total(), 4);
        let stats = store.stats();
        assert_eq!(stats.rate_counters, 1);
        assert_eq!(stats.repeat_trackers, 1);
        assert_eq!(stats.paused, 1);
        assert!(store.rate_counter("new").is_some());
    }
}
