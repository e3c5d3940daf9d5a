//! Electra: WhatsApp customer-support bot for a retail store.
//!
//! Inbound messages flow through a bounded admission queue into an ordered
//! rule chain (rate limit, repeats, spam, human handoff, pauses, media,
//! direct-query shortcuts) and, when nothing short-circuits, into a
//! generative-language model. A connection supervisor keeps the messaging
//! session alive with bounded, backed-off reconnection, a health monitor
//! restarts silent services, and a keep-alive prober keeps the host warm.
//!
//! # Architecture
//!
//! - **channels**: collaborator contracts, WhatsApp Cloud API client, HTTP gateway
//! - **admission**: queue, per-sender state, policy and reply pipeline
//! - **generator**: response generator contract and the Gemini client
//! - **supervisor**: health record, reconnection/restart state machine,
//!   health monitor and keep-alive prober
//! - **runtime**: wiring, background loops and graceful shutdown

pub mod admission;
pub mod channels;
pub mod config;
pub mod error;
pub mod generator;
pub mod runtime;
pub mod supervisor;

#[cfg(test)]
mod test_utils;

pub use config::BotConfig;
pub use error::{BotError, Result};
pub use runtime::{Collaborators, Runtime};
