//! Messaging channel: collaborator contracts, the WhatsApp Cloud API client
//! and the HTTP gateway that feeds the admission queue.

pub mod gateway;
pub mod traits;
pub mod whatsapp;

pub use gateway::GatewayState;
pub use traits::{
    DisconnectReason, InboundMessage, MediaKind, MessagingClient, SessionDriver, SessionEvent,
};
pub use whatsapp::WhatsAppClient;
