use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of non-text payload attached to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    /// Any payload the channel reports that has no dedicated acknowledgement.
    Other,
}

impl MediaKind {
    /// Map a channel-reported message type (`image`, `voice`, `ptt`, ...) to a media kind.
    ///
    /// Returns `None` for plain text.
    #[must_use]
    pub fn from_channel_type(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "" | "text" | "chat" => None,
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" | "voice" | "ptt" => Some(Self::Audio),
            "document" => Some(Self::Document),
            "sticker" => Some(Self::Sticker),
            _ => Some(Self::Other),
        }
    }
}

/// Inbound message received from the messaging channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel-assigned id, used to recognise redelivered messages.
    pub message_id: String,
    /// Stable sender identity; also the reply target.
    pub sender: String,
    /// Text body (caption for media, possibly empty).
    pub text: String,
    /// Attached media, if any.
    pub media: Option<MediaKind>,
}

impl InboundMessage {
    /// Plain-text message with a fresh id.
    pub fn text(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            sender: sender.into(),
            text: text.into(),
            media: None,
        }
    }

    /// Media message with a fresh id and optional caption.
    pub fn media(sender: impl Into<String>, media: MediaKind, caption: impl Into<String>) -> Self {
        Self {
            media: Some(media),
            ..Self::text(sender, caption)
        }
    }

    /// Replace the generated id with a channel-assigned one.
    #[must_use]
    pub fn with_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }
}

/// Reply dispatch contract. The pipeline only ever talks to senders through this.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Send `text` to the conversation identified by `to`.
    async fn send(&self, to: &str, text: &str) -> anyhow::Result<()>;
}

/// Why the external session dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The account was logged out; the persisted session is no longer valid.
    Logout,
    /// The session navigated away (linked device removed, page reset).
    Navigation,
    /// Anything else, e.g. network loss or a conflicting login.
    Other(String),
}

impl DisconnectReason {
    /// Whether the disconnect was intentional and the stored session must go.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, Self::Logout | Self::Navigation)
    }

    /// Parse a channel-reported reason string.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOGOUT" => Self::Logout,
            "NAVIGATION" => Self::Navigation,
            _ => Self::Other(raw.trim().to_owned()),
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logout => write!(f, "LOGOUT"),
            Self::Navigation => write!(f, "NAVIGATION"),
            Self::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Lifecycle event emitted by a session driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is authenticated and delivering messages.
    Ready,
    /// The session dropped.
    Disconnected(DisconnectReason),
    /// The stored credentials were rejected.
    AuthFailure(String),
}

/// Owner of the long-lived external session.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    /// Stable driver identifier (e.g. `whatsapp`).
    fn id(&self) -> &'static str;

    /// Start the session. Readiness is reported separately as [`SessionEvent::Ready`].
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Tear the session down.
    async fn destroy(&self) -> anyhow::Result<()>;
}
