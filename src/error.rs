//! Error types for the support bot.

/// Top-level error type for the bot runtime.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Configuration error (missing credential, invalid value).
    #[error("config error: {0}")]
    Config(String),

    /// External messaging session error (initialize, destroy).
    #[error("session error: {0}")]
    Session(String),

    /// Persisted session credentials could not be cleared or read.
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Response generator error outside the per-message path.
    #[error("generator error: {0}")]
    Generator(String),

    /// Reply dispatch error.
    #[error("messaging error: {0}")]
    Messaging(String),

    /// Keep-alive probe machinery error.
    #[error("probe error: {0}")]
    Probe(String),

    /// Admission queue error (worker gone, entry settled twice).
    #[error("queue error: {0}")]
    Queue(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BotError>;
