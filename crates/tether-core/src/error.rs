use thiserror::Error;

/// Top-level error type for Tether.
#[derive(Debug, Error)]
pub enum TetherError {
    /// Network-level failure talking to the backend (connect, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The REST API answered with a non-success status.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Error from the realtime channel.
    #[error("channel error: {0}")]
    Channel(String),

    /// Malformed Engine.IO / Socket.IO frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An action was rejected before it was sent.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
