//! Error types for the live voice companion.

/// Top-level error type for yuki.
#[derive(Debug, thiserror::Error)]
pub enum YukiError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone access was refused or no input device could be opened.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// An audio payload could not be decoded into playable samples.
    #[error("decode error: {0}")]
    Decode(String),

    /// Streaming transport (WebSocket) error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Credential lookup or storage error.
    #[error("credential error: {0}")]
    Credential(String),

    /// One-shot request to the generative backend failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, YukiError>;
