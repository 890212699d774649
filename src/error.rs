//! Error types for the Hearth companion

use thiserror::Error;

/// Result type alias for Hearth operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Hearth companion
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio hardware or stream failure
    #[error("device fault: {0}")]
    Device(String),

    /// Handshake or transport failure with the realtime peer
    #[error("connection fault: {0}")]
    Connection(String),

    /// Malformed or unexpected inbound message
    #[error("protocol fault: {0}")]
    Protocol(String),

    /// Wake-word or language-detection capability failure
    #[error("inference fault: {0}")]
    Inference(String),

    /// Summarization capability failure (non-fatal, degrades to fallback)
    #[error("summarization fault: {0}")]
    Summarization(String),

    /// Memory record load/store error
    #[error("memory error: {0}")]
    Memory(String),

    /// Audio role already held by another consumer
    #[error("resource busy: {0}")]
    Busy(String),

    /// Audio channel role revoked or stream closed
    #[error("channel error: {0}")]
    Channel(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Whether this error ends the current session but leaves the daemon
    /// loop free to return to idle listening.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Device(_) | Self::Connection(_) | Self::Protocol(_)
        )
    }

    /// Short stable name for logging and session notes.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Device(_) => "device",
            Self::Connection(_) => "connection",
            Self::Protocol(_) => "protocol",
            Self::Inference(_) => "inference",
            Self::Summarization(_) => "summarization",
            Self::Memory(_) => "memory",
            Self::Busy(_) => "busy",
            Self::Channel(_) => "channel",
            Self::Io(_) => "io",
            Self::Http(_) => "http",
            Self::Serialization(_) => "serialization",
            Self::Yaml(_) => "yaml",
        }
    }
}
