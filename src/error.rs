//! Error types for ignition-rs

use thiserror::Error;

/// Errors raised while setting up an acquisition run
#[derive(Error, Debug)]
pub enum IgnitionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Why a single config source produced no result
#[derive(Error, Debug)]
pub enum SourceError {
    /// Another source won the race
    #[error("cancelled")]
    Cancelled,

    /// The shared deadline elapsed
    #[error("deadline exceeded")]
    TimedOut,

    /// Mount, HTTP or filesystem failure
    #[error("{0}")]
    Transport(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SourceError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Whether this error came from the race context ending rather than the source itself
    pub fn is_context_end(&self) -> bool {
        matches!(self, Self::Cancelled | Self::TimedOut)
    }
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Errors in a multipart envelope returned by a metadata service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("found multipart message but no boundary; could not parse")]
    NoBoundary,

    #[error("found multiple configs in multipart response")]
    MultipleConfigs,

    #[error("malformed multipart message: {0}")]
    Malformed(String),
}
