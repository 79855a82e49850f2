//! Error types for the Meshlight node.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running a node.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// Config file could not be parsed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Socket setup failed
    #[error("Network error: {0}")]
    Network(String),

    /// OnOff model error (not bound, send failure, malformed message)
    #[error(transparent)]
    OnOff(#[from] meshlight_onoff::Error),

    /// The node's event loop has stopped
    #[error("node stopped")]
    Stopped,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Network(format!("{:#}", e))
    }
}

impl Error {
    /// Whether the underlying cause is a missing application key binding.
    pub fn is_not_bound(&self) -> bool {
        matches!(self, Error::OnOff(e) if e.is_not_bound())
    }
}
