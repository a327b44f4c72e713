//! Error types for ecuflash-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Failed to launch ECU process '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Malformed identify response: {0}")]
    MalformedIdentify(String),

    #[error("Not connected")]
    NotConnected,

    /// Reserved for strict decoding; unrecognized lines currently decode as `Raw`
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Invalid map id '{0}'")]
    InvalidMapId(String),

    #[error("No vehicle identified")]
    NotIdentified,

    #[error("Prompt outstanding: {0}")]
    PromptOutstanding(String),

    #[error("Command still in flight: {0}")]
    Busy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Whether the caller may retry after re-identifying or relaunching
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CoreError::ProtocolViolation(_))
    }
}
