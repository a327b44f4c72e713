//! Events decoded from ECU process output

use serde::{Deserialize, Serialize};

/// One decoded line of ECU process output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EcuEvent {
    /// Process initialized and accepting commands
    Ready,

    /// Identification result
    IdentifyResult {
        vin: String,
        ecu_type: String,
        allowed: Vec<String>,
    },

    /// Allowed-maps query result
    AllowedMaps { maps: Vec<String> },

    /// Interactive prompt, answer required
    Prompt { text: String },

    /// Last command succeeded
    Success { text: String },

    /// Last command failed
    Error { text: String },

    /// Advisory, non-fatal
    Warning { text: String },

    /// Acknowledgement of `QUIT`
    QuitAck,

    /// Anything else, forwarded verbatim
    Raw { text: String },
}

impl EcuEvent {
    /// Create warning event
    pub fn warning(text: impl Into<String>) -> Self {
        Self::Warning { text: text.into() }
    }

    /// Create raw event
    pub fn raw(text: impl Into<String>) -> Self {
        Self::Raw { text: text.into() }
    }

    /// Short name of the variant, for logs and CLI output
    pub fn kind(&self) -> &'static str {
        match self {
            EcuEvent::Ready => "ready",
            EcuEvent::IdentifyResult { .. } => "identify",
            EcuEvent::AllowedMaps { .. } => "allowed_maps",
            EcuEvent::Prompt { .. } => "prompt",
            EcuEvent::Success { .. } => "success",
            EcuEvent::Error { .. } => "error",
            EcuEvent::Warning { .. } => "warning",
            EcuEvent::QuitAck => "quit_ack",
            EcuEvent::Raw { .. } => "raw",
        }
    }

    /// Whether this event ends the exchange of the in-flight command
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EcuEvent::IdentifyResult { .. }
                | EcuEvent::AllowedMaps { .. }
                | EcuEvent::Success { .. }
                | EcuEvent::Error { .. }
                | EcuEvent::QuitAck
        )
    }
}
