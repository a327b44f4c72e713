//! Commands written to the ECU process

use serde::{Deserialize, Serialize};
use std::fmt;

use super::event::EcuEvent;

/// Command sent to the ECU process, one per line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EcuCommand {
    Identify,
    GetAllowedMaps,
    FlashMap(String),
    /// Free-text answer to an outstanding prompt
    PromptAnswer(String),
    Quit,
}

impl EcuCommand {
    /// Wire form, without the newline terminator
    pub fn to_line(&self) -> String {
        self.to_string()
    }

    /// Whether a prompt must be answered before this command may be sent
    pub fn starts_exchange(&self) -> bool {
        matches!(
            self,
            EcuCommand::Identify | EcuCommand::GetAllowedMaps | EcuCommand::FlashMap(_)
        )
    }
}

impl EcuCommand {
    /// Whether `event` ends the exchange this command started
    ///
    /// A malformed identify reply decodes as a warning, so warnings end an
    /// identification. During a flash the process warns about maps outside
    /// the allowed list and keeps going, so only success or error end it.
    pub fn completed_by(&self, event: &EcuEvent) -> bool {
        match (self, event) {
            (_, EcuEvent::QuitAck) => true,
            (_, EcuEvent::Error { .. }) => true,
            (EcuCommand::Identify, EcuEvent::IdentifyResult { .. } | EcuEvent::Warning { .. }) => {
                true
            }
            (EcuCommand::GetAllowedMaps, EcuEvent::AllowedMaps { .. }) => true,
            (EcuCommand::FlashMap(_), EcuEvent::Success { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for EcuCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcuCommand::Identify => f.write_str("IDENTIFY"),
            EcuCommand::GetAllowedMaps => f.write_str("GET_ALLOWED_MAPS"),
            EcuCommand::FlashMap(id) => write!(f, "FLASH_MAP {}", id),
            EcuCommand::PromptAnswer(answer) => f.write_str(answer),
            EcuCommand::Quit => f.write_str("QUIT"),
        }
    }
}
