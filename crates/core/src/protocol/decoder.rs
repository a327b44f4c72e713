//! Line classifier for ECU process output
//!
//! `decode` is total: every input yields exactly one [`EcuEvent`]. Lines that
//! match no known prefix become `Raw` so extra diagnostic output from the
//! process passes through untouched.

use crate::error::{CoreError, Result};
use crate::types::EcuEvent;

pub const READY_LINE: &str = "ECU_SIM_READY";
pub const QUIT_ACK_LINE: &str = "QUIT_ACK";
pub const IDENTIFY_PREFIX: &str = "VIN:";
pub const ALLOWED_MAPS_PREFIX: &str = "ALLOWED_MAPS:";
pub const PROMPT_PREFIX: &str = "PROMPT:";
pub const SUCCESS_PREFIX: &str = "SUCCESS:";
pub const ERROR_PREFIX: &str = "ERROR:";
pub const WARNING_PREFIX: &str = "WARNING:";

/// Classify one line of process output
pub fn decode(line: &str) -> EcuEvent {
    if line == READY_LINE {
        return EcuEvent::Ready;
    }
    if line == QUIT_ACK_LINE {
        return EcuEvent::QuitAck;
    }

    if line.starts_with(IDENTIFY_PREFIX) {
        return match parse_identify(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("{}", e);
                EcuEvent::warning(e.to_string())
            }
        };
    }

    if let Some(rest) = line.strip_prefix(ALLOWED_MAPS_PREFIX) {
        return EcuEvent::AllowedMaps {
            maps: parse_map_list(rest),
        };
    }

    if let Some(rest) = line.strip_prefix(PROMPT_PREFIX) {
        return EcuEvent::Prompt {
            text: rest.trim().to_string(),
        };
    }

    let text = line.to_string();
    if line.starts_with(SUCCESS_PREFIX) {
        EcuEvent::Success { text }
    } else if line.starts_with(ERROR_PREFIX) {
        EcuEvent::Error { text }
    } else if line.starts_with(WARNING_PREFIX) {
        EcuEvent::Warning { text }
    } else {
        EcuEvent::Raw { text }
    }
}

/// Parse `VIN: <vin>, ECU: <type>, ALLOWED: <id,id,...>`
///
/// Field keys are not checked, only the `": "` separator: the simulator
/// labels the third field `allowed_maps`. The third field absorbs any
/// remaining `", "` so a spaced map list still parses.
pub fn parse_identify(line: &str) -> Result<EcuEvent> {
    let fields: Vec<&str> = line.splitn(3, ", ").collect();
    if fields.len() < 3 {
        return Err(CoreError::MalformedIdentify(format!(
            "expected 3 fields, got {}: {}",
            fields.len(),
            line
        )));
    }

    let mut values = Vec::with_capacity(3);
    for field in &fields {
        match field.split_once(": ") {
            Some((_, value)) => values.push(value.trim()),
            None => {
                return Err(CoreError::MalformedIdentify(format!(
                    "field '{}' has no ': ' separator: {}",
                    field, line
                )))
            }
        }
    }

    Ok(EcuEvent::IdentifyResult {
        vin: values[0].to_string(),
        ecu_type: values[1].to_string(),
        allowed: parse_map_list(values[2]),
    })
}

/// Split a comma separated map list, dropping blanks
pub fn parse_map_list(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
