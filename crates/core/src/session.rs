//! Session state and the compliance rule
//!
//! A [`Session`] is reset on every identification and otherwise mutated only
//! by applying decoded events (plus the optimistic `pending_map` set by a
//! flash request). Compliance is never stored: [`Session::compliance`]
//! derives it from `(ecu_class, flashed_map)` on every call.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::types::{find_map, EcuClass, EcuEvent};

/// Regulatory verification status
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Compliance {
    Unverified,
    Compliant,
    Violation,
}

/// Vehicle session state
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Session {
    /// VIN reported by the last identification, `None` until identified
    pub vehicle_id: Option<String>,
    pub ecu_class: EcuClass,
    pub allowed_maps: BTreeSet<String>,
    pub flashed_map: Option<String>,
    pub pending_map: Option<String>,
    /// Set once `ECU_SIM_READY` has been seen
    pub ready: bool,
}

impl Session {
    /// Create empty session
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_identified(&self) -> bool {
        self.vehicle_id.is_some()
    }

    /// Apply one decoded event
    pub fn apply_event(&mut self, event: &EcuEvent) {
        match event {
            EcuEvent::Ready => {
                self.ready = true;
            }
            EcuEvent::IdentifyResult {
                vin,
                ecu_type,
                allowed,
            } => {
                *self = Session {
                    vehicle_id: Some(vin.clone()),
                    ecu_class: EcuClass::parse(ecu_type),
                    allowed_maps: allowed.iter().cloned().collect(),
                    flashed_map: None,
                    pending_map: None,
                    ready: self.ready,
                };
                if self.ecu_class == EcuClass::Unknown {
                    tracing::warn!("Unknown ECU type '{}' for VIN {}", ecu_type, vin);
                }
            }
            EcuEvent::AllowedMaps { maps } => {
                self.allowed_maps = maps.iter().cloned().collect();
            }
            EcuEvent::Success { .. } => {
                if let Some(map) = self.pending_map.take() {
                    tracing::info!("Map {} flashed", map);
                    self.flashed_map = Some(map);
                }
            }
            EcuEvent::Error { .. } => {
                if let Some(map) = self.pending_map.take() {
                    tracing::info!("Flash of {} abandoned", map);
                }
            }
            EcuEvent::Warning { .. }
            | EcuEvent::Raw { .. }
            | EcuEvent::Prompt { .. }
            | EcuEvent::QuitAck => {}
        }
    }

    /// Record a flash request ahead of the `FLASH_MAP` line
    ///
    /// Ids outside the catalog are ignored so `flashed_map` can only ever
    /// hold a catalog entry.
    pub fn begin_flash(&mut self, map_id: &str) {
        if find_map(map_id).is_some() {
            self.pending_map = Some(map_id.to_string());
        } else {
            tracing::warn!("Ignoring flash request for unknown map {}", map_id);
        }
    }

    /// Derive compliance from ECU class and flashed map
    pub fn compliance(&self) -> Compliance {
        match self.flashed_map.as_deref() {
            None => Compliance::Unverified,
            Some(map) if self.ecu_class == EcuClass::Road && map.starts_with("X_") => {
                Compliance::Violation
            }
            Some(_) => Compliance::Compliant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identified(ecu: &str) -> Session {
        let mut session = Session::new();
        session.apply_event(&EcuEvent::IdentifyResult {
            vin: "123456".into(),
            ecu_type: ecu.into(),
            allowed: vec!["R_A".into(), "R_B".into(), "R_C".into()],
        });
        session
    }

    fn flashed(ecu: &str, map: &str) -> Session {
        let mut session = identified(ecu);
        session.begin_flash(map);
        session.apply_event(&EcuEvent::Success {
            text: "SUCCESS: flashed".into(),
        });
        session
    }

    #[test]
    fn test_identify_resets_session() {
        let mut session = flashed("ROAD", "R_A");
        session.begin_flash("R_B");
        session.apply_event(&EcuEvent::IdentifyResult {
            vin: "1HD1KB4137K123456".into(),
            ecu_type: "ROAD".into(),
            allowed: vec!["R_A".into(), "R_B".into(), "R_C".into()],
        });

        assert_eq!(session.vehicle_id.as_deref(), Some("1HD1KB4137K123456"));
        assert_eq!(session.ecu_class, EcuClass::Road);
        assert_eq!(
            session.allowed_maps,
            ["R_A", "R_B", "R_C"]
                .iter()
                .map(|s| s.to_string())
                .collect::<BTreeSet<_>>()
        );
        assert_eq!(session.flashed_map, None);
        assert_eq!(session.pending_map, None);
        assert_eq!(session.compliance(), Compliance::Unverified);
    }

    #[test]
    fn test_unknown_ecu_type_is_not_fatal() {
        let session = identified("TRACK");
        assert_eq!(session.ecu_class, EcuClass::Unknown);
        assert!(session.is_identified());
    }

    #[test]
    fn test_success_resolves_pending_map() {
        let session = flashed("ROAD", "R_A");
        assert_eq!(session.flashed_map.as_deref(), Some("R_A"));
        assert_eq!(session.pending_map, None);
    }

    #[test]
    fn test_success_without_pending_map_changes_nothing() {
        let mut session = identified("ROAD");
        let before = session.clone();
        session.apply_event(&EcuEvent::Success {
            text: "SUCCESS: other".into(),
        });
        assert_eq!(session, before);
    }

    #[test]
    fn test_error_abandons_pending_map() {
        let mut session = flashed("ROAD", "R_A");
        session.begin_flash("R_C");
        session.apply_event(&EcuEvent::Error {
            text: "ERROR: VIN mismatch. Please try again.".into(),
        });
        assert_eq!(session.pending_map, None);
        assert_eq!(session.flashed_map.as_deref(), Some("R_A"));
    }

    #[test]
    fn test_non_mutating_events() {
        let mut session = identified("RACE");
        session.begin_flash("X_B");
        let before = session.clone();
        for event in [
            EcuEvent::warning("WARNING: Map not in standard allowed list for this VIN"),
            EcuEvent::raw("diagnostic"),
            EcuEvent::Prompt {
                text: "Re-enter VIN".into(),
            },
            EcuEvent::QuitAck,
        ] {
            session.apply_event(&event);
        }
        assert_eq!(session, before);
    }

    #[test]
    fn test_begin_flash_rejects_unknown_map() {
        let mut session = identified("ROAD");
        session.begin_flash("Z_Z");
        assert_eq!(session.pending_map, None);
    }

    #[test]
    fn test_road_ecu_with_race_map_is_violation() {
        for map in ["X_A", "X_B", "X_C"] {
            assert_eq!(flashed("ROAD", map).compliance(), Compliance::Violation);
        }
    }

    #[test]
    fn test_compliant_combinations() {
        for map in ["R_A", "R_B", "R_C"] {
            assert_eq!(flashed("ROAD", map).compliance(), Compliance::Compliant);
        }
        for map in ["R_A", "X_A", "X_B", "X_C"] {
            assert_eq!(flashed("RACE", map).compliance(), Compliance::Compliant);
        }
        assert_eq!(identified("ROAD").compliance(), Compliance::Unverified);
        assert_eq!(identified("RACE").compliance(), Compliance::Unverified);
    }

    #[test]
    fn test_compliance_is_referentially_transparent() {
        let session = flashed("ROAD", "X_C");
        let before = session.clone();
        assert_eq!(session.compliance(), session.compliance());
        assert_eq!(session, before);
    }
}
