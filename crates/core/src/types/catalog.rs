//! Fixed ignition map catalog shared with the ECU process

use serde::{Deserialize, Serialize};
use std::fmt;

/// Legal class of a map
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MapClass {
    Road,
    Race,
}

/// Regulatory class of the ECU reported on identification
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EcuClass {
    #[default]
    Unknown,
    Road,
    Race,
}

impl EcuClass {
    /// Parse the `ECU:` field of an identify line. Unrecognised values map to `Unknown`.
    pub fn parse(ecu_type: &str) -> Self {
        match ecu_type.trim() {
            "ROAD" => Self::Road,
            "RACE" => Self::Race,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for EcuClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcuClass::Unknown => f.write_str("UNKNOWN"),
            EcuClass::Road => f.write_str("ROAD"),
            EcuClass::Race => f.write_str("RACE"),
        }
    }
}

/// Static description of one flashable map
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MapDescriptor {
    pub id: &'static str,
    pub label: &'static str,
    pub horsepower: u16,
    pub class: MapClass,
}

/// Horsepower ceiling for street-legal (ROAD) maps
pub const ROAD_HORSEPOWER_LIMIT: u16 = 54;

/// The six maps known to both sides of the line protocol
pub const CATALOG: [MapDescriptor; 6] = [
    MapDescriptor { id: "R_A", label: "Road A - basic", horsepower: 54, class: MapClass::Road },
    MapDescriptor { id: "R_B", label: "Road B - intermediate", horsepower: 54, class: MapClass::Road },
    MapDescriptor { id: "R_C", label: "Road C - advanced", horsepower: 54, class: MapClass::Road },
    MapDescriptor { id: "X_A", label: "Race A - 65 HP", horsepower: 65, class: MapClass::Race },
    MapDescriptor { id: "X_B", label: "Race B - 77 HP", horsepower: 77, class: MapClass::Race },
    MapDescriptor { id: "X_C", label: "Race C - 100 HP", horsepower: 100, class: MapClass::Race },
];

/// Look up a map by id
pub fn find_map(id: &str) -> Option<&'static MapDescriptor> {
    CATALOG.iter().find(|m| m.id == id)
}

/// Check the `[RX]_[A-C]` id pattern
pub fn is_valid_map_id(id: &str) -> bool {
    matches!(
        id.as_bytes(),
        [b'R' | b'X', b'_', b'A'..=b'C']
    )
}

/// Maps of the given class, in catalog order
pub fn maps_of_class(class: MapClass) -> impl Iterator<Item = &'static MapDescriptor> {
    CATALOG.iter().filter(move |m| m.class == class)
}

impl MapDescriptor {
    /// Whether this map is illegal on an ECU of the given class
    pub fn violates(&self, ecu: EcuClass) -> bool {
        ecu == EcuClass::Road && self.class == MapClass::Race
    }
}

impl fmt::Display for MapDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {}HP)", self.id, self.label, self.horsepower)
    }
}
