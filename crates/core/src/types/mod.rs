//! Domain types for ECU programming sessions

mod catalog;
mod command;
mod event;

pub use catalog::{
    find_map, is_valid_map_id, maps_of_class, EcuClass, MapClass, MapDescriptor, CATALOG,
    ROAD_HORSEPOWER_LIMIT,
};
pub use command::EcuCommand;
pub use event::EcuEvent;
