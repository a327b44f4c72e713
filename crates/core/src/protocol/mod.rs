//! ECU line protocol: newline-terminated UTF-8 text in both directions

mod decoder;

pub use decoder::{
    decode, parse_identify, parse_map_list, ALLOWED_MAPS_PREFIX, ERROR_PREFIX, IDENTIFY_PREFIX,
    PROMPT_PREFIX, QUIT_ACK_LINE, READY_LINE, SUCCESS_PREFIX, WARNING_PREFIX,
};
