//! Console command parsing

/// What the user asked for at the command prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Identify,
    AllowedMaps,
    Flash(String),
    Verify,
    Catalog,
    Status,
    Cancel,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Input {
    /// Parse one console line. Map ids are upper-cased so `flash x_c` works.
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Input::Empty;
        };

        match (head.to_ascii_lowercase().as_str(), words.next()) {
            ("identify" | "id", None) => Input::Identify,
            ("maps", None) => Input::AllowedMaps,
            ("flash", Some(map)) => Input::Flash(map.to_ascii_uppercase()),
            ("verify", None) => Input::Verify,
            ("catalog", None) => Input::Catalog,
            ("status", None) => Input::Status,
            ("cancel", None) => Input::Cancel,
            ("help" | "?", None) => Input::Help,
            ("quit" | "exit" | "/exit", None) => Input::Quit,
            _ => Input::Unknown(line.trim().to_string()),
        }
    }
}

/// Answer to the override question. Anything but yes keeps the vehicle legal.
pub fn is_yes(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

pub const HELP: &str = "\
Commands:
  identify        read VIN, ECU class and allowed maps
  maps            ask the ECU for the allowed maps again
  flash <MAP>     flash a map from the catalog (e.g. flash R_B)
  verify          check regulatory compliance of the flashed map
  catalog         list every known map
  status          show the current session
  cancel          stop waiting for the ECU to answer the last command
  quit            stop the ECU process and exit";
