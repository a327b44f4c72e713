//! Console output: styled text or one JSON object per line

use crossterm::style::{StyledContent, Stylize};
use ecuflash_core::{
    EcuClass, EcuEvent, MapClass, MapDescriptor, Session, Update, Verification, CATALOG,
};
use serde_json::json;
use std::io::Write;

pub struct Printer {
    json: bool,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn emit(&self, text: impl std::fmt::Display) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", text);
        let _ = stdout.flush();
    }

    fn stamped(&self, text: impl std::fmt::Display) {
        let now = chrono::Local::now().format("%H:%M:%S");
        self.emit(format!("{} {}", now.to_string().dark_grey(), text));
    }

    fn emit_json(&self, value: serde_json::Value) {
        self.emit(value);
    }

    pub fn banner(&self, program: &str) {
        if self.json {
            self.emit_json(json!({ "started": program }));
            return;
        }
        self.emit(format!(
            "{} v{}  {}",
            "EcuFlash".cyan().bold(),
            env!("CARGO_PKG_VERSION"),
            format!("({})", program).dark_grey()
        ));
        self.emit("Type `help` for commands, `quit` to exit.".dark_grey());
    }

    pub fn update(&self, update: &Update) {
        if self.json {
            match serde_json::to_value(update) {
                Ok(value) => self.emit_json(value),
                Err(e) => tracing::error!("Failed to serialize update: {}", e),
            }
            return;
        }

        let line = match &update.event {
            EcuEvent::Ready => "ECU simulator ready".green().to_string(),
            EcuEvent::IdentifyResult { vin, .. } => format!(
                "Vehicle {}  ECU {}  allowed {}",
                vin.as_str().bold(),
                class_label(update.session.ecu_class),
                join(update.session.allowed_maps.iter())
            ),
            EcuEvent::AllowedMaps { maps } => format!("Allowed maps: {}", join(maps.iter())),
            EcuEvent::Prompt { text } => format!("{} {}", "?".yellow().bold(), text),
            EcuEvent::Success { text } => text.as_str().green().to_string(),
            EcuEvent::Error { text } => text.as_str().red().to_string(),
            EcuEvent::Warning { text } => text.as_str().yellow().to_string(),
            EcuEvent::QuitAck => "ECU acknowledged quit".dark_grey().to_string(),
            EcuEvent::Raw { text } => text.clone(),
        };
        self.stamped(line);
    }

    pub fn verification(&self, verification: &Verification) {
        if self.json {
            self.emit_json(json!({ "verification": verification }));
            return;
        }
        let line = match verification {
            Verification::NoVehicle => "No vehicle identified".yellow().to_string(),
            Verification::NoMapFlashed => "No map flashed yet".yellow().to_string(),
            Verification::Compliant { ecu_class, map } => format!(
                "{} {} on {} ECU",
                "COMPLIANT".green().bold(),
                map,
                ecu_class
            ),
            Verification::Violation { map, horsepower } => format!(
                "{} ROAD ECU running RACE map {} ({}HP)",
                "VIOLATION".red().bold().reverse(),
                map,
                horsepower
            ),
        };
        self.stamped(line);
    }

    pub fn recommendation(&self, maps: &[&MapDescriptor]) {
        if self.json {
            let ids: Vec<&str> = maps.iter().map(|m| m.id).collect();
            self.emit_json(json!({ "recommended": ids }));
            return;
        }
        self.stamped("Flash one of these ROAD maps to restore compliance:");
        for map in maps {
            self.emit(format!("  {}", describe(map)));
        }
    }

    pub fn catalog(&self) {
        if self.json {
            self.emit_json(json!({ "catalog": CATALOG }));
            return;
        }
        for map in CATALOG.iter() {
            self.emit(format!("  {}", describe(map)));
        }
    }

    pub fn status(&self, session: &Session, connected: bool) {
        if self.json {
            self.emit_json(json!({
                "connected": connected,
                "session": session,
                "compliance": session.compliance(),
            }));
            return;
        }
        let field = |value: Option<&String>| value.map_or_else(|| "-".to_string(), |v| v.clone());
        self.emit(format!(
            "  process   {}",
            if connected { "running".green() } else { "stopped".red() }
        ));
        self.emit(format!("  vehicle   {}", field(session.vehicle_id.as_ref())));
        self.emit(format!("  ecu       {}", class_label(session.ecu_class)));
        self.emit(format!("  allowed   {}", join(session.allowed_maps.iter())));
        self.emit(format!("  flashed   {}", field(session.flashed_map.as_ref())));
        self.emit(format!("  pending   {}", field(session.pending_map.as_ref())));
        self.emit(format!("  status    {:?}", session.compliance()));
    }

    pub fn confirm_override(&self) {
        if self.json {
            self.emit_json(json!({ "confirm": "override violation? [y/N]" }));
            return;
        }
        self.emit(format!(
            "{} Keep the RACE map anyway? [y/N]",
            "!".red().bold()
        ));
    }

    pub fn info(&self, text: &str) {
        if self.json {
            self.emit_json(json!({ "info": text }));
        } else {
            self.stamped(text.dark_grey());
        }
    }

    pub fn error(&self, text: &str) {
        if self.json {
            self.emit_json(json!({ "error": text }));
        } else {
            self.stamped(text.red());
        }
    }
}

fn class_label(class: EcuClass) -> StyledContent<String> {
    match class {
        EcuClass::Race => class.to_string().red().bold(),
        EcuClass::Road => class.to_string().green(),
        EcuClass::Unknown => class.to_string().dark_grey(),
    }
}

fn describe(map: &MapDescriptor) -> String {
    let class = match map.class {
        MapClass::Road => "ROAD".green(),
        MapClass::Race => "RACE".red(),
    };
    format!("{}  {:<22} {:>3}HP  {}", map.id, map.label, map.horsepower, class)
}

fn join<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let list: Vec<&str> = items.map(String::as_str).collect();
    if list.is_empty() {
        "-".to_string()
    } else {
        list.join(",")
    }
}
