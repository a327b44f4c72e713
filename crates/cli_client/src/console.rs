//! Console input state: which question the next stdin line answers

use crate::input::{is_yes, Input};

/// How the next stdin line is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Command,
    PromptAnswer,
    ConfirmOverride,
}

/// What to do with one stdin line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Send verbatim to the ECU
    Answer(String),
    /// Reply to the override question
    Override(bool),
    Command(Input),
}

/// Open questions. An ECU prompt always takes the next line; the override
/// question waits behind it.
#[derive(Debug, Default)]
pub struct Console {
    prompt_open: bool,
    override_open: bool,
}

impl Console {
    pub fn mode(&self) -> Mode {
        if self.prompt_open {
            Mode::PromptAnswer
        } else if self.override_open {
            Mode::ConfirmOverride
        } else {
            Mode::Command
        }
    }

    /// Track whether the ECU is waiting for an answer.
    /// Returns true when a deferred override question should be asked again.
    pub fn set_prompt(&mut self, open: bool) -> bool {
        let reopened = self.prompt_open && !open && self.override_open;
        self.prompt_open = open;
        reopened
    }

    /// Queue the override question. Returns true if it should be asked now.
    pub fn ask_override(&mut self) -> bool {
        self.override_open = true;
        !self.prompt_open
    }

    /// Consume one line according to the current mode
    pub fn take_line(&mut self, line: &str) -> Step {
        match self.mode() {
            Mode::PromptAnswer => {
                self.prompt_open = false;
                Step::Answer(line.to_string())
            }
            Mode::ConfirmOverride => {
                self.override_open = false;
                Step::Override(is_yes(line))
            }
            Mode::Command => Step::Command(Input::parse(line)),
        }
    }

    /// Whether the override question is the next thing to answer
    pub fn override_waiting(&self) -> bool {
        self.mode() == Mode::ConfirmOverride
    }
}
