//! Command dispatcher: high-level ECU operations over the line channel
//!
//! Commands are never pipelined. Starting an exchange claims it in the shared
//! snapshot before the line is written, and the claim is released only when
//! the reader task applies the event that completes it. Until then
//! `identify`, `get_allowed_maps` and `flash_map` fail with `Busy` or
//! `PromptOutstanding`. None of the operations wait on the event buffer.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

use crate::channel::{LineChannel, StopOutcome};
use crate::controller::{Origin, Snapshot, Update};
use crate::error::{CoreError, Result};
use crate::session::{Compliance, Session};
use crate::types::{
    find_map, is_valid_map_id, maps_of_class, EcuClass, EcuCommand, EcuEvent, MapClass,
    MapDescriptor,
};

/// Outstanding prompt and the command that triggered it
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PendingPrompt {
    pub text: String,
    /// `None` if the prompt arrived with no command in flight
    pub command: Option<EcuCommand>,
}

/// Request/response bookkeeping for the command currently in flight
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Exchange {
    pub in_flight: Option<EcuCommand>,
    pub pending_prompt: Option<PendingPrompt>,
}

impl Exchange {
    /// Fail unless a new exchange may start
    pub fn ensure_idle(&self) -> Result<()> {
        if let Some(prompt) = &self.pending_prompt {
            return Err(CoreError::PromptOutstanding(prompt.text.clone()));
        }
        if let Some(command) = &self.in_flight {
            return Err(CoreError::Busy(command.to_line()));
        }
        Ok(())
    }

    pub(crate) fn on_issued(&mut self, command: &EcuCommand) {
        match command {
            EcuCommand::PromptAnswer(_) => {
                if self.pending_prompt.take().is_none() {
                    tracing::warn!("Prompt answer sent with no prompt outstanding");
                }
            }
            _ if command.starts_exchange() => {
                self.in_flight = Some(command.clone());
                self.pending_prompt = None;
            }
            _ => {}
        }
    }

    pub(crate) fn on_aborted(&mut self, command: &EcuCommand) {
        if self.in_flight.as_ref() == Some(command) {
            self.in_flight = None;
        }
    }

    pub(crate) fn on_event(&mut self, event: &EcuEvent) {
        if let EcuEvent::Prompt { text } = event {
            let prompt = PendingPrompt {
                text: text.clone(),
                command: self.in_flight.clone(),
            };
            if prompt.command.is_none() {
                tracing::warn!("Prompt '{}' arrived with no command in flight", text);
            }
            if let Some(previous) = self.pending_prompt.replace(prompt) {
                tracing::warn!("Prompt '{}' replaced before it was answered", previous.text);
            }
            return;
        }

        let completed = match &self.in_flight {
            Some(command) => command.completed_by(event),
            None => event.is_terminal(),
        };
        if completed {
            self.in_flight = None;
            self.pending_prompt = None;
        }
    }
}

/// Result of a local compliance check
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub enum Verification {
    NoVehicle,
    NoMapFlashed,
    Compliant { ecu_class: EcuClass, map: String },
    Violation { map: String, horsepower: u16 },
}

impl Verification {
    /// Compliance status behind this outcome
    pub fn compliance(&self) -> Compliance {
        match self {
            Verification::NoVehicle | Verification::NoMapFlashed => Compliance::Unverified,
            Verification::Compliant { .. } => Compliance::Compliant,
            Verification::Violation { .. } => Compliance::Violation,
        }
    }
}

/// Check a session without touching it
pub fn verify_session(session: &Session) -> Verification {
    if !session.is_identified() {
        return Verification::NoVehicle;
    }
    let Some(map) = session.flashed_map.clone() else {
        return Verification::NoMapFlashed;
    };
    match session.compliance() {
        Compliance::Violation => Verification::Violation {
            horsepower: find_map(&map).map(|m| m.horsepower).unwrap_or_default(),
            map,
        },
        _ => Verification::Compliant {
            ecu_class: session.ecu_class,
            map,
        },
    }
}

/// Caller's decision on a reported violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationResponse {
    /// Keep the map and continue
    Override,
    /// Re-flash a street-legal map
    Correct,
}

/// High-level operations on one ECU session
pub struct CommandDispatcher {
    channel: Arc<dyn LineChannel>,
    state: Arc<watch::Sender<Snapshot>>,
    advisories: mpsc::UnboundedSender<Update>,
    send_lock: Mutex<()>,
    quit_command: String,
    grace_timeout: Duration,
    terminate_timeout: Duration,
}

impl CommandDispatcher {
    pub(crate) fn new(
        channel: Arc<dyn LineChannel>,
        state: Arc<watch::Sender<Snapshot>>,
        advisories: mpsc::UnboundedSender<Update>,
        quit_command: String,
        grace_timeout: Duration,
        terminate_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            state,
            advisories,
            send_lock: Mutex::new(()),
            quit_command,
            grace_timeout,
            terminate_timeout,
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.channel.is_running() {
            Ok(())
        } else {
            Err(CoreError::NotConnected)
        }
    }

    /// Atomically check `precondition` and record `command` as issued
    fn claim(
        &self,
        command: &EcuCommand,
        precondition: impl FnOnce(&Snapshot) -> Result<()>,
    ) -> Result<()> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|snapshot| {
            outcome = precondition(snapshot);
            if outcome.is_ok() {
                snapshot.on_issued(command);
            }
            outcome.is_ok()
        });
        outcome
    }

    /// Write a claimed command, releasing the claim if the write fails.
    /// Caller holds `send_lock`.
    async fn write(&self, command: EcuCommand) -> Result<()> {
        if let Err(e) = self.channel.write_line(&command.to_line()).await {
            tracing::warn!("Failed to send {}: {}", command, e);
            self.state.send_modify(|snapshot| snapshot.on_aborted(&command));
            return Err(e);
        }
        Ok(())
    }

    async fn start_exchange(&self, command: EcuCommand) -> Result<()> {
        self.ensure_connected()?;
        let _guard = self.send_lock.lock().await;
        self.claim(&command, |snapshot| snapshot.exchange.ensure_idle())?;
        self.write(command).await
    }

    /// Request vehicle identification. The result arrives as an event.
    pub async fn identify(&self) -> Result<()> {
        tracing::info!("Identifying vehicle");
        self.start_exchange(EcuCommand::Identify).await
    }

    /// Ask the process for the allowed maps of the identified vehicle
    pub async fn get_allowed_maps(&self) -> Result<()> {
        self.start_exchange(EcuCommand::GetAllowedMaps).await
    }

    /// Request a flash of `map_id`
    ///
    /// Returns once the command is written; completion arrives as a
    /// `Success` or `Error` event. Flashing a RACE map onto a ROAD ECU first
    /// emits a local advisory warning, but the command is still sent: the
    /// process decides whether the flash is applied.
    pub async fn flash_map(&self, map_id: &str) -> Result<()> {
        if !is_valid_map_id(map_id) {
            return Err(CoreError::InvalidMapId(map_id.to_string()));
        }
        let map = find_map(map_id).ok_or_else(|| CoreError::InvalidMapId(map_id.to_string()))?;
        self.ensure_connected()?;

        let _guard = self.send_lock.lock().await;
        let command = EcuCommand::FlashMap(map.id.to_string());
        let mut ecu_class = EcuClass::Unknown;
        let mut allowed = false;
        self.claim(&command, |snapshot| {
            snapshot.exchange.ensure_idle()?;
            if !snapshot.session.is_identified() {
                return Err(CoreError::NotIdentified);
            }
            ecu_class = snapshot.session.ecu_class;
            allowed = snapshot.session.allowed_maps.contains(map.id);
            Ok(())
        })?;

        if map.violates(ecu_class) {
            tracing::warn!("Flashing RACE map {} onto a ROAD ECU", map.id);
            self.advise(EcuEvent::warning(format!(
                "WARNING: {} is a RACE map ({}HP); flashing it onto a ROAD ECU is a regulatory violation",
                map.id, map.horsepower
            )));
        }
        if !allowed {
            tracing::info!("Map {} is not in the vehicle's allowed list", map.id);
        }

        tracing::info!("Initiating flash for map {}", map.id);
        self.write(command).await
    }

    /// Queue a locally raised event for delivery ahead of later process output
    fn advise(&self, event: EcuEvent) {
        let snapshot = self.state.borrow();
        let update = Update {
            seq: 0,
            origin: Origin::Local,
            event,
            session: snapshot.session.clone(),
            pending_prompt: snapshot.exchange.pending_prompt.clone(),
        };
        drop(snapshot);
        if self.advisories.send(update).is_err() {
            tracing::debug!("Advisory dropped, delivery has stopped");
        }
    }

    /// Write `answer` verbatim as the reply to the outstanding prompt
    pub async fn respond_to_prompt(&self, answer: &str) -> Result<()> {
        self.ensure_connected()?;
        let _guard = self.send_lock.lock().await;
        let command = EcuCommand::PromptAnswer(answer.to_string());
        self.claim(&command, |_| Ok(()))?;
        self.write(command).await
    }

    /// Give up on the command in flight, e.g. when the process never answers
    ///
    /// Returns the abandoned command, if any.
    pub fn abandon_exchange(&self) -> Option<EcuCommand> {
        let mut abandoned = None;
        self.state.send_if_modified(|snapshot| {
            abandoned = snapshot.exchange.in_flight.take();
            let had_prompt = snapshot.exchange.pending_prompt.take().is_some();
            snapshot.session.pending_map = None;
            abandoned.is_some() || had_prompt
        });
        if let Some(command) = &abandoned {
            tracing::warn!("Abandoned exchange for {}", command);
        }
        abandoned
    }

    /// Latest published session
    pub fn session(&self) -> Session {
        self.state.borrow().session.clone()
    }

    /// Prompt awaiting an answer, if any
    pub fn pending_prompt(&self) -> Option<PendingPrompt> {
        self.state.borrow().exchange.pending_prompt.clone()
    }

    /// Command awaiting its completing event, if any
    pub fn in_flight(&self) -> Option<EcuCommand> {
        self.state.borrow().exchange.in_flight.clone()
    }

    /// Check compliance of the current session. Purely local.
    pub fn verify(&self) -> Verification {
        let verification = verify_session(&self.state.borrow().session);
        tracing::info!("Verification: {:?}", verification);
        verification
    }

    /// Record the caller's decision on a violation
    ///
    /// For `Correct`, returns the ROAD maps that restore compliance. Empty if
    /// the session is not in violation.
    pub fn acknowledge_violation(
        &self,
        response: ViolationResponse,
    ) -> Vec<&'static MapDescriptor> {
        let Verification::Violation { map, horsepower } = self.verify() else {
            tracing::debug!("No violation to acknowledge");
            return Vec::new();
        };

        match response {
            ViolationResponse::Override => {
                tracing::warn!(
                    "Regulatory violation overridden by user: ROAD ECU running {} ({}HP)",
                    map,
                    horsepower
                );
                Vec::new()
            }
            ViolationResponse::Correct => {
                tracing::info!("Violation acknowledged, corrective ROAD map recommended");
                maps_of_class(MapClass::Road).collect()
            }
        }
    }

    /// Shut the process down through the graceful/terminate/kill ladder
    pub async fn quit(&self) -> Result<StopOutcome> {
        tracing::info!("Stopping ECU process");
        self.channel
            .stop(&self.quit_command, self.grace_timeout, self.terminate_timeout)
            .await
    }

    /// Whether the process is alive
    pub fn is_connected(&self) -> bool {
        self.channel.is_running()
    }
}
