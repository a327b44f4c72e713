//! EcuFlash Core - headless controller for ECU programming sessions
//!
//! This crate provides:
//! - Domain types (map catalog, commands, events)
//! - Line protocol decoding
//! - Process channel with graceful/terminate/kill shutdown
//! - Session state and the compliance rule
//! - Command dispatcher and session controller with subscriber fan-out

// Version constants
pub const APP_VERSION_STRING: &str = "0.1.0";

pub mod channel;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod session;
pub mod streaming;
pub mod types;

// Re-export common types
pub use channel::{
    LineChannel, LineStream, LossyLineCodec, MockChannel, ProcessChannel, StopOutcome,
};
pub use config::SessionConfig;
pub use controller::{Origin, SessionController, Snapshot, Subscriber, SubscriptionId, Update};
pub use dispatcher::{CommandDispatcher, Exchange, PendingPrompt, Verification, ViolationResponse};
pub use error::{CoreError, Result};
pub use session::{Compliance, Session};
pub use streaming::{event_buffer, EventReceiver, EventSender, OverflowPolicy};
pub use types::{EcuClass, EcuCommand, EcuEvent, MapClass, MapDescriptor, CATALOG};
