//! Line channel abstraction over the ECU process

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

use crate::error::{CoreError, Result};

/// Trimmed, non-empty lines of process output. Ends when the process exits.
pub type LineStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// How a `stop` request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Process exited after the quit command
    Graceful,
    /// Process exited after SIGTERM
    Terminated,
    /// Process had to be killed
    Killed,
    /// Nothing was running
    AlreadyStopped,
}

/// Write side and lifecycle of the ECU process
///
/// Reading happens through the [`LineStream`] handed out when the channel is
/// created, so the reader never contends with writers.
#[async_trait]
pub trait LineChannel: Send + Sync {
    /// Write `line` plus a newline and flush. Concurrent calls never interleave.
    async fn write_line(&self, line: &str) -> Result<()>;

    /// Whether the process is still alive
    fn is_running(&self) -> bool;

    /// Send `grace_command`, then escalate to SIGTERM and kill on timeout.
    /// Safe to call more than once.
    async fn stop(
        &self,
        grace_command: &str,
        grace_timeout: Duration,
        terminate_timeout: Duration,
    ) -> Result<StopOutcome>;
}

/// In-memory channel for testing
///
/// Lines passed to [`MockChannel::emit`] appear on the stream as if the
/// process had printed them; written lines are recorded.
pub struct MockChannel {
    written: Mutex<Vec<String>>,
    output: Mutex<Option<mpsc::UnboundedSender<String>>>,
    alive: AtomicBool,
}

impl MockChannel {
    /// Create new mock channel and its output stream
    pub fn new() -> (Self, LineStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            written: Mutex::new(Vec::new()),
            output: Mutex::new(Some(tx)),
            alive: AtomicBool::new(true),
        };
        (channel, Box::pin(UnboundedReceiverStream::new(rx)))
    }

    /// Simulate one line of process output
    pub fn emit(&self, line: &str) {
        let output = self.output.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = output.as_ref() {
            let _ = tx.send(line.to_string());
        }
    }

    /// Lines written so far
    pub fn written(&self) -> Vec<String> {
        self.written.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Simulate the process exiting on its own
    pub fn exit(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.output.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

#[async_trait]
impl LineChannel for MockChannel {
    async fn write_line(&self, line: &str) -> Result<()> {
        if !self.is_running() {
            return Err(CoreError::Write("ECU process has exited".into()));
        }
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn stop(
        &self,
        grace_command: &str,
        _grace_timeout: Duration,
        _terminate_timeout: Duration,
    ) -> Result<StopOutcome> {
        if !self.is_running() {
            return Ok(StopOutcome::AlreadyStopped);
        }
        self.write_line(grace_command).await?;
        self.exit();
        Ok(StopOutcome::Graceful)
    }
}
