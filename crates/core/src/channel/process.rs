//! ECU process spawning and supervision using tokio::process
//!
//! stdout is framed into lines on the caller's runtime with a lossy decoder,
//! so stray bytes never end the session; stderr is drained by a background
//! task and logged, never mixed into the event stream.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStderr, Command};
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use super::lines::LossyLineCodec;
use super::traits::{LineChannel, LineStream, StopOutcome};
use crate::config::SessionConfig;
use crate::error::{CoreError, Result};

/// ECU process with piped stdio
pub struct ProcessChannel {
    /// Program name for logs
    program: String,
    /// Child handle, taken by `stop`
    child: Mutex<Option<Child>>,
    /// Writer handle, serializes writes
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
}

impl ProcessChannel {
    /// Spawn the ECU process and return the channel plus its output lines
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &SessionConfig) -> Result<(Self, LineStream)> {
        let program = config.program.display().to_string();

        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| CoreError::Launch {
            program: program.clone(),
            source,
        })?;

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = child.start_kill();
                return Err(CoreError::Launch {
                    program,
                    source: std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "child stdio was not captured",
                    ),
                });
            }
        };

        spawn_stderr_logger(stderr, program.clone());

        let log_program = program.clone();
        let lines = FramedRead::new(stdout, LossyLineCodec::new(config.max_line_length))
            .map_while(move |result| match result {
                Ok(line) => Some(line),
                Err(e) => {
                    tracing::error!("Read error from {}: {}", log_program, e);
                    None
                }
            })
            .filter_map(|line| {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    tracing::debug!("<- {}", trimmed);
                    Some(trimmed.to_string())
                }
            });

        tracing::info!("ECU process {} spawned (pid {:?})", program, child.id());

        Ok((
            Self {
                program,
                child: Mutex::new(Some(child)),
                stdin: tokio::sync::Mutex::new(Some(stdin)),
            },
            Box::pin(lines),
        ))
    }

    fn child(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Process id, if still running
    pub fn id(&self) -> Option<u32> {
        self.child().as_ref().and_then(|c| c.id())
    }

    async fn send_raw(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let writer = stdin
            .as_mut()
            .ok_or_else(|| CoreError::Write("ECU process is not running".into()))?;

        let mut data = String::with_capacity(line.len() + 1);
        data.push_str(line);
        data.push('\n');

        writer
            .write_all(data.as_bytes())
            .await
            .map_err(|e| CoreError::Write(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| CoreError::Write(e.to_string()))?;
        tracing::debug!("-> {}", line);
        Ok(())
    }
}

#[async_trait]
impl LineChannel for ProcessChannel {
    async fn write_line(&self, line: &str) -> Result<()> {
        if !self.is_running() {
            return Err(CoreError::Write(format!("{} has exited", self.program)));
        }
        self.send_raw(line).await
    }

    fn is_running(&self) -> bool {
        match self.child().as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(_))) => false,
            Some(Err(_)) => false,
            None => false,
        }
    }

    async fn stop(
        &self,
        grace_command: &str,
        grace_timeout: Duration,
        terminate_timeout: Duration,
    ) -> Result<StopOutcome> {
        let taken = {
            let mut guard = self.child();
            guard.take()
        };
        let Some(mut child) = taken else {
            return Ok(StopOutcome::AlreadyStopped);
        };

        if let Ok(Some(status)) = child.try_wait() {
            tracing::info!("ECU process {} already exited with {}", self.program, status);
            self.stdin.lock().await.take();
            return Ok(StopOutcome::AlreadyStopped);
        }

        if let Err(e) = self.send_raw(grace_command).await {
            tracing::debug!("Quit command not delivered: {}", e);
        }
        // Closing stdin gives the process an EOF as a second exit cue
        self.stdin.lock().await.take();

        if let Ok(status) = timeout(grace_timeout, child.wait()).await {
            tracing::info!("ECU process {} exited with {}", self.program, status?);
            return Ok(StopOutcome::Graceful);
        }

        tracing::warn!(
            "ECU process {} did not exit within {}ms, terminating",
            self.program,
            grace_timeout.as_millis()
        );
        if let Err(e) = terminate(&mut child) {
            tracing::warn!("Failed to signal {}: {}", self.program, e);
        }

        if let Ok(status) = timeout(terminate_timeout, child.wait()).await {
            tracing::info!("ECU process {} terminated with {}", self.program, status?);
            return Ok(StopOutcome::Terminated);
        }

        tracing::warn!("Force killing ECU process {}", self.program);
        child.kill().await?;
        Ok(StopOutcome::Killed)
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

fn spawn_stderr_logger(stderr: ChildStderr, program: String) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tracing::debug!("{} stderr: {}", program, line),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("{} stderr closed: {}", program, e);
                    break;
                }
            }
        }
    });
}
