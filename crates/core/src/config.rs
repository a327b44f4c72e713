//! Session configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::channel::DEFAULT_MAX_LINE_LENGTH;
use crate::streaming::OverflowPolicy;
use crate::types::EcuCommand;

/// Environment variable naming the ECU simulator executable
pub const PROGRAM_ENV: &str = "ECU_SIM_PATH";

/// Configuration for one ECU session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Executable to spawn
    pub program: PathBuf,

    /// Arguments passed to the executable
    pub args: Vec<String>,

    /// Extra environment variables
    pub env: Vec<(String, String)>,

    /// Line sent to request a graceful exit
    pub quit_command: String,

    /// How long to wait after the quit command before signalling
    pub grace_timeout: Duration,

    /// How long to wait after SIGTERM before killing
    pub terminate_timeout: Duration,

    /// Events buffered between the reader task and delivery
    pub buffer_capacity: usize,

    /// What the buffer does when full
    pub overflow_policy: OverflowPolicy,

    /// Longest output line kept; the rest of a longer line is skipped
    pub max_line_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            program: Self::default_program(),
            args: Vec::new(),
            env: Vec::new(),
            quit_command: EcuCommand::Quit.to_line(),
            grace_timeout: Duration::from_secs(2),
            terminate_timeout: Duration::from_secs(1),
            buffer_capacity: 256,
            overflow_policy: OverflowPolicy::Backpressure,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl SessionConfig {
    fn default_program() -> PathBuf {
        std::env::var_os(PROGRAM_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("ecu_sim"))
    }

    /// Create with custom executable
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append an argument
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add environment variable
    pub fn with_env(mut self, key: String, value: String) -> Self {
        self.env.push((key, value));
        self
    }

    /// Set the shutdown timeout ladder
    pub fn with_timeouts(mut self, grace: Duration, terminate: Duration) -> Self {
        self.grace_timeout = grace;
        self.terminate_timeout = terminate;
        self
    }

    /// Set buffer size and overflow policy
    pub fn with_buffer(mut self, capacity: usize, policy: OverflowPolicy) -> Self {
        self.buffer_capacity = capacity.max(1);
        self.overflow_policy = policy;
        self
    }

    /// Bound the length of one output line
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max.max(1);
        self
    }
}
