use reliability::Retryable;
use std::time::Duration;
use thiserror::Error;

/// Failures raised by the command executor.
///
/// Output fields hold captured text, or the redaction marker when the request
/// suppressed logging.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid command `{command}`: {reason}")]
    Validation { command: String, reason: String },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Command timed out after {timeout:?} ({}): {command}\nSTDOUT: {stdout}\nSTDERR: {stderr}",
        if *killed { "process killed" } else { "process could not be killed" }
    )]
    Timeout {
        command: String,
        timeout: Duration,
        killed: bool,
        stdout: String,
        stderr: String,
    },

    #[error("Command failed with exit code {exit_code}: {command}\nSTDOUT: {stdout}\nSTDERR: {stderr}")]
    Failed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("I/O error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn command(&self) -> &str {
        match self {
            Self::Validation { command, .. }
            | Self::Spawn { command, .. }
            | Self::Timeout { command, .. }
            | Self::Failed { command, .. }
            | Self::Io { command, .. } => command,
        }
    }

    /// Captured standard error, when the process ran.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Timeout { stderr, .. } | Self::Failed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    pub fn stdout(&self) -> Option<&str> {
        match self {
            Self::Timeout { stdout, .. } | Self::Failed { stdout, .. } => Some(stdout),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl Retryable for CommandError {
    /// A process that ran and failed may succeed on another attempt; a
    /// command that cannot be validated or spawned will not.
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Failed { .. } | Self::Io { .. }
        )
    }
}
