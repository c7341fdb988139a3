use crate::error::CommandError;
use crate::executor::exit_code;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, warn};

/// A command started by [`crate::CommandExecutor::execute_background`].
///
/// Output goes to the files given at start. Dropping the handle kills the process.
#[derive(Debug)]
pub struct BackgroundCommand {
    command: String,
    child: Child,
    pid: Option<u32>,
}

impl BackgroundCommand {
    pub(crate) fn new(command: String, child: Child) -> Self {
        let pid = child.id();
        Self {
            command,
            child,
            pid,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Exit code if the process has already finished.
    pub fn try_exit_code(&mut self) -> Result<Option<i32>, CommandError> {
        self.child
            .try_wait()
            .map(|status| status.map(exit_code))
            .map_err(|source| CommandError::Io {
                command: self.command.clone(),
                source,
            })
    }

    /// Waits for the process to exit, up to `timeout`.
    pub async fn wait(&mut self, timeout: Duration) -> Result<i32, CommandError> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => Ok(exit_code(status)),
            Ok(Err(source)) => Err(CommandError::Io {
                command: self.command.clone(),
                source,
            }),
            Err(_) => Err(CommandError::Timeout {
                command: self.command.clone(),
                timeout,
                killed: false,
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }

    /// Asks the process to stop with SIGTERM, then kills it after `grace`.
    pub async fn terminate(&mut self, grace: Duration) -> Result<i32, CommandError> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                debug!(pid = pid, command = %self.command, "Sending SIGTERM");
                // SAFETY: kill(2) with a pid we spawned and still own.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
                if let Ok(Ok(status)) = tokio::time::timeout(grace, self.child.wait()).await {
                    return Ok(exit_code(status));
                }
            }
        }
        #[cfg(not(unix))]
        let _ = grace;

        warn!(pid = ?self.pid, command = %self.command, "Background command did not stop, killing");
        self.kill().await
    }

    pub async fn kill(&mut self) -> Result<i32, CommandError> {
        self.child.kill().await.map_err(|source| CommandError::Io {
            command: self.command.clone(),
            source,
        })?;
        Ok(self.try_exit_code()?.unwrap_or(-1))
    }
}
