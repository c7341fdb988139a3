use crate::background::BackgroundCommand;
use crate::capture::OutputCapture;
use crate::error::CommandError;
use crate::request::CommandRequest;
use crate::result::CommandResult;
use common::redact;
use reliability::{Retry, RetryBudget, RetryError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Timeout applied when a request does not set one.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// How long to keep reading pipes after the process is gone.
const PIPE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandLogMode {
    /// Log every command and its result
    Always,
    /// Log only commands that did not succeed
    OnError,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub default_timeout_secs: u64,
    pub log_mode: CommandLogMode,
    /// Variables added to every command's environment (provider credentials, etc.)
    pub base_env: BTreeMap<String, String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_COMMAND_TIMEOUT.as_secs(),
            log_mode: CommandLogMode::Always,
            base_env: BTreeMap::new(),
        }
    }
}

impl ExecutorConfig {
    pub fn default_timeout(&self) -> Duration {
        if self.default_timeout_secs == 0 {
            DEFAULT_COMMAND_TIMEOUT
        } else {
            Duration::from_secs(self.default_timeout_secs)
        }
    }
}

/// Runs external commands. Knows nothing about which tool it invokes.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs `request` to completion or until its timeout fires.
    ///
    /// A non-zero exit is only an error when the request asked for it. A timeout
    /// kills the process; whether it is returned as an error or as a flagged
    /// result depends on `raise_on_timeout`.
    pub async fn execute(&self, request: &CommandRequest) -> Result<CommandResult, CommandError> {
        request.validate()?;

        let command_line = request.command_line();
        if command_line.contains("; ") {
            warn!(
                command = %command_line,
                "Command contains '; ' and will not be run by a shell"
            );
        }
        if request.pre_log {
            info!(command = %command_line, "Running command");
        }

        let timeout = request.timeout.unwrap_or_else(|| self.config.default_timeout());
        let mut command = self.build_command(request);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            command: command_line.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(command = %command_line, pid = ?pid, timeout_ms = timeout.as_millis() as u64, "Spawned");

        let stdout = OutputCapture::spawn(child.stdout.take());
        let stderr = OutputCapture::spawn(child.stderr.take());

        let (status, timed_out, killed) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (Some(status), false, false),
            Ok(Err(source)) => {
                return Err(CommandError::Io {
                    command: command_line,
                    source,
                })
            }
            Err(_) => {
                warn!(command = %command_line, pid = ?pid, timeout_ms = timeout.as_millis() as u64, "Command timed out, killing");
                let killed = match child.kill().await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(command = %command_line, pid = ?pid, error = %e, "Failed to kill timed out command");
                        false
                    }
                };
                let status = child.try_wait().ok().flatten();
                (status, true, killed)
            }
        };

        let mut result = CommandResult {
            command: command_line,
            stdout: stdout.finish(PIPE_GRACE).await,
            stderr: stderr.finish(PIPE_GRACE).await,
            exit_code: status.map(exit_code).unwrap_or(-1),
            timed_out,
            killed,
            pid,
            duration: started.elapsed(),
        };

        self.log_result(request, &result);

        if result.timed_out {
            if request.raise_on_timeout {
                return Err(CommandError::Timeout {
                    command: result.command,
                    timeout,
                    killed: result.killed,
                    stdout: redact(&result.stdout, request.suppress_logging).to_string(),
                    stderr: redact(&result.stderr, request.suppress_logging).to_string(),
                });
            }
            return Ok(result);
        }

        if result.exit_code != 0 {
            let suppressed = request
                .suppress_failure
                .as_ref()
                .is_some_and(|suppress| suppress(&result.stdout, &result.stderr, result.exit_code));
            if suppressed {
                debug!(command = %result.command, exit_code = result.exit_code, "Failure suppressed");
                result.stderr.clear();
                result.exit_code = 0;
            } else if request.raise_on_failure {
                return Err(CommandError::Failed {
                    command: result.command,
                    exit_code: result.exit_code,
                    stdout: redact(&result.stdout, request.suppress_logging).to_string(),
                    stderr: redact(&result.stderr, request.suppress_logging).to_string(),
                });
            }
        }

        Ok(result)
    }

    /// Runs `request` under `budget`, treating a non-zero exit or a timeout as
    /// a retryable failure.
    pub async fn execute_retryable(
        &self,
        request: &CommandRequest,
        budget: RetryBudget,
    ) -> Result<CommandResult, RetryError<CommandError>> {
        let request = request.clone().raise_on_failure(true).raise_on_timeout(true);
        Retry::classified(budget)
            .describe(request.command_line())
            .execute(|| self.execute(&request))
            .await
    }

    /// Starts `request` without waiting, writing its output to the given files.
    pub async fn execute_background(
        &self,
        request: &CommandRequest,
        stdout_path: &Path,
        stderr_path: &Path,
    ) -> Result<BackgroundCommand, CommandError> {
        request.validate()?;
        let command_line = request.command_line();
        let io_error = |source: std::io::Error| CommandError::Io {
            command: command_line.clone(),
            source,
        };

        let stdout = tokio::fs::File::create(stdout_path)
            .await
            .map_err(io_error)?
            .into_std()
            .await;
        let stderr = tokio::fs::File::create(stderr_path)
            .await
            .map_err(io_error)?
            .into_std()
            .await;

        let mut command = self.build_command(request);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        let child = command.spawn().map_err(|source| CommandError::Spawn {
            command: command_line.clone(),
            source,
        })?;
        info!(command = %command_line, pid = ?child.id(), "Started background command");
        Ok(BackgroundCommand::new(command_line, child))
    }

    fn build_command(&self, request: &CommandRequest) -> Command {
        let mut command = Command::new(&request.argv[0]);
        command
            .args(&request.argv[1..])
            .envs(&self.config.base_env)
            .envs(&request.env)
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }
        command
    }

    fn log_result(&self, request: &CommandRequest, result: &CommandResult) {
        let success = result.is_success();
        let should_log = match self.config.log_mode {
            CommandLogMode::Always => true,
            CommandLogMode::OnError => !success,
            CommandLogMode::Never => false,
        };
        if !should_log {
            return;
        }

        let stdout = redact(&result.stdout, request.suppress_logging);
        let stderr = redact(&result.stderr, request.suppress_logging);
        let duration_ms = result.duration.as_millis() as u64;
        if success {
            info!(
                command = %result.command,
                exit_code = result.exit_code,
                duration_ms = duration_ms,
                stdout = %stdout,
                stderr = %stderr,
                "Ran command"
            );
        } else {
            warn!(
                command = %result.command,
                exit_code = result.exit_code,
                timed_out = result.timed_out,
                killed = result.killed,
                duration_ms = duration_ms,
                stdout = %stdout,
                stderr = %stderr,
                "Command did not succeed"
            );
        }
    }
}

pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_and_zero_timeout() {
        let config = ExecutorConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_secs(300));
        assert_eq!(config.log_mode, CommandLogMode::Always);

        let zero = ExecutorConfig {
            default_timeout_secs: 0,
            ..ExecutorConfig::default()
        };
        assert_eq!(zero.default_timeout(), DEFAULT_COMMAND_TIMEOUT);
    }

    #[test]
    fn test_config_from_json() {
        let config: ExecutorConfig = serde_json::from_str(
            r#"{"default_timeout_secs": 60, "log_mode": "on_error", "base_env": {"CLOUDSDK_CORE_DISABLE_PROMPTS": "1"}}"#,
        )
        .unwrap();
        assert_eq!(config.default_timeout(), Duration::from_secs(60));
        assert_eq!(config.log_mode, CommandLogMode::OnError);
        assert_eq!(config.base_env.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_happens_before_spawn() {
        let executor = CommandExecutor::default();
        let err = executor
            .execute(&CommandRequest::new(Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Validation { .. }));
    }
}
