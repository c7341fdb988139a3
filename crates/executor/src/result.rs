use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Success,
    NonZeroExit,
    TimedOut,
    /// Timed out and the kill signal could not be delivered
    KillFailed,
}

/// Captured output of a finished or timed-out process.
///
/// On unix a process terminated by a signal reports `-signal` as its exit code.
/// A timed-out process that could not be reaped reports `-1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub killed: bool,
    pub pid: Option<u32>,
    pub duration: Duration,
}

impl CommandResult {
    pub fn outcome(&self) -> CommandOutcome {
        match (self.timed_out, self.killed, self.exit_code) {
            (true, true, _) => CommandOutcome::TimedOut,
            (true, false, _) => CommandOutcome::KillFailed,
            (false, _, 0) => CommandOutcome::Success,
            (false, _, _) => CommandOutcome::NonZeroExit,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome() == CommandOutcome::Success
    }

    /// Multi-line summary used in debug logs.
    pub fn debug_text(&self, redact: bool) -> String {
        format!(
            "Ran: {{{}}}\nReturnCode:{}{}\nSTDOUT: {}\nSTDERR: {}",
            self.command,
            self.exit_code,
            if self.timed_out { " (timed out)" } else { "" },
            common::redact(&self.stdout, redact),
            common::redact(&self.stderr, redact),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32, timed_out: bool, killed: bool) -> CommandResult {
        CommandResult {
            command: "true".into(),
            stdout: "out".into(),
            stderr: "err".into(),
            exit_code,
            timed_out,
            killed,
            pid: Some(1),
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(result(0, false, false).outcome(), CommandOutcome::Success);
        assert_eq!(result(2, false, false).outcome(), CommandOutcome::NonZeroExit);
        assert_eq!(result(-9, true, true).outcome(), CommandOutcome::TimedOut);
        assert_eq!(result(-1, true, false).outcome(), CommandOutcome::KillFailed);
    }

    #[test]
    fn test_debug_text_redacts() {
        let text = result(1, false, false).debug_text(true);
        assert!(text.contains("ReturnCode:1"));
        assert!(text.contains("STDOUT: [REDACTED]"));
        assert!(!text.contains("err\n"));
    }
}
