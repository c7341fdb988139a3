use crate::error::CommandError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Decides from `(stdout, stderr, exit_code)` whether a non-zero exit should be
/// reported as success.
pub type SuppressFailure = Arc<dyn Fn(&str, &str, i32) -> bool + Send + Sync>;

/// One invocation of an external program.
#[derive(Clone)]
pub struct CommandRequest {
    pub(crate) argv: Vec<String>,
    pub(crate) env: BTreeMap<String, String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) raise_on_failure: bool,
    pub(crate) raise_on_timeout: bool,
    pub(crate) suppress_failure: Option<SuppressFailure>,
    pub(crate) suppress_logging: bool,
    pub(crate) pre_log: bool,
}

impl CommandRequest {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            timeout: None,
            cwd: None,
            raise_on_failure: false,
            raise_on_timeout: true,
            suppress_failure: None,
            suppress_logging: false,
            pre_log: false,
        }
    }

    /// Builds a request from loosely typed argv, e.g. a list read from a config
    /// file. Every element must be a JSON string.
    pub fn from_json_argv(values: &[Value]) -> Result<Self, CommandError> {
        let mut argv = Vec::with_capacity(values.len());
        for (index, value) in values.iter().enumerate() {
            match value {
                Value::String(s) => argv.push(s.clone()),
                other => {
                    return Err(CommandError::Validation {
                        command: render_json_argv(values),
                        reason: format!(
                            "argument {} is a {}, not a string: {}",
                            index,
                            json_kind(other),
                            other
                        ),
                    })
                }
            }
        }
        Ok(Self::new(argv))
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Return `CommandError::Failed` on a non-zero exit.
    pub fn raise_on_failure(mut self, raise: bool) -> Self {
        self.raise_on_failure = raise;
        self
    }

    /// Return `CommandError::Timeout` instead of a timed-out result.
    pub fn raise_on_timeout(mut self, raise: bool) -> Self {
        self.raise_on_timeout = raise;
        self
    }

    pub fn suppress_failure<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str, &str, i32) -> bool + Send + Sync + 'static,
    {
        self.suppress_failure = Some(Arc::new(predicate));
        self
    }

    /// Redact stdout and stderr in logs and errors.
    pub fn suppress_logging(mut self, suppress: bool) -> Self {
        self.suppress_logging = suppress;
        self
    }

    /// Log the command line before it runs.
    pub fn pre_log(mut self, pre_log: bool) -> Self {
        self.pre_log = pre_log;
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_logging_suppressed(&self) -> bool {
        self.suppress_logging
    }

    /// Space-joined argv, quoting arguments that contain whitespace.
    pub fn command_line(&self) -> String {
        self.argv
            .iter()
            .map(|arg| {
                if arg.is_empty() || arg.chars().any(char::is_whitespace) {
                    format!("'{}'", arg.replace('\'', "'\\''"))
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Rejects requests the OS would fail on with a less useful error.
    pub fn validate(&self) -> Result<(), CommandError> {
        let invalid = |reason: String| CommandError::Validation {
            command: self.command_line(),
            reason,
        };

        let program = match self.argv.first() {
            Some(program) => program,
            None => return Err(invalid("argv is empty".to_string())),
        };
        if program.trim().is_empty() {
            return Err(invalid("program name is empty".to_string()));
        }
        if let Some(index) = self.argv.iter().position(|arg| arg.contains('\0')) {
            return Err(invalid(format!("argument {} contains a NUL byte", index)));
        }
        for (key, value) in &self.env {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(invalid(format!("invalid environment variable name {:?}", key)));
            }
            if value.contains('\0') {
                return Err(invalid(format!("environment variable {} contains a NUL byte", key)));
            }
        }
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(invalid("timeout must be greater than zero".to_string()));
            }
        }
        if let Some(cwd) = &self.cwd {
            if !cwd.is_dir() {
                return Err(invalid(format!(
                    "working directory {} does not exist",
                    cwd.display()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRequest")
            .field("argv", &self.argv)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("cwd", &self.cwd)
            .field("raise_on_failure", &self.raise_on_failure)
            .field("raise_on_timeout", &self.raise_on_timeout)
            .field("suppress_failure", &self.suppress_failure.is_some())
            .field("suppress_logging", &self.suppress_logging)
            .finish()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn render_json_argv(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_argv_rejects_non_string() {
        let err = CommandRequest::from_json_argv(&[json!("gcloud"), json!("--count"), json!(3)])
            .unwrap_err();
        match err {
            CommandError::Validation { command, reason } => {
                assert_eq!(command, "gcloud --count 3");
                assert!(reason.contains("argument 2 is a number"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_json_argv_accepts_strings() {
        let request = CommandRequest::from_json_argv(&[json!("aws"), json!("ec2")]).unwrap();
        assert_eq!(request.argv(), ["aws", "ec2"]);
    }

    #[test]
    fn test_validate_rejects_empty_and_nul() {
        assert!(CommandRequest::new(Vec::<String>::new()).validate().is_err());
        assert!(CommandRequest::new(["  "]).validate().is_err());
        assert!(CommandRequest::new(["echo", "a\0b"]).validate().is_err());
        assert!(CommandRequest::new(["echo"]).with_env("A=B", "x").validate().is_err());
        assert!(CommandRequest::new(["echo"])
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(CommandRequest::new(["echo"])
            .with_working_dir("/definitely/not/here")
            .validate()
            .is_err());
        assert!(CommandRequest::new(["echo", "ok"]).validate().is_ok());
    }

    #[test]
    fn test_command_line_quotes_whitespace() {
        let request = CommandRequest::new(["sh", "-c", "echo hi; exit 1"]);
        assert_eq!(request.command_line(), "sh -c 'echo hi; exit 1'");
    }
}
