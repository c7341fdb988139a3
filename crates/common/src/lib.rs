pub mod config_loader;
pub mod redaction;
pub mod structured_logging;

pub use config_loader::{ConfigFormat, ConfigLoader};
pub use redaction::{redact, REDACTED};
pub use structured_logging::{
    init_structured_logging,
    ExecutionContext,
    LoggingConfig,
    OperationTimer,
    StructuredLogEntry,
};

/// Login name of the user running the process, used as the default sample owner.
pub fn current_owner() -> String {
    let name = whoami::username();
    if name.trim().is_empty() {
        "unknown".to_string()
    } else {
        name
    }
}
