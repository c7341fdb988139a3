//! Runs provider command-line tools with a hard timeout and captured output.

pub mod background;
pub mod error;
pub mod executor;
pub mod request;
pub mod result;

mod capture;

pub use background::BackgroundCommand;
pub use error::CommandError;
pub use executor::{CommandExecutor, CommandLogMode, ExecutorConfig, DEFAULT_COMMAND_TIMEOUT};
pub use request::{CommandRequest, SuppressFailure};
pub use result::{CommandOutcome, CommandResult};
