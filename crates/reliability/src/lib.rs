//! Retry primitive shared by command execution and the resource lifecycle engine.
//!
//! An operation is re-invoked until it succeeds, fails with an error the
//! caller did not mark retryable, exhausts its attempt budget, or runs past
//! its deadline. Sleeps between attempts are fuzzed to spread out polling
//! when many resources are driven in parallel.

pub mod budget;
pub mod error;
pub mod retry;

pub use budget::{
    duration_from_secs, RetryBudget, DEFAULT_FUZZ, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT,
    MAX_DURATION,
};
pub use error::RetryError;
pub use retry::{Retry, Retryable};
