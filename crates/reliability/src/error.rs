use std::time::Duration;
use thiserror::Error;

/// Why a retried operation stopped without succeeding.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("Retries exceeded after {attempts} attempts: {source}")]
    RetriesExceeded {
        attempts: u32,
        #[source]
        source: E,
    },

    #[error("Timed out after {timeout:?} ({attempts} attempts): {source}")]
    TimeoutExceeded {
        timeout: Duration,
        attempts: u32,
        #[source]
        source: E,
    },

    /// The operation failed with an error the predicate does not retry.
    #[error(transparent)]
    Aborted(E),

    #[error("Retry budget invalid: {reason}")]
    InvalidBudget { reason: String },
}

impl<E> RetryError<E> {
    /// The last error returned by the operation, if it ran at all.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::RetriesExceeded { source, .. }
            | Self::TimeoutExceeded { source, .. }
            | Self::Aborted(source) => Some(source),
            Self::InvalidBudget { .. } => None,
        }
    }

    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::RetriesExceeded { source, .. }
            | Self::TimeoutExceeded { source, .. }
            | Self::Aborted(source) => Some(source),
            Self::InvalidBudget { .. } => None,
        }
    }

    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExceeded { attempts, .. } | Self::TimeoutExceeded { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }

    pub fn is_budget_exhausted(&self) -> bool {
        matches!(
            self,
            Self::RetriesExceeded { .. } | Self::TimeoutExceeded { .. }
        )
    }

    pub fn map_err<F, E2>(self, f: F) -> RetryError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::RetriesExceeded { attempts, source } => RetryError::RetriesExceeded {
                attempts,
                source: f(source),
            },
            Self::TimeoutExceeded {
                timeout,
                attempts,
                source,
            } => RetryError::TimeoutExceeded {
                timeout,
                attempts,
                source: f(source),
            },
            Self::Aborted(source) => RetryError::Aborted(f(source)),
            Self::InvalidBudget { reason } => RetryError::InvalidBudget { reason },
        }
    }
}
