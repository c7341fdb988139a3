use executor::CommandError;
use reliability::{RetryError, Retryable};
use samples::SampleError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Flavor of a provider limit that will not clear within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    /// Account or project quota
    Quota,
    /// The provider has no capacity for the request in that zone
    InsufficientCapacity,
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quota => f.write_str("quota"),
            Self::InsufficientCapacity => f.write_str("insufficient capacity"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid resource spec for {resource}: {reason}")]
    InvalidSpec { resource: String, reason: String },

    #[error("Creation of {resource} failed: {reason}")]
    Creation { resource: String, reason: String },

    #[error("Creation of {resource} failed ({kind}): {message}")]
    QuotaFailure {
        resource: String,
        kind: QuotaKind,
        message: String,
    },

    #[error("Creation of {resource} should be retried: {reason}")]
    RetryableCreation { resource: String, reason: String },

    #[error("Deletion of {resource} should be retried: {reason}")]
    RetryableDeletion { resource: String, reason: String },

    #[error("{resource} is not ready")]
    NotReady { resource: String },

    #[error("Malformed response while checking {resource}: {reason}")]
    MalformedResponse { resource: String, reason: String },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Creating {resource} ran out of retries: {source}")]
    CreateBudget {
        resource: String,
        #[source]
        source: Box<RetryError<LifecycleError>>,
    },

    #[error("{resource} did not become ready: {source}")]
    Readiness {
        resource: String,
        #[source]
        source: Box<RetryError<LifecycleError>>,
    },

    #[error("Deleting {resource} failed: {source}")]
    Deletion {
        resource: String,
        #[source]
        source: Box<RetryError<LifecycleError>>,
    },

    #[error("Dependency {dependency} of {resource} failed: {source}")]
    Dependency {
        resource: String,
        dependency: String,
        #[source]
        source: Box<LifecycleError>,
    },

    #[error(transparent)]
    Event(#[from] SampleError),

    #[error("Lifecycle operation on {resource} panicked: {message}")]
    Panicked { resource: String, message: String },
}

impl LifecycleError {
    /// Another `create` call may succeed.
    pub fn is_retryable_creation(&self) -> bool {
        matches!(self, Self::RetryableCreation { .. })
    }

    /// Another readiness probe may give a different answer.
    pub fn is_retryable_readiness(&self) -> bool {
        match self {
            Self::NotReady { .. } | Self::RetryableCreation { .. } => true,
            Self::Command(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn is_retryable_deletion(&self) -> bool {
        matches!(self, Self::RetryableDeletion { .. })
    }

    /// Quota or capacity exhaustion, possibly behind a dependency.
    pub fn quota_kind(&self) -> Option<QuotaKind> {
        match self {
            Self::QuotaFailure { kind, .. } => Some(*kind),
            Self::Dependency { source, .. } => source.quota_kind(),
            _ => None,
        }
    }

    pub fn is_quota_failure(&self) -> bool {
        self.quota_kind().is_some()
    }
}
