//! Resource lifecycle engine.
//!
//! Every provisionable thing implements [`Resource`]. The [`LifecycleEngine`]
//! drives a [`ManagedResource`] through
//! `Unprovisioned -> Provisioning -> Ready | Failed -> Deleting -> Deleted`,
//! retrying transient failures under the configured budgets, and the
//! [`pool`] functions fan that out across many resources with a concurrency cap.

pub mod classifier;
pub mod command_resource;
pub mod engine;
pub mod error;
pub mod managed;
pub mod pool;
pub mod resource;

pub use classifier::{FailureClass, FailureClassifier};
pub use command_resource::{CommandResource, CommandResourceSpec};
pub use engine::{LifecycleConfig, LifecycleEngine};
pub use error::{LifecycleError, QuotaKind};
pub use managed::{ManagedResource, ResourceStatus, ResourceTimings};
pub use pool::{provision_all, teardown_all, PoolOutcome};
pub use resource::{DependencyDeletionOrder, Resource};
