use crate::engine::LifecycleEngine;
use crate::error::LifecycleError;
use async_trait::async_trait;
use reliability::RetryBudget;
use samples::Metadata;

/// When a resource's dependencies are torn down relative to the resource itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyDeletionOrder {
    /// Dependencies go first (e.g. node pools before their cluster)
    BeforeResource,
    #[default]
    AfterResource,
}

/// The capability set every provisionable thing implements.
///
/// The engine calls these hooks; implementations should not call each other
/// across lifecycle phases. `create`, `is_ready`, `delete` and `exists` may be
/// invoked repeatedly by the retry loop and take `&self`.
#[async_trait]
pub trait Resource: Send + Sync {
    fn name(&self) -> &str;

    /// Resource type used in sample names and metadata prefixes (e.g. `vm`, `cluster`).
    fn kind(&self) -> &str;

    fn cloud(&self) -> &str;

    fn zone(&self) -> Option<&str> {
        None
    }

    /// Provision prerequisites. Must be idempotent.
    async fn create_dependencies(&mut self, _engine: &LifecycleEngine) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Issue the provisioning call.
    async fn create(&self) -> Result<(), LifecycleError>;

    async fn post_create(&mut self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Side-effect-free status query.
    async fn is_ready(&self) -> Result<bool, LifecycleError> {
        Ok(true)
    }

    async fn delete(&self) -> Result<(), LifecycleError>;

    async fn delete_dependencies(&mut self, _engine: &LifecycleEngine) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Whether `exists` gives a meaningful answer.
    fn has_existence_check(&self) -> bool {
        false
    }

    async fn exists(&self) -> Result<bool, LifecycleError> {
        Ok(false)
    }

    fn dependency_deletion_order(&self) -> DependencyDeletionOrder {
        DependencyDeletionOrder::AfterResource
    }

    /// String-valued facts about the resource for sample metadata.
    fn resource_metadata(&self) -> Metadata {
        Metadata::new()
    }

    /// Readiness budget for this resource type. Defaults to the engine's.
    fn ready_budget(&self, default: &RetryBudget) -> RetryBudget {
        default.clone()
    }
}
