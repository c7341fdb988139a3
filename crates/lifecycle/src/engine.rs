use crate::error::LifecycleError;
use crate::managed::{ManagedResource, ResourceStatus};
use crate::resource::{DependencyDeletionOrder, Resource};
use reliability::{Retry, RetryBudget, RetryError};
use samples::{Event, EventRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Retry budgets for each lifecycle phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Applied to `Resource::create` while it reports retryable failures
    pub create_budget: RetryBudget,
    /// Default readiness polling; resources may override it
    pub ready_budget: RetryBudget,
    pub delete_budget: RetryBudget,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            create_budget: RetryBudget::default(),
            ready_budget: RetryBudget::default()
                .with_poll_interval(Duration::from_secs(30))
                .with_timeout(Duration::from_secs(1200)),
            delete_budget: RetryBudget::default()
                .with_poll_interval(Duration::from_secs(10))
                .with_timeout(Duration::from_secs(600)),
        }
    }
}

/// Drives resources through their lifecycle and reports each transition
/// on the run's event registry.
#[derive(Debug, Clone)]
pub struct LifecycleEngine {
    config: LifecycleConfig,
    events: Arc<EventRegistry>,
}

impl LifecycleEngine {
    pub fn new(config: LifecycleConfig, events: Arc<EventRegistry>) -> Self {
        Self { config, events }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    /// Creates dependencies, provisions the resource, runs post-create setup
    /// and polls until it reports ready.
    ///
    /// Only an `Unprovisioned` (or interrupted `Provisioning`) resource is
    /// created; any other status returns immediately. On error the resource
    /// is left `Failed` and remains eligible for [`LifecycleEngine::delete`].
    pub async fn create(&self, managed: &mut ManagedResource) -> Result<(), LifecycleError> {
        match managed.status {
            ResourceStatus::Unprovisioned | ResourceStatus::Provisioning => {}
            status => {
                debug!(resource = %managed.name(), status = %status, "Create skipped");
                return Ok(());
            }
        }

        let resource_ref = managed.resource_ref();
        self.events.fire(&Event::ResourceProvisioning {
            resource: resource_ref.clone(),
        })?;
        managed.status = ResourceStatus::Provisioning;
        info!(resource = %resource_ref.name, kind = %resource_ref.kind, "Provisioning resource");

        let started = Instant::now();
        match self.provision(managed, started).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                managed.status = ResourceStatus::Ready;
                managed.timings.ready = Some(elapsed);
                info!(
                    resource = %resource_ref.name,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "Resource ready"
                );
                self.events.fire(&Event::ResourceReady {
                    resource: resource_ref,
                    elapsed,
                })?;
                Ok(())
            }
            Err(e) => {
                managed.status = ResourceStatus::Failed;
                error!(resource = %resource_ref.name, error = %e, "Resource creation failed");
                if let Err(handler_error) = self.events.fire(&Event::ResourceFailed {
                    resource: resource_ref,
                    error: e.to_string(),
                }) {
                    warn!(error = %handler_error, "ResourceFailed handler failed");
                }
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        managed: &mut ManagedResource,
        started: Instant,
    ) -> Result<(), LifecycleError> {
        let name = managed.name().to_string();

        managed.resource_mut().create_dependencies(self).await?;

        let resource = managed.resource();
        Retry::new(self.config.create_budget.clone())
            .retry_if(LifecycleError::is_retryable_creation)
            .describe(format!("create {}", name))
            .execute(move || async move { resource.create().await })
            .await
            .map_err(|e| {
                unwrap_or_wrap(e, |source| LifecycleError::CreateBudget {
                    resource: name.clone(),
                    source,
                })
            })?;
        managed.timings.create = Some(started.elapsed());

        managed.resource_mut().post_create().await?;

        let resource = managed.resource();
        let budget = resource.ready_budget(&self.config.ready_budget);
        let resource_name = name.as_str();
        Retry::new(budget)
            .retry_if(LifecycleError::is_retryable_readiness)
            .describe(format!("wait for {}", name))
            .execute(move || async move { poll_ready(resource, resource_name).await })
            .await
            .map_err(|e| {
                unwrap_or_wrap(e, |source| LifecycleError::Readiness {
                    resource: name.clone(),
                    source,
                })
            })
    }

    /// Tears the resource and its dependencies down.
    ///
    /// A no-op for `Unprovisioned` and `Deleted` resources, so calling it
    /// twice is safe. Failures of the delete call are only surfaced when the
    /// resource has an existence check that says it is still there.
    pub async fn delete(&self, managed: &mut ManagedResource) -> Result<(), LifecycleError> {
        match managed.status {
            ResourceStatus::Unprovisioned | ResourceStatus::Deleted => {
                debug!(resource = %managed.name(), status = %managed.status, "Delete skipped");
                return Ok(());
            }
            _ => {}
        }

        let name = managed.name().to_string();
        managed.status = ResourceStatus::Deleting;
        info!(resource = %name, "Deleting resource");

        let started = Instant::now();
        let order = managed.resource().dependency_deletion_order();

        if order == DependencyDeletionOrder::BeforeResource {
            managed.resource_mut().delete_dependencies(self).await?;
        }

        let resource = managed.resource();
        let resource_name = name.as_str();
        Retry::new(self.config.delete_budget.clone())
            .retry_if(LifecycleError::is_retryable_deletion)
            .describe(format!("delete {}", name))
            .execute(move || async move { delete_once(resource, resource_name).await })
            .await
            .map_err(|e| {
                unwrap_or_wrap(e, |source| LifecycleError::Deletion {
                    resource: name.clone(),
                    source,
                })
            })?;

        if order == DependencyDeletionOrder::AfterResource {
            managed.resource_mut().delete_dependencies(self).await?;
        }

        let elapsed = started.elapsed();
        managed.status = ResourceStatus::Deleted;
        managed.timings.delete = Some(elapsed);
        info!(resource = %name, elapsed_secs = elapsed.as_secs_f64(), "Resource deleted");

        // The resource is gone either way.
        if let Err(handler_error) = self.events.fire(&Event::ResourceDeleted {
            resource: managed.resource_ref(),
        }) {
            warn!(resource = %name, error = %handler_error, "ResourceDeleted handler failed");
        }
        Ok(())
    }
}

async fn poll_ready(resource: &dyn Resource, name: &str) -> Result<(), LifecycleError> {
    if resource.is_ready().await? {
        Ok(())
    } else {
        Err(LifecycleError::NotReady {
            resource: name.to_string(),
        })
    }
}

/// One deletion attempt, with failures filtered through the existence check.
async fn delete_once(resource: &dyn Resource, name: &str) -> Result<(), LifecycleError> {
    match resource.delete().await {
        Ok(()) if resource.has_existence_check() => match resource.exists().await {
            Ok(false) => Ok(()),
            Ok(true) => Err(LifecycleError::RetryableDeletion {
                resource: name.to_string(),
                reason: "resource still exists after delete".to_string(),
            }),
            Err(check) => Err(LifecycleError::RetryableDeletion {
                resource: name.to_string(),
                reason: format!("existence check after delete failed: {}", check),
            }),
        },
        Ok(()) => Ok(()),
        Err(e @ LifecycleError::RetryableDeletion { .. }) => Err(e),
        Err(e) if resource.has_existence_check() => match resource.exists().await {
            Ok(false) => {
                info!(resource = %name, error = %e, "Delete failed but resource is already gone");
                Ok(())
            }
            Ok(true) => Err(LifecycleError::RetryableDeletion {
                resource: name.to_string(),
                reason: e.to_string(),
            }),
            Err(check) => Err(LifecycleError::RetryableDeletion {
                resource: name.to_string(),
                reason: format!("{}; existence check failed: {}", e, check),
            }),
        },
        Err(e) => {
            warn!(resource = %name, error = %e, "Delete failed; no existence check, ignoring");
            Ok(())
        }
    }
}

/// Non-retried errors surface as themselves; exhausted budgets get wrapped.
fn unwrap_or_wrap<F>(error: RetryError<LifecycleError>, wrap: F) -> LifecycleError
where
    F: FnOnce(Box<RetryError<LifecycleError>>) -> LifecycleError,
{
    match error {
        RetryError::Aborted(inner) => inner,
        other => wrap(Box::new(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets() {
        let config = LifecycleConfig::default();
        assert_eq!(config.ready_budget.poll_interval, Duration::from_secs(30));
        assert_eq!(config.ready_budget.timeout, Some(Duration::from_secs(1200)));
        assert_eq!(config.delete_budget.poll_interval, Duration::from_secs(10));
        assert_eq!(config.delete_budget.timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.ready_budget.fuzz, 0.5);
    }

    #[test]
    fn test_aborted_error_is_unwrapped() {
        let error = RetryError::Aborted(LifecycleError::Creation {
            resource: "vm-0".into(),
            reason: "bad image".into(),
        });
        let unwrapped = unwrap_or_wrap(error, |source| LifecycleError::CreateBudget {
            resource: "vm-0".into(),
            source,
        });
        assert!(matches!(unwrapped, LifecycleError::Creation { .. }));
    }

    #[test]
    fn test_exhausted_budget_is_wrapped() {
        let error = RetryError::RetriesExceeded {
            attempts: 3,
            source: LifecycleError::NotReady {
                resource: "vm-0".into(),
            },
        };
        let wrapped = unwrap_or_wrap(error, |source| LifecycleError::Readiness {
            resource: "vm-0".into(),
            source,
        });
        match wrapped {
            LifecycleError::Readiness { source, .. } => assert_eq!(source.attempts(), Some(3)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: LifecycleConfig = toml::from_str(
            r#"
            [delete_budget]
            poll_interval_secs = 2
            timeout_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.delete_budget.poll_interval, Duration::from_secs(2));
        assert_eq!(config.ready_budget, LifecycleConfig::default().ready_budget);
    }
}
