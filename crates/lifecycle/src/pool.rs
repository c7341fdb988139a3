//! Bounded fan-out of lifecycle operations across independent resources.

use crate::engine::LifecycleEngine;
use crate::error::LifecycleError;
use crate::managed::ManagedResource;
use common::OperationTimer;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// A resource handed back from the pool together with how its operation went.
#[derive(Debug)]
pub struct PoolOutcome {
    pub resource: ManagedResource,
    pub result: Result<(), LifecycleError>,
}

impl PoolOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Create,
    Delete,
}

/// Creates every resource with at most `max_concurrency` in flight.
///
/// Outcomes come back in input order. One resource failing does not cancel
/// the others.
pub async fn provision_all(
    engine: Arc<LifecycleEngine>,
    resources: Vec<ManagedResource>,
    max_concurrency: usize,
) -> Vec<PoolOutcome> {
    let mut timer = OperationTimer::new("provision_all");
    timer.add_field("resources", resources.len());
    let outcomes = run_all(engine, resources, max_concurrency, Operation::Create).await;
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    info!(
        total = outcomes.len(),
        failed = failed,
        "Provisioning finished"
    );
    timer.add_field("failed", failed);
    timer.finish();
    outcomes
}

/// Deletes every resource with at most `max_concurrency` in flight.
///
/// Resources whose deletion fails are logged as leaked.
pub async fn teardown_all(
    engine: Arc<LifecycleEngine>,
    resources: Vec<ManagedResource>,
    max_concurrency: usize,
) -> Vec<PoolOutcome> {
    let mut timer = OperationTimer::new("teardown_all");
    timer.add_field("resources", resources.len());
    let outcomes = run_all(engine, resources, max_concurrency, Operation::Delete).await;
    timer.finish();
    for outcome in &outcomes {
        if let Err(e) = &outcome.result {
            warn!(
                resource = %outcome.resource.name(),
                error = %e,
                "Resource may have leaked"
            );
        }
    }
    outcomes
}

async fn run_all(
    engine: Arc<LifecycleEngine>,
    resources: Vec<ManagedResource>,
    max_concurrency: usize,
    operation: Operation,
) -> Vec<PoolOutcome> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let total = resources.len();

    for (index, mut resource) in resources.into_iter().enumerate() {
        let engine = Arc::clone(&engine);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let name = resource.name().to_string();
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    let attempt = async {
                        match operation {
                            Operation::Create => engine.create(&mut resource).await,
                            Operation::Delete => engine.delete(&mut resource).await,
                        }
                    };
                    // The handle must come back even when a provider panics.
                    let caught = AssertUnwindSafe(attempt).catch_unwind().await;
                    caught.unwrap_or_else(|panic| {
                        let message = panic_message(&*panic);
                        error!(
                            resource = %name,
                            operation = ?operation,
                            panic = %message,
                            "Lifecycle task panicked"
                        );
                        Err(LifecycleError::Panicked {
                            resource: name,
                            message,
                        })
                    })
                }
                Err(_) => Err(LifecycleError::Creation {
                    resource: name,
                    reason: "worker pool closed".to_string(),
                }),
            };
            (index, PoolOutcome { resource, result })
        });
    }

    let mut slots: Vec<Option<PoolOutcome>> = Vec::new();
    slots.resize_with(total, || None);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => slots[index] = Some(outcome),
            Err(e) => error!(error = %e, operation = ?operation, "Lifecycle task lost"),
        }
    }

    slots.into_iter().flatten().collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
