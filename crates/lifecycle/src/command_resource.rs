use crate::classifier::FailureClassifier;
use crate::engine::LifecycleEngine;
use crate::error::LifecycleError;
use crate::managed::ManagedResource;
use crate::resource::{DependencyDeletionOrder, Resource};
use async_trait::async_trait;
use executor::{CommandError, CommandExecutor, CommandRequest, CommandResult};
use reliability::{duration_from_secs, RetryBudget, MAX_DURATION};
use samples::{Metadata, MetadataValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Extra substrings recognised in create failures, on top of the provider's table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureMarkers {
    pub quota: Vec<String>,
    pub capacity: Vec<String>,
    pub transient: Vec<String>,
}

fn default_kind() -> String {
    "resource".to_string()
}

fn default_cloud() -> String {
    "generic".to_string()
}

/// A resource whose lifecycle is a set of external commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResourceSpec {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    #[serde(default)]
    pub zone: Option<String>,
    pub create: Vec<String>,
    pub delete: Vec<String>,
    /// Readiness probe; a zero exit counts as ready unless a marker is set
    #[serde(default)]
    pub ready: Option<Vec<String>>,
    /// Exits zero while the resource exists
    #[serde(default)]
    pub exists: Option<Vec<String>>,
    /// Substring of the probe's stdout that means ready
    #[serde(default)]
    pub ready_marker: Option<String>,
    /// Dotted path into the probe's JSON stdout, e.g. `status.phase`
    #[serde(default)]
    pub ready_json_field: Option<String>,
    /// Expected value at `ready_json_field`; without it the field must be truthy
    #[serde(default)]
    pub ready_json_value: Option<Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<CommandResourceSpec>,
    #[serde(default)]
    pub delete_dependencies_first: bool,
    /// Negative disables the readiness deadline
    #[serde(default)]
    pub ready_timeout_secs: Option<f64>,
    #[serde(default)]
    pub poll_interval_secs: Option<f64>,
    #[serde(default)]
    pub command_timeout_secs: Option<f64>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub failure_markers: FailureMarkers,
}

impl CommandResourceSpec {
    pub fn new(
        name: impl Into<String>,
        create: Vec<String>,
        delete: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: default_kind(),
            cloud: default_cloud(),
            zone: None,
            create,
            delete,
            ready: None,
            exists: None,
            ready_marker: None,
            ready_json_field: None,
            ready_json_value: None,
            metadata: BTreeMap::new(),
            dependencies: Vec::new(),
            delete_dependencies_first: false,
            ready_timeout_secs: None,
            poll_interval_secs: None,
            command_timeout_secs: None,
            env: BTreeMap::new(),
            failure_markers: FailureMarkers::default(),
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> LifecycleError {
        LifecycleError::InvalidSpec {
            resource: self.name.clone(),
            reason: reason.into(),
        }
    }

    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("name is empty"));
        }
        if self.create.is_empty() {
            return Err(self.invalid("create command is empty"));
        }
        if self.delete.is_empty() {
            return Err(self.invalid("delete command is empty"));
        }
        for (field, argv) in [("ready", &self.ready), ("exists", &self.exists)] {
            if matches!(argv, Some(argv) if argv.is_empty()) {
                return Err(self.invalid(format!("{} command is empty", field)));
            }
        }
        if self.ready.is_none() && (self.ready_marker.is_some() || self.ready_json_field.is_some()) {
            return Err(self.invalid("ready_marker and ready_json_field need a ready command"));
        }
        if self.ready_json_value.is_some() && self.ready_json_field.is_none() {
            return Err(self.invalid("ready_json_value needs ready_json_field"));
        }
        // A negative ready timeout disables the deadline.
        if let Some(secs) = self.ready_timeout_secs.filter(|secs| !(*secs < 0.0)) {
            duration_from_secs(secs)
                .map_err(|reason| self.invalid(format!("ready_timeout_secs: {}", reason)))?;
        }
        for (field, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("command_timeout_secs", self.command_timeout_secs),
        ] {
            if let Some(secs) = value {
                duration_from_secs(secs)
                    .map_err(|reason| self.invalid(format!("{}: {}", field, reason)))?;
            }
        }
        Ok(())
    }
}

/// [`Resource`] driven by the commands in a [`CommandResourceSpec`].
///
/// Nested dependency specs become their own managed resources and go
/// through the same engine.
pub struct CommandResource {
    spec: CommandResourceSpec,
    executor: Arc<CommandExecutor>,
    classifier: FailureClassifier,
    dependencies: Vec<ManagedResource>,
}

impl CommandResource {
    pub fn from_spec(
        spec: CommandResourceSpec,
        executor: Arc<CommandExecutor>,
    ) -> Result<Self, LifecycleError> {
        spec.validate()?;

        let markers = &spec.failure_markers;
        let mut classifier = FailureClassifier::for_provider(&spec.cloud);
        for marker in &markers.quota {
            classifier = classifier.with_quota_marker(marker.clone());
        }
        for marker in &markers.capacity {
            classifier = classifier.with_capacity_marker(marker.clone());
        }
        for marker in &markers.transient {
            classifier = classifier.with_transient_marker(marker.clone());
        }

        let dependencies = spec
            .dependencies
            .iter()
            .cloned()
            .map(|dep| CommandResource::from_spec(dep, Arc::clone(&executor)).map(ManagedResource::new))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            spec,
            executor,
            classifier,
            dependencies,
        })
    }

    pub fn spec(&self) -> &CommandResourceSpec {
        &self.spec
    }

    pub fn dependencies(&self) -> &[ManagedResource] {
        &self.dependencies
    }

    fn request(&self, argv: &[String]) -> CommandRequest {
        let request = CommandRequest::new(argv.iter().cloned()).with_envs(self.spec.env.clone());
        match self.spec.command_timeout_secs {
            Some(secs) => request.with_timeout(secs_or_max(secs)),
            None => request,
        }
    }

    fn ready_from_output(&self, result: &CommandResult) -> Result<bool, LifecycleError> {
        if let Some(field) = &self.spec.ready_json_field {
            let malformed = |reason: String| LifecycleError::MalformedResponse {
                resource: self.spec.name.clone(),
                reason,
            };
            let parsed: Value = serde_json::from_str(result.stdout.trim())
                .map_err(|e| malformed(format!("stdout is not JSON: {}", e)))?;
            let found = lookup(&parsed, field)
                .ok_or_else(|| malformed(format!("field `{}` missing", field)))?;
            return Ok(match &self.spec.ready_json_value {
                Some(expected) => found == expected,
                None => is_truthy(found),
            });
        }
        if let Some(marker) = &self.spec.ready_marker {
            return Ok(result.stdout.contains(marker.as_str()));
        }
        Ok(true)
    }
}

/// Overrides are validated up front; anything out of range still saturates.
fn secs_or_max(secs: f64) -> Duration {
    duration_from_secs(secs).unwrap_or(MAX_DURATION)
}

/// Follows a dotted path through objects and arrays.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[async_trait]
impl Resource for CommandResource {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn kind(&self) -> &str {
        &self.spec.kind
    }

    fn cloud(&self) -> &str {
        &self.spec.cloud
    }

    fn zone(&self) -> Option<&str> {
        self.spec.zone.as_deref()
    }

    async fn create_dependencies(&mut self, engine: &LifecycleEngine) -> Result<(), LifecycleError> {
        for dependency in &mut self.dependencies {
            engine
                .create(dependency)
                .await
                .map_err(|e| LifecycleError::Dependency {
                    resource: self.spec.name.clone(),
                    dependency: dependency.name().to_string(),
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }

    async fn create(&self) -> Result<(), LifecycleError> {
        let request = self.request(&self.spec.create).raise_on_failure(true);
        match self.executor.execute(&request).await {
            Ok(_) => Ok(()),
            Err(CommandError::Failed { stdout, stderr, .. }) => {
                let error = self
                    .classifier
                    .creation_error(&self.spec.name, &format!("{}\n{}", stderr, stdout));
                if error.is_quota_failure() {
                    return Err(error);
                }
                if self.has_existence_check() && matches!(self.exists().await, Ok(true)) {
                    info!(resource = %self.spec.name, "Create failed but resource exists; reusing it");
                    return Ok(());
                }
                Err(error)
            }
            Err(e @ CommandError::Timeout { .. }) => Err(LifecycleError::RetryableCreation {
                resource: self.spec.name.clone(),
                reason: e.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_ready(&self) -> Result<bool, LifecycleError> {
        let Some(argv) = &self.spec.ready else {
            return Ok(true);
        };
        let result = self.executor.execute(&self.request(argv)).await?;
        if result.exit_code != 0 {
            return Ok(false);
        }
        self.ready_from_output(&result)
    }

    async fn delete(&self) -> Result<(), LifecycleError> {
        let request = self.request(&self.spec.delete).raise_on_failure(true);
        self.executor.execute(&request).await?;
        Ok(())
    }

    /// Dependencies are deleted in reverse creation order. Every one is
    /// attempted; the first failure is returned.
    async fn delete_dependencies(&mut self, engine: &LifecycleEngine) -> Result<(), LifecycleError> {
        let mut first_error = None;
        for dependency in self.dependencies.iter_mut().rev() {
            if let Err(e) = engine.delete(dependency).await {
                warn!(
                    resource = %self.spec.name,
                    dependency = %dependency.name(),
                    error = %e,
                    "Failed to delete dependency"
                );
                first_error.get_or_insert(LifecycleError::Dependency {
                    resource: self.spec.name.clone(),
                    dependency: dependency.name().to_string(),
                    source: Box::new(e),
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn has_existence_check(&self) -> bool {
        self.spec.exists.is_some()
    }

    async fn exists(&self) -> Result<bool, LifecycleError> {
        let Some(argv) = &self.spec.exists else {
            return Ok(false);
        };
        let result = self.executor.execute(&self.request(argv)).await?;
        Ok(result.exit_code == 0)
    }

    fn dependency_deletion_order(&self) -> DependencyDeletionOrder {
        if self.spec.delete_dependencies_first {
            DependencyDeletionOrder::BeforeResource
        } else {
            DependencyDeletionOrder::AfterResource
        }
    }

    fn resource_metadata(&self) -> Metadata {
        self.spec
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), MetadataValue::from(v.as_str())))
            .collect()
    }

    fn ready_budget(&self, default: &RetryBudget) -> RetryBudget {
        let mut budget = default.clone();
        if let Some(secs) = self.spec.ready_timeout_secs {
            budget = if secs < 0.0 {
                budget.without_timeout()
            } else {
                budget.with_timeout(secs_or_max(secs))
            };
        }
        if let Some(secs) = self.spec.poll_interval_secs {
            budget = budget.with_poll_interval(secs_or_max(secs));
        }
        budget
    }
}
