use crate::resource::Resource;
use samples::{Metadata, MetadataValue, ResourceRef, Sample};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Unprovisioned,
    Provisioning,
    Ready,
    Failed,
    Deleting,
    Deleted,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unprovisioned => "unprovisioned",
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Wall-clock durations recorded by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceTimings {
    /// Time spent in the provisioning call
    pub create: Option<Duration>,
    /// From the start of creation until the resource reported ready
    pub ready: Option<Duration>,
    pub delete: Option<Duration>,
}

/// A resource plus the lifecycle state the engine keeps for it.
///
/// Lifecycle calls take `&mut ManagedResource`, so a single resource can
/// never have two creations or deletions in flight.
pub struct ManagedResource {
    resource: Box<dyn Resource>,
    pub(crate) status: ResourceStatus,
    pub(crate) timings: ResourceTimings,
}

impl ManagedResource {
    pub fn new(resource: impl Resource + 'static) -> Self {
        Self::from_boxed(Box::new(resource))
    }

    pub fn from_boxed(resource: Box<dyn Resource>) -> Self {
        Self {
            resource,
            status: ResourceStatus::Unprovisioned,
            timings: ResourceTimings::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }

    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    pub fn timings(&self) -> &ResourceTimings {
        &self.timings
    }

    pub fn resource(&self) -> &dyn Resource {
        self.resource.as_ref()
    }

    pub(crate) fn resource_mut(&mut self) -> &mut dyn Resource {
        self.resource.as_mut()
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            name: self.resource.name().to_string(),
            kind: self.resource.kind().to_string(),
            cloud: self.resource.cloud().to_string(),
        }
    }

    /// Reporting metadata with identity fields filled in.
    pub fn metadata(&self) -> Metadata {
        let mut metadata = self.resource.resource_metadata();
        metadata
            .entry("name".to_string())
            .or_insert_with(|| MetadataValue::from(self.resource.name()));
        metadata
            .entry("cloud".to_string())
            .or_insert_with(|| MetadataValue::from(self.resource.cloud()));
        if let Some(zone) = self.resource.zone() {
            metadata
                .entry("zone".to_string())
                .or_insert_with(|| MetadataValue::from(zone));
        }
        metadata
    }

    /// `"<kind> Create Time"`, `"<kind> Ready Time"` and `"<kind> Delete Time"`
    /// for whichever phases have completed, in seconds.
    pub fn timing_samples(&self) -> Vec<Sample> {
        let kind = self.resource.kind();
        let metadata = self.metadata();
        [
            ("Create Time", self.timings.create),
            ("Ready Time", self.timings.ready),
            ("Delete Time", self.timings.delete),
        ]
        .into_iter()
        .filter_map(|(label, duration)| {
            duration.map(|d| {
                Sample::new(format!("{} {}", kind, label), d.as_secs_f64(), "seconds")
                    .with_metadata(metadata.clone())
            })
        })
        .collect()
    }
}

impl fmt::Debug for ManagedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedResource")
            .field("name", &self.resource.name())
            .field("kind", &self.resource.kind())
            .field("status", &self.status)
            .field("timings", &self.timings)
            .finish()
    }
}
