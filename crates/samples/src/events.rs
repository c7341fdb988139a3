//! Typed lifecycle events and the registry that dispatches them.
//!
//! Handlers run synchronously on the firing task, in unspecified order. The
//! first handler error stops dispatch and is returned to the caller.

use crate::error::SampleError;
use crate::sample::Metadata;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

/// Phases of a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Provision,
    Prepare,
    Run,
    Cleanup,
    Teardown,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Provision => "provision",
            Self::Prepare => "prepare",
            Self::Run => "run",
            Self::Cleanup => "cleanup",
            Self::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// Identifies the resource an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRef {
    pub name: String,
    pub kind: String,
    pub cloud: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    BenchmarkStart {
        benchmark: String,
        run_uri: Uuid,
    },
    BenchmarkEnd {
        benchmark: String,
        run_uri: Uuid,
        succeeded: bool,
    },
    BeforePhase {
        phase: RunPhase,
    },
    AfterPhase {
        phase: RunPhase,
    },
    ResourceProvisioning {
        resource: ResourceRef,
    },
    ResourceReady {
        resource: ResourceRef,
        elapsed: Duration,
    },
    ResourceFailed {
        resource: ResourceRef,
        error: String,
    },
    ResourceDeleted {
        resource: ResourceRef,
    },
    SamplesCreated {
        benchmark: String,
        count: usize,
    },
    /// A named span of time worth recording alongside the samples.
    RecordEvent {
        name: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        metadata: Metadata,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    BenchmarkStart,
    BenchmarkEnd,
    BeforePhase,
    AfterPhase,
    ResourceProvisioning,
    ResourceReady,
    ResourceFailed,
    ResourceDeleted,
    SamplesCreated,
    RecordEvent,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::BenchmarkStart { .. } => EventKind::BenchmarkStart,
            Self::BenchmarkEnd { .. } => EventKind::BenchmarkEnd,
            Self::BeforePhase { .. } => EventKind::BeforePhase,
            Self::AfterPhase { .. } => EventKind::AfterPhase,
            Self::ResourceProvisioning { .. } => EventKind::ResourceProvisioning,
            Self::ResourceReady { .. } => EventKind::ResourceReady,
            Self::ResourceFailed { .. } => EventKind::ResourceFailed,
            Self::ResourceDeleted { .. } => EventKind::ResourceDeleted,
            Self::SamplesCreated { .. } => EventKind::SamplesCreated,
            Self::RecordEvent { .. } => EventKind::RecordEvent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Explicit, run-owned replacement for a global signal bus.
#[derive(Default)]
pub struct EventRegistry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<EventKind, Vec<(HandlerId, Handler)>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(kind = ?kind, handler = id.0, "Handler connected");
        id
    }

    /// Returns false if `id` was not registered.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(existing, _)| *existing == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Runs every handler registered for the event's kind.
    pub fn fire(&self, event: &Event) -> Result<(), SampleError> {
        let kind = event.kind();
        // Snapshot so handlers may connect or disconnect while running.
        let handlers: Vec<Handler> = match self.handlers.read().get(&kind) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return Ok(()),
        };

        for handler in handlers {
            if let Err(source) = handler(event) {
                error!(kind = ?kind, error = %source, "Event handler failed");
                return Err(SampleError::Handler {
                    event: kind,
                    source,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<EventKind, usize> = self
            .handlers
            .read()
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        f.debug_struct("EventRegistry")
            .field("handlers", &counts)
            .finish()
    }
}
