//! Benchmark samples, run events, and the path from measurement to publisher.

pub mod collector;
pub mod context;
pub mod error;
pub mod events;
pub mod metadata;
pub mod percentiles;
pub mod publisher;
pub mod sample;

pub use collector::SampleCollector;
pub use context::RunContext;
pub use error::SampleError;
pub use events::{Event, EventKind, EventRegistry, HandlerId, ResourceRef, RunPhase};
pub use metadata::{
    parse_key_value_pairs, MetadataConflictMode, MetadataPipeline, MetadataProvider,
    ResourceMetadataProvider, StaticMetadataProvider,
};
pub use percentiles::{percentile_samples, percentile_summary, DEFAULT_PERCENTILES};
pub use publisher::{JsonLinesPublisher, LogPublisher, SamplePublisher};
pub use sample::{Metadata, MetadataValue, Sample, SampleRecord};
