use crate::events::EventKind;
use crate::sample::MetadataValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("Metadata conflict on `{key}`: {provider} wants {attempted}, already {existing}")]
    MetadataConflict {
        key: String,
        existing: MetadataValue,
        attempted: MetadataValue,
        provider: String,
    },

    #[error("Metadata provider {provider} failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Handler for {event:?} failed: {source}")]
    Handler {
        event: EventKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("Publisher {publisher} failed: {source}")]
    Publish {
        publisher: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Percentile {0} is outside [0, 100]")]
    InvalidPercentile(f64),

    #[error("Cannot summarize an empty set of values")]
    EmptyValues,
}
