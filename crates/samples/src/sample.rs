use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for MetadataValue {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// One measurement. Immutable once built; run-level fields are attached by
/// the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    metric: String,
    value: f64,
    unit: String,
    metadata: Metadata,
}

impl Sample {
    pub fn new(metric: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            value,
            unit: unit.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// Flat, publishable form of a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub metric: String,
    pub value: f64,
    pub unit: String,
    pub metadata: Metadata,
    pub test: String,
    pub owner: String,
    pub run_uri: Uuid,
    pub sample_uri: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_value_untagged_serde() {
        let mut metadata = Metadata::new();
        metadata.insert("zone".into(), "us-east1-b".into());
        metadata.insert("num_vms".into(), 2i64.into());
        metadata.insert("preemptible".into(), false.into());
        metadata.insert("disk_gb".into(), 37.5.into());

        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(
            json,
            r#"{"disk_gb":37.5,"num_vms":2,"preemptible":false,"zone":"us-east1-b"}"#
        );
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn test_sample_builder() {
        let sample = Sample::new("Deploy Time", 12.3, "seconds").with_entry("region", "eu-west-1");
        assert_eq!(sample.metric(), "Deploy Time");
        assert_eq!(sample.unit(), "seconds");
        assert_eq!(sample.metadata()["region"].to_string(), "eu-west-1");
    }
}
