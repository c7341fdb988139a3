use crate::context::RunContext;
use crate::error::SampleError;
use crate::sample::{Metadata, MetadataValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// What to do when two writers set the same key to different values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataConflictMode {
    #[default]
    Strict,
    /// Keep the value that was written first
    Permissive,
}

/// One enrichment stage.
///
/// Receives the metadata accumulated so far and returns the entries it wants
/// to add. The pipeline merges them according to its conflict mode.
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &str;

    fn provide(&self, current: &Metadata, context: &RunContext) -> anyhow::Result<Metadata>;
}

/// Adds a resource's reporting metadata, keys prefixed by the resource kind.
#[derive(Debug, Clone)]
pub struct ResourceMetadataProvider {
    name: String,
    prefix: String,
    metadata: Metadata,
}

impl ResourceMetadataProvider {
    /// `prefix` is joined to each key with `_`; an empty prefix keeps keys as-is.
    pub fn new(prefix: impl Into<String>, metadata: Metadata) -> Self {
        let prefix = prefix.into();
        Self {
            name: format!("resource:{}", prefix),
            prefix,
            metadata,
        }
    }
}

impl MetadataProvider for ResourceMetadataProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provide(&self, _current: &Metadata, _context: &RunContext) -> anyhow::Result<Metadata> {
        Ok(self
            .metadata
            .iter()
            .map(|(key, value)| {
                let key = if self.prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}_{}", self.prefix, key)
                };
                (key, value.clone())
            })
            .collect())
    }
}

/// Fixed user-supplied entries (e.g. `--metadata team=storage`).
#[derive(Debug, Clone)]
pub struct StaticMetadataProvider {
    metadata: Metadata,
}

impl StaticMetadataProvider {
    pub fn new(metadata: Metadata) -> Self {
        Self { metadata }
    }
}

impl MetadataProvider for StaticMetadataProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn provide(&self, _current: &Metadata, _context: &RunContext) -> anyhow::Result<Metadata> {
        Ok(self.metadata.clone())
    }
}

/// Parses `key=value` pairs. Values are stored as text.
pub fn parse_key_value_pairs<I, S>(pairs: I) -> Result<Metadata, SampleError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut metadata = Metadata::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| SampleError::InvalidMetadata(format!("expected key=value, got {pair:?}")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(SampleError::InvalidMetadata(format!("empty key in {pair:?}")));
        }
        metadata.insert(key.to_string(), MetadataValue::Text(value.trim().to_string()));
    }
    Ok(metadata)
}

/// Ordered chain of metadata providers.
#[derive(Clone, Default)]
pub struct MetadataPipeline {
    providers: Vec<Arc<dyn MetadataProvider>>,
    mode: MetadataConflictMode,
}

impl MetadataPipeline {
    pub fn new(mode: MetadataConflictMode) -> Self {
        Self {
            providers: Vec::new(),
            mode,
        }
    }

    pub fn with_provider(mut self, provider: impl MetadataProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn push(&mut self, provider: Arc<dyn MetadataProvider>) {
        self.providers.push(provider);
    }

    pub fn mode(&self) -> MetadataConflictMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Runs every provider over `metadata` in order and returns the result.
    pub fn enrich(&self, mut metadata: Metadata, context: &RunContext) -> Result<Metadata, SampleError> {
        for provider in &self.providers {
            let additions =
                provider
                    .provide(&metadata, context)
                    .map_err(|source| SampleError::Provider {
                        provider: provider.name().to_string(),
                        source,
                    })?;
            merge(&mut metadata, additions, self.mode, provider.name())?;
        }
        Ok(metadata)
    }
}

/// Merges `additions` into `target`. An existing key always keeps its value;
/// in strict mode a different incoming value is an error.
pub(crate) fn merge(
    target: &mut Metadata,
    additions: Metadata,
    mode: MetadataConflictMode,
    writer: &str,
) -> Result<(), SampleError> {
    for (key, value) in additions {
        match target.get(&key) {
            Some(existing) if *existing == value => {}
            Some(existing) => match mode {
                MetadataConflictMode::Strict => {
                    return Err(SampleError::MetadataConflict {
                        key,
                        existing: existing.clone(),
                        attempted: value,
                        provider: writer.to_string(),
                    })
                }
                MetadataConflictMode::Permissive => {
                    debug!(key = %key, writer = writer, "Keeping first metadata value");
                }
            },
            None => {
                target.insert(key, value);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RunContext {
        RunContext::new("cluster_boot", "tester")
    }

    #[test]
    fn test_resource_provider_prefixes_keys() {
        let mut resource = Metadata::new();
        resource.insert("zone".into(), "us-central1-a".into());
        let pipeline = MetadataPipeline::default()
            .with_provider(ResourceMetadataProvider::new("container_cluster", resource));

        let out = pipeline.enrich(Metadata::new(), &context()).unwrap();
        assert_eq!(out["container_cluster_zone"], "us-central1-a".into());
    }

    #[test]
    fn test_strict_conflict_errors_only_on_different_value() {
        let mut a = Metadata::new();
        a.insert("region".into(), "us-east-1".into());
        let pipeline = MetadataPipeline::new(MetadataConflictMode::Strict)
            .with_provider(StaticMetadataProvider::new(a.clone()))
            .with_provider(StaticMetadataProvider::new(a));
        assert!(pipeline.enrich(Metadata::new(), &context()).is_ok());

        let mut b = Metadata::new();
        b.insert("region".into(), "eu-west-1".into());
        let pipeline = pipeline.with_provider(StaticMetadataProvider::new(b));
        let err = pipeline.enrich(Metadata::new(), &context()).unwrap_err();
        assert!(matches!(err, SampleError::MetadataConflict { ref key, .. } if key == "region"));
    }

    #[test]
    fn test_permissive_first_writer_wins() {
        let mut first = Metadata::new();
        first.insert("image".into(), "ubuntu-2204".into());
        let mut second = Metadata::new();
        second.insert("image".into(), "debian-12".into());
        second.insert("machine_type".into(), "n2-standard-4".into());

        let pipeline = MetadataPipeline::new(MetadataConflictMode::Permissive)
            .with_provider(StaticMetadataProvider::new(first))
            .with_provider(StaticMetadataProvider::new(second));
        let out = pipeline.enrich(Metadata::new(), &context()).unwrap();

        assert_eq!(out["image"], "ubuntu-2204".into());
        assert_eq!(out["machine_type"], "n2-standard-4".into());
    }

    #[test]
    fn test_parse_key_value_pairs() {
        let metadata = parse_key_value_pairs(["team=storage", " ticket = PERF-12 "]).unwrap();
        assert_eq!(metadata["team"], "storage".into());
        assert_eq!(metadata["ticket"], "PERF-12".into());
        assert!(parse_key_value_pairs(["novalue"]).is_err());
        assert!(parse_key_value_pairs(["=x"]).is_err());
    }
}
