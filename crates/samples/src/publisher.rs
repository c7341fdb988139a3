use crate::error::SampleError;
use crate::sample::SampleRecord;
use anyhow::Context;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// A sink for collected samples.
pub trait SamplePublisher: Send + Sync {
    fn name(&self) -> &str;

    fn publish(&self, samples: &[SampleRecord]) -> Result<(), SampleError>;
}

/// Writes a summary of each sample to the log.
#[derive(Debug, Default)]
pub struct LogPublisher;

impl SamplePublisher for LogPublisher {
    fn name(&self) -> &str {
        "log"
    }

    fn publish(&self, samples: &[SampleRecord]) -> Result<(), SampleError> {
        info!(count = samples.len(), "Publishing samples");
        for record in samples {
            info!(
                test = %record.test,
                metric = %record.metric,
                value = record.value,
                unit = %record.unit,
                sample_uri = %record.sample_uri,
                "Sample"
            );
        }
        Ok(())
    }
}

/// Appends one JSON object per sample to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesPublisher {
    path: PathBuf,
}

impl JsonLinesPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, samples: &[SampleRecord]) -> anyhow::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        for record in samples {
            serde_json::to_writer(&mut writer, record).context("Failed to serialize sample")?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl SamplePublisher for JsonLinesPublisher {
    fn name(&self) -> &str {
        "json_lines"
    }

    fn publish(&self, samples: &[SampleRecord]) -> Result<(), SampleError> {
        self.write_all(samples)
            .map_err(|source| SampleError::Publish {
                publisher: self.name().to_string(),
                source,
            })?;
        info!(path = %self.path.display(), count = samples.len(), "Wrote samples");
        Ok(())
    }
}
