use crate::context::RunContext;
use crate::error::SampleError;
use crate::events::{Event, EventRegistry};
use crate::metadata::MetadataPipeline;
use crate::publisher::SamplePublisher;
use crate::sample::{Sample, SampleRecord};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Shared, append-only buffer of samples for one run.
///
/// Run-level fields and a fresh `sample_uri` are attached here, not when the
/// sample is built. Safe to share across tasks.
pub struct SampleCollector {
    context: RunContext,
    pipeline: MetadataPipeline,
    events: Arc<EventRegistry>,
    publishers: Vec<Box<dyn SamplePublisher>>,
    pending: Mutex<Vec<SampleRecord>>,
    /// A batch some publishers have already accepted
    partial: Mutex<Option<PartialBatch>>,
    published: Mutex<Vec<SampleRecord>>,
}

struct PartialBatch {
    records: Vec<SampleRecord>,
    /// Publishers before this index already have the batch
    delivered: usize,
}

impl SampleCollector {
    pub fn new(context: RunContext, pipeline: MetadataPipeline, events: Arc<EventRegistry>) -> Self {
        Self {
            context,
            pipeline,
            events,
            publishers: Vec::new(),
            pending: Mutex::new(Vec::new()),
            partial: Mutex::new(None),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn with_publisher(mut self, publisher: impl SamplePublisher + 'static) -> Self {
        self.publishers.push(Box::new(publisher));
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Enriches `samples`, appends them as one batch and fires `SamplesCreated`.
    ///
    /// Nothing is appended if enrichment fails. A failing `SamplesCreated`
    /// handler is reported after the samples were stored.
    pub fn add_samples(&self, samples: Vec<Sample>, test: &str) -> Result<usize, SampleError> {
        let timestamp = Utc::now();
        let records = samples
            .into_iter()
            .map(|sample| {
                let metadata = self.pipeline.enrich(sample.metadata().clone(), &self.context)?;
                Ok(SampleRecord {
                    metric: sample.metric().to_string(),
                    value: sample.value(),
                    unit: sample.unit().to_string(),
                    metadata,
                    test: test.to_string(),
                    owner: self.context.owner.clone(),
                    run_uri: self.context.run_uri,
                    sample_uri: Uuid::new_v4(),
                    timestamp,
                })
            })
            .collect::<Result<Vec<_>, SampleError>>()?;

        let count = records.len();
        self.pending.lock().extend(records);
        debug!(test = test, count = count, "Samples added");

        self.events.fire(&Event::SamplesCreated {
            benchmark: test.to_string(),
            count,
        })?;
        Ok(count)
    }

    /// Samples collected but not yet published everywhere.
    pub fn pending(&self) -> Vec<SampleRecord> {
        let mut records: Vec<SampleRecord> = self
            .partial
            .lock()
            .as_ref()
            .map(|batch| batch.records.clone())
            .unwrap_or_default();
        records.extend(self.pending.lock().iter().cloned());
        records
    }

    pub fn published(&self) -> Vec<SampleRecord> {
        self.published.lock().clone()
    }

    /// Sends pending samples to every publisher, then marks them published.
    ///
    /// If a publisher fails, the batch is kept along with how far it got. The
    /// next call resumes at the failed publisher, so no sink sees a sample twice.
    pub fn publish(&self) -> Result<usize, SampleError> {
        let mut count = 0;
        let partial = self.partial.lock().take();
        if let Some(batch) = partial {
            count += self.deliver(batch)?;
        }

        let records = std::mem::take(&mut *self.pending.lock());
        if !records.is_empty() {
            count += self.deliver(PartialBatch {
                records,
                delivered: 0,
            })?;
        }

        if count == 0 {
            warn!(run_uri = %self.context.run_uri, "No samples to publish");
        }
        Ok(count)
    }

    fn deliver(&self, mut batch: PartialBatch) -> Result<usize, SampleError> {
        while let Some(publisher) = self.publishers.get(batch.delivered) {
            if let Err(e) = publisher.publish(&batch.records) {
                warn!(
                    publisher = publisher.name(),
                    samples = batch.records.len(),
                    "Publisher failed, batch kept for retry"
                );
                *self.partial.lock() = Some(batch);
                return Err(e);
            }
            batch.delivered += 1;
        }

        let count = batch.records.len();
        self.published.lock().extend(batch.records);
        Ok(count)
    }
}
