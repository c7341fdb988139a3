use samples::{
    Event, EventKind, EventRegistry, JsonLinesPublisher, Metadata, MetadataConflictMode,
    MetadataPipeline, ResourceMetadataProvider, RunContext, Sample, SampleCollector, SampleError,
    StaticMetadataProvider,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn resource_metadata() -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("zone".into(), "us-central1-a".into());
    metadata.insert("machine_type".into(), "e2-standard-2".into());
    metadata
}

#[test]
fn test_samples_share_run_uri_with_distinct_sample_uri() {
    let collector = SampleCollector::new(
        RunContext::new("deploy", "perf-bot"),
        MetadataPipeline::default(),
        Arc::new(EventRegistry::new()),
    );

    collector
        .add_samples(
            vec![
                Sample::new("Deploy Time", 12.3, "seconds"),
                Sample::new("Upload Time", 4.5, "seconds"),
            ],
            "deploy",
        )
        .unwrap();

    let records = collector.pending();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].run_uri, records[1].run_uri);
    assert_ne!(records[0].sample_uri, records[1].sample_uri);
    assert_eq!(records[0].metric, "Deploy Time");
    assert_eq!(records[1].value, 4.5);
}

#[test]
fn test_concurrent_appends_are_all_kept() {
    let collector = Arc::new(SampleCollector::new(
        RunContext::new("fanout", "perf-bot"),
        MetadataPipeline::default(),
        Arc::new(EventRegistry::new()),
    ));

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let collector = Arc::clone(&collector);
            scope.spawn(move || {
                for i in 0..25 {
                    collector
                        .add_samples(
                            vec![Sample::new("Latency", f64::from(i), "ms").with_entry("worker", worker)],
                            "fanout",
                        )
                        .unwrap();
                }
            });
        }
    });

    let records = collector.pending();
    assert_eq!(records.len(), 200);
    let uris: HashSet<_> = records.iter().map(|r| r.sample_uri).collect();
    assert_eq!(uris.len(), 200);
}

#[test]
fn test_enrichment_and_strict_conflict_with_sample_metadata() {
    let pipeline = MetadataPipeline::new(MetadataConflictMode::Strict)
        .with_provider(ResourceMetadataProvider::new("vm", resource_metadata()));
    let collector = SampleCollector::new(
        RunContext::new("iperf", "perf-bot"),
        pipeline,
        Arc::new(EventRegistry::new()),
    );

    collector
        .add_samples(vec![Sample::new("Throughput", 940.0, "Mbits/sec")], "iperf")
        .unwrap();
    let record = &collector.pending()[0];
    assert_eq!(record.metadata["vm_zone"], "us-central1-a".into());

    let err = collector
        .add_samples(
            vec![Sample::new("Throughput", 1.0, "Mbits/sec").with_entry("vm_zone", "europe-west4-a")],
            "iperf",
        )
        .unwrap_err();
    assert!(matches!(err, SampleError::MetadataConflict { .. }));
    assert_eq!(collector.pending().len(), 1);
}

#[test]
fn test_permissive_keeps_sample_value() {
    let mut labels = Metadata::new();
    labels.insert("vm_zone".into(), "ignored".into());
    let pipeline = MetadataPipeline::new(MetadataConflictMode::Permissive)
        .with_provider(StaticMetadataProvider::new(labels));
    let collector = SampleCollector::new(
        RunContext::new("iperf", "perf-bot"),
        pipeline,
        Arc::new(EventRegistry::new()),
    );

    collector
        .add_samples(
            vec![Sample::new("Throughput", 1.0, "Mbits/sec").with_entry("vm_zone", "europe-west4-a")],
            "iperf",
        )
        .unwrap();
    assert_eq!(collector.pending()[0].metadata["vm_zone"], "europe-west4-a".into());
}

#[test]
fn test_samples_created_event_and_handler_failure() {
    let events = Arc::new(EventRegistry::new());
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    events.connect(EventKind::SamplesCreated, move |event| {
        if let Event::SamplesCreated { count, .. } = event {
            counter.fetch_add(*count, Ordering::SeqCst);
        }
        Ok(())
    });

    let collector = SampleCollector::new(
        RunContext::new("fio", "perf-bot"),
        MetadataPipeline::default(),
        Arc::clone(&events),
    );
    collector
        .add_samples(vec![Sample::new("IOPS", 1200.0, "ops/s"); 3], "fio")
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 3);

    events.connect(EventKind::SamplesCreated, |_| anyhow::bail!("uploader crashed"));
    let err = collector
        .add_samples(vec![Sample::new("IOPS", 1100.0, "ops/s")], "fio")
        .unwrap_err();
    assert!(matches!(err, SampleError::Handler { event: EventKind::SamplesCreated, .. }));
}

#[test]
fn test_json_lines_publisher_writes_flat_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.jsonl");
    let collector = SampleCollector::new(
        RunContext::new("deploy", "perf-bot"),
        MetadataPipeline::default(),
        Arc::new(EventRegistry::new()),
    )
    .with_publisher(JsonLinesPublisher::new(&path));

    collector
        .add_samples(
            vec![
                Sample::new("Deploy Time", 12.3, "seconds").with_entry("region", "us-west-2"),
                Sample::new("Upload Time", 4.5, "seconds"),
            ],
            "deploy",
        )
        .unwrap();
    assert_eq!(collector.publish().unwrap(), 2);
    assert!(collector.pending().is_empty());
    assert_eq!(collector.published().len(), 2);

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    for field in ["metric", "value", "unit", "metadata", "test", "owner", "run_uri", "sample_uri", "timestamp"] {
        assert!(lines[0].get(field).is_some(), "missing {field}");
    }
    assert_eq!(lines[0]["metadata"]["region"], "us-west-2");
    assert_eq!(lines[1]["owner"], "perf-bot");
}
