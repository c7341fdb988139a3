#![cfg(unix)]

use anyhow::Result;
use cli::{run, RunConfig, WorkloadSpec};
use lifecycle::CommandResourceSpec;
use reliability::RetryBudget;
use samples::{EventKind, EventRegistry};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn sh(script: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script]
}

fn file_backed(dir: &Path, name: &str, kind: &str) -> CommandResourceSpec {
    let path = dir.join(name).display().to_string();
    let mut spec = CommandResourceSpec::new(
        name,
        sh(format!("touch '{path}'")),
        sh(format!("rm -f '{path}'")),
    );
    spec.kind = kind.to_string();
    spec.exists = Some(sh(format!("test -f '{path}'")));
    spec.metadata.insert("tier".into(), "standard".into());
    spec
}

fn config(dir: &Path) -> RunConfig {
    let mut config = RunConfig {
        benchmark: "storage_latency".into(),
        owner: "ci".into(),
        max_concurrency: 2,
        json_output: Some(dir.join("samples.jsonl")),
        resources: vec![
            file_backed(dir, "bucket-0", "bucket"),
            file_backed(dir, "vm-0", "vm"),
            file_backed(dir, "vm-1", "vm"),
        ],
        workloads: vec![WorkloadSpec {
            name: "Upload".into(),
            command: vec!["true".into()],
            timeout_secs: Some(10.0),
            iterations: 3,
            env: BTreeMap::new(),
            metadata: BTreeMap::from([("object_size".to_string(), "1MB".to_string())]),
        }],
        ..RunConfig::default()
    };
    let quick = RetryBudget::default()
        .with_poll_interval(Duration::from_millis(50))
        .with_timeout(Duration::from_secs(5));
    config.lifecycle.create_budget = quick.clone();
    config.lifecycle.ready_budget = quick.clone();
    config.lifecycle.delete_budget = quick.with_max_retries(2);
    config
}

fn read_records(path: &Path) -> Result<Vec<serde_json::Value>> {
    std::fs::read_to_string(path)?
        .lines()
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

#[tokio::test]
async fn test_full_run_publishes_samples_and_cleans_up() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config(dir.path());
    let events = Arc::new(EventRegistry::new());
    let deleted = Arc::new(AtomicUsize::new(0));
    {
        let deleted = Arc::clone(&deleted);
        events.connect(EventKind::ResourceDeleted, move |_| {
            deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let summary = run(&config, events).await?;

    assert!(summary.succeeded());
    assert_eq!(summary.provisioned, 3);
    assert!(summary.leaked.is_empty());
    assert_eq!(deleted.load(Ordering::SeqCst), 3);
    for name in ["bucket-0", "vm-0", "vm-1"] {
        assert!(!dir.path().join(name).exists());
    }

    let records = read_records(&dir.path().join("samples.jsonl"))?;
    assert_eq!(records.len(), summary.samples_published);

    let metrics: Vec<&str> = records.iter().filter_map(|r| r["metric"].as_str()).collect();
    assert_eq!(metrics.iter().filter(|m| **m == "Upload Runtime").count(), 3);
    assert!(metrics.contains(&"vm Create Time"));
    assert!(metrics.contains(&"bucket Delete Time"));

    let run_uri = summary.context.run_uri.to_string();
    for record in &records {
        assert_eq!(record["run_uri"], run_uri.as_str());
        assert_eq!(record["owner"], "ci");
        assert_eq!(record["test"], "storage_latency");
        // Single bucket keys by kind, the two VMs by name.
        assert_eq!(record["metadata"]["bucket_tier"], "standard");
        assert_eq!(record["metadata"]["vm_0_name"], "vm-0");
        assert_eq!(record["metadata"]["vm_1_name"], "vm-1");
    }
    Ok(())
}

#[tokio::test]
async fn test_failed_resource_fails_run_but_tears_down() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = config(dir.path());
    let mut broken = CommandResourceSpec::new(
        "db-0",
        sh("echo 'Quota exceeded for instances' >&2; exit 1".to_string()),
        sh("true".to_string()),
    );
    broken.kind = "database".into();
    config.resources.push(broken);

    let summary = run(&config, Arc::new(EventRegistry::new())).await?;

    assert!(!summary.succeeded());
    assert_eq!(summary.failed_resources.len(), 1);
    assert_eq!(summary.failed_resources[0].0, "db-0");
    assert!(!dir.path().join("vm-0").exists());

    // Workloads are skipped; only timing samples are published.
    let records = read_records(&dir.path().join("samples.jsonl"))?;
    assert!(records.iter().all(|r| r["metric"] != "Upload Runtime"));
    Ok(())
}

#[tokio::test]
async fn test_failing_workload_is_reported() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = config(dir.path());
    config.workloads[0].command = vec!["false".into()];

    let summary = run(&config, Arc::new(EventRegistry::new())).await?;

    assert!(!summary.succeeded());
    assert_eq!(summary.failed_workloads[0].0, "Upload");
    assert!(summary.failed_resources.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_out_of_range_ready_timeout_rejected_before_provisioning() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = config(dir.path());
    config.resources[1].ready_timeout_secs = Some(1e20);

    let err = run(&config, Arc::new(EventRegistry::new())).await.unwrap_err();

    assert!(err.to_string().contains("ready_timeout_secs"), "{err:#}");
    for name in ["bucket-0", "vm-0", "vm-1"] {
        assert!(!dir.path().join(name).exists());
    }
    Ok(())
}

#[tokio::test]
async fn test_config_file_with_env_override() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("run.toml");
    std::fs::write(
        &path,
        r#"
        benchmark = "from_file"
        owner = "file-owner"
        max_concurrency = 3
        "#,
    )?;

    std::env::set_var("CLOUDBENCH_MAX_CONCURRENCY", "7");
    let config = RunConfig::load(&path).await;
    std::env::remove_var("CLOUDBENCH_MAX_CONCURRENCY");
    let config = config?;

    assert_eq!(config.benchmark, "from_file");
    assert_eq!(config.owner, "file-owner");
    assert_eq!(config.max_concurrency, 7);
    Ok(())
}
