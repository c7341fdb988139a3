//! One benchmark run: provision, measure, publish, tear down.

use crate::config::{RunConfig, WorkloadSpec};
use crate::progress::ProgressType;
use anyhow::{Context, Result};
use chrono::Utc;
use common::OperationTimer;
use executor::{CommandExecutor, CommandRequest};
use lifecycle::{provision_all, teardown_all, CommandResource, LifecycleEngine, ManagedResource};
use reliability::{duration_from_secs, MAX_DURATION};
use samples::{
    percentile_samples, Event, EventRegistry, JsonLinesPublisher, LogPublisher, Metadata,
    MetadataPipeline, MetadataValue, ResourceMetadataProvider, RunContext, RunPhase, Sample,
    SampleCollector, StaticMetadataProvider, DEFAULT_PERCENTILES,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What happened during a run.
#[derive(Debug)]
pub struct RunSummary {
    pub context: RunContext,
    pub provisioned: usize,
    /// `(resource, error)` for every resource that failed to come up
    pub failed_resources: Vec<(String, String)>,
    pub failed_workloads: Vec<(String, String)>,
    /// Resources whose deletion failed and may still exist
    pub leaked: Vec<(String, String)>,
    pub samples_published: usize,
}

impl RunSummary {
    /// Leaked resources are reported but do not fail the run.
    pub fn succeeded(&self) -> bool {
        self.failed_resources.is_empty() && self.failed_workloads.is_empty()
    }
}

pub async fn run(config: &RunConfig, events: Arc<EventRegistry>) -> Result<RunSummary> {
    config.validate()?;

    let context = RunContext::new(&config.benchmark, &config.owner);
    let executor = Arc::new(CommandExecutor::new(config.executor.clone()));
    let engine = Arc::new(LifecycleEngine::new(
        config.lifecycle.clone(),
        Arc::clone(&events),
    ));

    let resources = config
        .resources
        .iter()
        .cloned()
        .map(|spec| {
            CommandResource::from_spec(spec, Arc::clone(&executor)).map(ManagedResource::new)
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        benchmark = %config.benchmark,
        run_uri = %context.run_uri,
        owner = %context.owner,
        resources = resources.len(),
        "Starting run"
    );
    events.fire(&Event::BenchmarkStart {
        benchmark: config.benchmark.clone(),
        run_uri: context.run_uri,
    })?;

    let mut timer = OperationTimer::new("benchmark_run");
    timer.add_field("benchmark", &config.benchmark);

    events.fire(&Event::BeforePhase {
        phase: RunPhase::Provision,
    })?;
    let spinner = ProgressType::Provision
        .create_spinner(&format!("Provisioning {} resources", resources.len()));
    let names: Vec<String> = resources.iter().map(|r| r.name().to_string()).collect();
    let outcomes = provision_all(Arc::clone(&engine), resources, config.max_concurrency).await;

    let mut failed_resources = Vec::new();
    let mut resources = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        if let Err(e) = &outcome.result {
            failed_resources.push((outcome.resource.name().to_string(), e.to_string()));
        }
        resources.push(outcome.resource);
    }
    let lost = missing(&names, &resources);
    for name in &lost {
        failed_resources.push((name.clone(), LOST_TASK.to_string()));
    }
    let provisioned = names.len() - failed_resources.len();
    if failed_resources.is_empty() {
        spinner.finish_success(&format!("{} resources ready", provisioned));
    } else {
        spinner.finish_failure(&format!("{} resources failed", failed_resources.len()));
    }

    // Teardown must run whatever happens in between.
    let mut failed_workloads = Vec::new();
    let measured = measure(
        config,
        &context,
        &executor,
        &events,
        &resources,
        !failed_resources.is_empty(),
        &mut failed_workloads,
    )
    .await;

    let torn_down = teardown(config, &events, engine, resources)
        .await
        .map(|(mut leaked, timing_samples)| {
            // Never handed back by the pool, so never deleted.
            leaked.extend(lost.into_iter().map(|name| (name, LOST_TASK.to_string())));
            (leaked, timing_samples)
        });
    let collector = match measured {
        Ok(collector) => collector,
        Err(e) => {
            error!(error = %e, "Run aborted before publishing");
            timer.finish_with_result(&Err::<(), _>(&e));
            return Err(e);
        }
    };
    let (leaked, timing_samples) = torn_down?;

    if !timing_samples.is_empty() {
        collector.add_samples(timing_samples, &config.benchmark)?;
    }
    let samples_published = collector.publish()?;

    let summary = RunSummary {
        context,
        provisioned,
        failed_resources,
        failed_workloads,
        leaked,
        samples_published,
    };

    events.fire(&Event::BenchmarkEnd {
        benchmark: config.benchmark.clone(),
        run_uri: summary.context.run_uri,
        succeeded: summary.succeeded(),
    })?;
    timer.add_field("succeeded", summary.succeeded());
    timer.finish();
    Ok(summary)
}

/// Builds the collector and runs workloads when every resource came up.
async fn measure(
    config: &RunConfig,
    context: &RunContext,
    executor: &CommandExecutor,
    events: &Arc<EventRegistry>,
    resources: &[ManagedResource],
    provisioning_failed: bool,
    failed_workloads: &mut Vec<(String, String)>,
) -> Result<SampleCollector> {
    events.fire(&Event::AfterPhase {
        phase: RunPhase::Provision,
    })?;

    let mut collector = SampleCollector::new(
        context.clone(),
        metadata_pipeline(config, resources),
        Arc::clone(events),
    )
    .with_publisher(LogPublisher);
    if let Some(path) = &config.json_output {
        collector = collector.with_publisher(JsonLinesPublisher::new(path.clone()));
    }

    if provisioning_failed {
        warn!("Skipping workloads because provisioning failed");
        return Ok(collector);
    }

    events.fire(&Event::BeforePhase {
        phase: RunPhase::Run,
    })?;
    for workload in &config.workloads {
        let spinner = ProgressType::Workload.create_spinner(&format!("Running {}", workload.name));
        match run_workload(executor, workload, events).await {
            Ok(samples) => {
                let count = collector.add_samples(samples, &config.benchmark)?;
                spinner.finish_success(&format!("{}: {} samples", workload.name, count));
            }
            Err(e) => {
                error!(workload = %workload.name, error = %e, "Workload failed");
                spinner.finish_failure(&format!("{} failed", workload.name));
                failed_workloads.push((workload.name.clone(), format!("{:#}", e)));
            }
        }
    }
    events.fire(&Event::AfterPhase {
        phase: RunPhase::Run,
    })?;
    Ok(collector)
}

type TeardownResult = Result<(Vec<(String, String)>, Vec<Sample>)>;

async fn teardown(
    config: &RunConfig,
    events: &EventRegistry,
    engine: Arc<LifecycleEngine>,
    resources: Vec<ManagedResource>,
) -> TeardownResult {
    let before = events.fire(&Event::BeforePhase {
        phase: RunPhase::Teardown,
    });
    let spinner = ProgressType::Teardown.create_spinner("Tearing down resources");
    let names: Vec<String> = resources.iter().map(|r| r.name().to_string()).collect();
    let outcomes = teardown_all(engine, resources, config.max_concurrency).await;

    let mut leaked = Vec::new();
    let mut timing_samples = Vec::new();
    for outcome in &outcomes {
        if let Err(e) = &outcome.result {
            leaked.push((outcome.resource.name().to_string(), e.to_string()));
        }
        timing_samples.extend(outcome.resource.timing_samples());
    }
    for name in missing(&names, outcomes.iter().map(|o| &o.resource)) {
        leaked.push((name, LOST_TASK.to_string()));
    }
    if leaked.is_empty() {
        spinner.finish_success("Resources deleted");
    } else {
        spinner.finish_failure(&format!("{} resources may have leaked", leaked.len()));
    }

    before?;
    events.fire(&Event::AfterPhase {
        phase: RunPhase::Teardown,
    })?;
    Ok((leaked, timing_samples))
}

const LOST_TASK: &str = "lifecycle task was lost before reporting";

/// Names the pool did not hand back.
fn missing<'a>(
    names: &[String],
    returned: impl IntoIterator<Item = &'a ManagedResource>,
) -> Vec<String> {
    let returned: HashSet<&str> = returned.into_iter().map(|r| r.name()).collect();
    names
        .iter()
        .filter(|name| !returned.contains(name.as_str()))
        .cloned()
        .collect()
}

/// Static metadata first, then one provider per resource.
///
/// Resource keys are prefixed with the kind, or with the resource name when
/// several resources share a kind.
fn metadata_pipeline(config: &RunConfig, resources: &[ManagedResource]) -> MetadataPipeline {
    let mut kinds: HashMap<&str, usize> = HashMap::new();
    for resource in resources {
        *kinds.entry(resource.resource().kind()).or_default() += 1;
    }

    let static_metadata: Metadata = config
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), MetadataValue::from(v.as_str())))
        .collect();
    let mut pipeline = MetadataPipeline::new(config.metadata_conflict)
        .with_provider(StaticMetadataProvider::new(static_metadata));

    for resource in resources {
        let kind = resource.resource().kind();
        let prefix = if kinds.get(kind).copied().unwrap_or(0) > 1 {
            resource.name().replace('-', "_")
        } else {
            kind.to_string()
        };
        pipeline = pipeline.with_provider(ResourceMetadataProvider::new(prefix, resource.metadata()));
    }
    pipeline
}

async fn run_workload(
    executor: &CommandExecutor,
    workload: &WorkloadSpec,
    events: &EventRegistry,
) -> Result<Vec<Sample>> {
    let mut request = CommandRequest::new(workload.command.iter().cloned())
        .with_envs(workload.env.clone())
        .raise_on_failure(true);
    if let Some(secs) = workload.timeout_secs {
        request = request.with_timeout(duration_from_secs(secs).unwrap_or(MAX_DURATION));
    }

    let metric = format!("{} Runtime", workload.name);
    let metadata: Metadata = workload
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), MetadataValue::from(v.as_str())))
        .collect();

    let mut runtimes = Vec::with_capacity(workload.iterations as usize);
    let mut samples = Vec::new();
    for iteration in 0..workload.iterations {
        let start = Utc::now();
        let result = executor
            .execute(&request)
            .await
            .with_context(|| format!("Workload {} failed", workload.name))?;
        events.fire(&Event::RecordEvent {
            name: workload.name.clone(),
            start,
            end: Utc::now(),
            metadata: metadata.clone(),
        })?;

        let seconds = result.duration.as_secs_f64();
        runtimes.push(seconds);
        samples.push(
            Sample::new(metric.clone(), seconds, "seconds")
                .with_metadata(metadata.clone())
                .with_entry("iteration", iteration),
        );
    }

    if runtimes.len() > 1 {
        samples.extend(percentile_samples(
            &metric,
            "seconds",
            &runtimes,
            &DEFAULT_PERCENTILES,
            &metadata,
        )?);
    }
    Ok(samples)
}
