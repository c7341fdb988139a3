use anyhow::{bail, Context, Result};
use common::{current_owner, ConfigLoader, LoggingConfig};
use executor::ExecutorConfig;
use lifecycle::{CommandResourceSpec, LifecycleConfig};
use reliability::duration_from_secs;
use samples::MetadataConflictMode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "CLOUDBENCH_";

/// A command run against the provisioned resources; its wall time becomes a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    /// Runs of the command; more than one adds a percentile summary
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_iterations() -> u32 {
    1
}

fn default_benchmark() -> String {
    "cloudbench".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Recorded as the `test` field of every sample
    pub benchmark: String,
    pub owner: String,
    pub max_concurrency: usize,
    pub metadata_conflict: MetadataConflictMode,
    /// Extra `key = value` entries added to every sample
    pub metadata: BTreeMap<String, String>,
    pub json_output: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub executor: ExecutorConfig,
    pub lifecycle: LifecycleConfig,
    pub resources: Vec<CommandResourceSpec>,
    pub workloads: Vec<WorkloadSpec>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            benchmark: default_benchmark(),
            owner: current_owner(),
            max_concurrency: num_cpus::get(),
            metadata_conflict: MetadataConflictMode::default(),
            metadata: BTreeMap::new(),
            json_output: None,
            logging: LoggingConfig::default(),
            executor: ExecutorConfig::default(),
            lifecycle: LifecycleConfig::default(),
            resources: Vec::new(),
            workloads: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Reads the file, then applies `CLOUDBENCH_*` overrides.
    pub async fn load(path: &Path) -> Result<Self> {
        let loader = ConfigLoader::new(ENV_PREFIX);
        let mut config: RunConfig = loader
            .load(path)
            .await
            .with_context(|| format!("Failed to load run config {}", path.display()))?;
        config.apply_env(&loader)?;
        Ok(config)
    }

    pub fn apply_env(&mut self, loader: &ConfigLoader) -> Result<()> {
        if let Some(owner) = loader.env_var("OWNER") {
            self.owner = owner;
        }
        if let Some(max) = loader.env_override::<usize>("MAX_CONCURRENCY")? {
            self.max_concurrency = max;
        }
        if let Some(level) = loader.env_var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(path) = loader.env_var("JSON_OUTPUT") {
            self.json_output = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            bail!("max_concurrency must be at least 1");
        }
        if self.owner.trim().is_empty() {
            bail!("owner is empty");
        }

        for (phase, budget) in [
            ("create", &self.lifecycle.create_budget),
            ("ready", &self.lifecycle.ready_budget),
            ("delete", &self.lifecycle.delete_budget),
        ] {
            budget
                .validate()
                .map_err(|reason| anyhow::anyhow!("Invalid {} budget: {}", phase, reason))?;
        }

        let mut names = HashSet::new();
        for spec in &self.resources {
            spec.validate()?;
            if !names.insert(spec.name.as_str()) {
                bail!("Duplicate resource name {}", spec.name);
            }
        }

        let mut workloads = HashSet::new();
        for workload in &self.workloads {
            if workload.command.is_empty() {
                bail!("Workload {} has an empty command", workload.name);
            }
            if workload.iterations == 0 {
                bail!("Workload {} must run at least once", workload.name);
            }
            if let Some(secs) = workload.timeout_secs {
                duration_from_secs(secs).map_err(|reason| {
                    anyhow::anyhow!("Workload {} has an invalid timeout: {}", workload.name, reason)
                })?;
            }
            if !workloads.insert(workload.name.as_str()) {
                bail!("Duplicate workload name {}", workload.name);
            }
        }
        Ok(())
    }

    /// A small runnable configuration using only POSIX shell commands.
    pub fn example() -> Self {
        let state = "/tmp/cloudbench-example";
        let sh = |script: String| vec!["sh".to_string(), "-c".to_string(), script];

        let mut network = CommandResourceSpec::new(
            "example-network",
            sh(format!("mkdir -p {state}/network")),
            sh(format!("rm -rf {state}/network")),
        );
        network.kind = "network".into();
        network.exists = Some(sh(format!("test -d {state}/network")));

        let mut vm = CommandResourceSpec::new(
            "example-vm",
            sh(format!("mkdir -p {state}/vm && echo RUNNING > {state}/vm/status")),
            sh(format!("rm -rf {state}/vm")),
        );
        vm.kind = "vm".into();
        vm.zone = Some("local-a".into());
        vm.ready = Some(sh(format!("cat {state}/vm/status")));
        vm.ready_marker = Some("RUNNING".into());
        vm.exists = Some(sh(format!("test -d {state}/vm")));
        vm.poll_interval_secs = Some(1.0);
        vm.ready_timeout_secs = Some(60.0);
        vm.metadata.insert("machine_type".into(), "local".into());
        vm.dependencies.push(network);

        let mut metadata = BTreeMap::new();
        metadata.insert("purpose".to_string(), "example".to_string());

        Self {
            benchmark: "example".into(),
            max_concurrency: 4,
            metadata,
            resources: vec![vm],
            workloads: vec![WorkloadSpec {
                name: "Sleep".into(),
                command: vec!["sleep".into(), "1".into()],
                timeout_secs: Some(30.0),
                iterations: 3,
                env: BTreeMap::new(),
                metadata: BTreeMap::new(),
            }],
            ..Self::default()
        }
    }

    pub fn example_toml() -> Result<String> {
        toml::to_string_pretty(&Self::example()).context("Failed to render example config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ConfigFormat;

    #[test]
    fn test_example_round_trips_through_toml() {
        let rendered = RunConfig::example_toml().unwrap();
        let parsed: RunConfig = ConfigLoader::parse_str(&rendered, Some(ConfigFormat::Toml)).unwrap();
        assert_eq!(parsed.resources, RunConfig::example().resources);
        parsed.validate().unwrap();
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config: RunConfig = ConfigLoader::parse_str(
            r#"
            benchmark = "cache_latency"

            [[resources]]
            name = "cache-0"
            kind = "cache"
            create = ["true"]
            delete = ["true"]
            "#,
            None,
        )
        .unwrap();
        assert_eq!(config.benchmark, "cache_latency");
        assert_eq!(config.metadata_conflict, MetadataConflictMode::Strict);
        assert!(config.max_concurrency >= 1);
        assert_eq!(config.executor.default_timeout_secs, 300);
        config.validate().unwrap();
    }

    #[test]
    fn test_duplicate_resource_names_rejected() {
        let spec = CommandResourceSpec::new("vm-0", vec!["true".into()], vec!["true".into()]);
        let config = RunConfig {
            resources: vec![spec.clone(), spec],
            ..RunConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate resource name vm-0"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = RunConfig {
            max_concurrency: 0,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_timeouts_rejected() {
        let mut config = RunConfig::example();
        config.workloads[0].timeout_secs = Some(1e20);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid timeout"), "{err}");

        let mut config = RunConfig::example();
        config.resources[0].ready_timeout_secs = Some(1e20);
        assert!(config.validate().is_err());

        let mut config = RunConfig::example();
        config.lifecycle.delete_budget.timeout = Some(std::time::Duration::from_secs(u64::MAX));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unbounded_budget_rejected() {
        let mut config = RunConfig::default();
        config.lifecycle.ready_budget = config.lifecycle.ready_budget.clone().without_timeout();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ready budget"));
    }
}
