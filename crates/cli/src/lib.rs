//! `cloudbench`: provisions command-driven resources, runs workloads against
//! them, publishes the resulting samples and tears everything down.

pub mod config;
pub mod progress;
pub mod runner;

pub use config::{RunConfig, WorkloadSpec, ENV_PREFIX};
pub use runner::{run, RunSummary};
