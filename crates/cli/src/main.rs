use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::{run, RunConfig, RunSummary};
use common::init_structured_logging;
use console::style;
use samples::{parse_key_value_pairs, EventRegistry, MetadataConflictMode};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cloudbench")]
#[command(about = "Provision cloud resources, benchmark them, tear them down")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark described by a config file
    Run {
        /// TOML, JSON or YAML run configuration
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        max_concurrency: Option<usize>,
        /// Append samples as JSON lines to this file
        #[arg(long)]
        json_out: Option<PathBuf>,
        /// Log as JSON lines on stderr
        #[arg(long)]
        log_json: bool,
        /// Extra sample metadata, repeatable
        #[arg(long = "metadata", value_name = "KEY=VALUE")]
        metadata: Vec<String>,
        /// Keep the first value on metadata conflicts instead of failing
        #[arg(long)]
        permissive_metadata: bool,
    },
    /// Print an example configuration
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::ExampleConfig => {
            print!("{}", RunConfig::example_toml()?);
            Ok(())
        }
        Commands::Run {
            config,
            owner,
            max_concurrency,
            json_out,
            log_json,
            metadata,
            permissive_metadata,
        } => {
            let mut run_config = RunConfig::load(&config).await?;
            if let Some(owner) = owner {
                run_config.owner = owner;
            }
            if let Some(max) = max_concurrency {
                run_config.max_concurrency = max;
            }
            if json_out.is_some() {
                run_config.json_output = json_out;
            }
            if log_json {
                run_config.logging.json_output = true;
            }
            if permissive_metadata {
                run_config.metadata_conflict = MetadataConflictMode::Permissive;
            }
            for (key, value) in parse_key_value_pairs(&metadata)? {
                run_config.metadata.insert(key, value.to_string());
            }

            init_structured_logging(run_config.logging.clone())?;

            let summary = run(&run_config, Arc::new(EventRegistry::new())).await?;
            print_summary(&summary);
            if !summary.succeeded() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "{} {}",
        style("Run").bold(),
        style(summary.context.run_uri).cyan()
    );
    println!(
        "  {} resources ready, {} samples published",
        summary.provisioned, summary.samples_published
    );
    for (name, error) in &summary.failed_resources {
        println!("  {} {}: {}", style("failed").red().bold(), name, error);
    }
    for (name, error) in &summary.failed_workloads {
        println!("  {} {}: {}", style("workload failed").red().bold(), name, error);
    }
    for (name, error) in &summary.leaked {
        println!("  {} {}: {}", style("leaked").yellow().bold(), name, error);
    }
    if summary.succeeded() {
        println!("{}", style("Run succeeded").green().bold());
    } else {
        println!("{}", style("Run failed").red().bold());
    }
}
