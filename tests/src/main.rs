pub mod harness;
pub mod load_tests;
pub mod mock_node;
pub mod report;
pub mod scenarios;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "integration-tests")]
#[command(about = "Scenario and load testing tool for the flowgate controller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run policy scenarios against an in-process control plane
    Scenarios {
        /// Optional report path; JSON and Markdown are written beside it
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Run a usage-report load test
    Load {
        /// Number of grants to spread reports over
        #[arg(short, long, default_value = "100")]
        grants: usize,

        /// Number of concurrent reporting workers
        #[arg(short, long, default_value = "32")]
        concurrency: usize,

        /// Duration of test in seconds
        #[arg(short, long, default_value = "30")]
        duration: u64,

        /// Output report file path
        #[arg(short, long, default_value = "load-report.md")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scenarios { output } => {
            tracing::info!("Running policy scenarios");
            let results = scenarios::run_all_scenarios().await?;
            if let Some(output) = output {
                report::generate_scenario_report(&results, &output)?;
            }
            if results.failed > 0 {
                bail!("{} of {} scenarios failed", results.failed, results.total_tests);
            }
        }
        Commands::Load {
            grants,
            concurrency,
            duration,
            output,
        } => {
            tracing::info!("Running load tests");
            tracing::info!("Grants: {}, Concurrency: {}, Duration: {}s", grants, concurrency, duration);

            let results = load_tests::run_load_tests(grants, concurrency, duration).await?;

            report::generate_reports(&results, &output)?;
            tracing::info!("Load report generated: {}", output);
        }
    }

    Ok(())
}
