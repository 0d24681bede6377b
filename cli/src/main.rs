//! Vaktr CLI
//!
//! Command-line tools for the Vaktr telemetry relay: check counter
//! descriptors and settings documents before handing them to the agent, and
//! sample host counters the way the agent would.
//!
//! # Usage
//!
//! ```bash
//! vaktr --help
//! vaktr parse 'Processor(_Total)\% Processor Time|CPU'
//! vaktr check-config config/vaktr.json
//! vaktr sample 'Memory\Available MBytes|Free' --count 5 --interval-ms 500
//! ```

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shared::config::{AgentConfiguration, ConfigurationSettings};
use shared::counters::{CounterSet, CounterSource, CounterSpec, SystemCounterSource};
use shared::events::EventQuery;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Vaktr CLI - telemetry relay tooling
#[derive(Parser)]
#[command(name = "vaktr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse counter descriptors and print them as JSON
    Parse {
        /// Descriptors such as `Processor(_Total)\% Processor Time|CPU`
        #[arg(required = true)]
        descriptors: Vec<String>,
    },
    /// Validate a settings document
    CheckConfig {
        /// Path to the JSON settings document
        path: PathBuf,
    },
    /// Sample one host counter
    Sample {
        /// Counter descriptor
        descriptor: String,
        /// Number of samples to take
        #[arg(short, long, default_value_t = 1)]
        count: u32,
        /// Delay between samples in milliseconds
        #[arg(short, long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

/// What a valid settings document configures, minus the credential.
#[derive(Debug, Serialize)]
struct ConfigSummary {
    counters: Vec<CounterSpec>,
    check_interval_secs: u64,
    event_log: EventQuery,
}

impl From<&AgentConfiguration> for ConfigSummary {
    fn from(config: &AgentConfiguration) -> Self {
        Self {
            counters: config.counter_specs.clone(),
            check_interval_secs: config.check_interval.as_secs(),
            event_log: config.event_query.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Parse { descriptors }) => {
            let specs = parse_descriptors(&descriptors)?;
            println!("{}", serde_json::to_string_pretty(&specs)?);
        }
        Some(Commands::CheckConfig { path }) => {
            let config = check_config(&path)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&ConfigSummary::from(&config))?
            );
        }
        Some(Commands::Sample {
            descriptor,
            count,
            interval_ms,
        }) => {
            let spec: CounterSpec = descriptor.parse()?;
            let name = spec.friendly_name().to_string();
            let values = sample(
                &spec,
                &SystemCounterSource::new(),
                count,
                Duration::from_millis(interval_ms),
            )
            .await?;
            for value in values {
                println!("{name}\t{value:.2}");
            }
        }
        None => {
            println!("Vaktr CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

/// Parses every descriptor, failing on the first malformed one.
fn parse_descriptors(descriptors: &[String]) -> Result<Vec<CounterSpec>> {
    descriptors
        .iter()
        .enumerate()
        .map(|(index, descriptor)| {
            CounterSpec::parse(descriptor)
                .with_context(|| format!("descriptor #{} is malformed", index + 1))
        })
        .collect()
}

/// Reads and validates a settings document.
fn check_config(path: &Path) -> Result<AgentConfiguration> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let settings = ConfigurationSettings::from_json(&text)?;
    let config = AgentConfiguration::from_settings(&settings)
        .with_context(|| format!("{} is not a valid settings document", path.display()))?;

    tracing::debug!(counters = config.counter_specs.len(), "Settings document is valid");
    Ok(config)
}

/// Opens `spec` and takes `count` samples, waiting `interval` between them.
async fn sample(
    spec: &CounterSpec,
    source: &dyn CounterSource,
    count: u32,
    interval: Duration,
) -> Result<Vec<f64>> {
    let counters = CounterSet::open_all(std::slice::from_ref(spec), source)?;
    let mut values = Vec::new();

    // Samplers close on drop, so an early return releases the counter too.
    for sampler in counters.iter() {
        for taken in 0..count {
            if taken > 0 {
                tokio::time::sleep(interval).await;
            }
            values.push(sampler.next_value()?);
        }
    }

    counters.close();
    Ok(values)
}
