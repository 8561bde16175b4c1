mod config;
mod replay;

use clap::{Parser, Subcommand};
use config::Config;
use metrics_exporter_statsd::StatsdBuilder;
use replay::{DryRunProvisioner, FileMessageSource, LoggingSender};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uplink_processor::UplinkProcessor;

#[derive(Parser)]
#[command(name = "bridge", about = "LoRaWAN uplink bridge")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a configuration file and exit
    Check {
        #[arg(long)]
        config: PathBuf,
    },
    /// Replay a JSON-lines file of uplink messages through the processor
    Run {
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        messages: PathBuf,
    },
}

#[derive(Error, Debug)]
enum BridgeError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Validation(#[from] config::ValidationError),

    #[error(transparent)]
    Replay(#[from] replay::ReplayError),

    #[error("failed to install statsd exporter: {0}")]
    Statsd(String),
}

fn load_config(path: &PathBuf) -> Result<Config, BridgeError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

fn init_metrics(config: &Config) -> Result<(), BridgeError> {
    let Some(statsd) = &config.statsd else {
        return Ok(());
    };
    let recorder = StatsdBuilder::from(statsd.host.as_str(), statsd.port)
        .build(Some(&statsd.prefix))
        .map_err(|err| BridgeError::Statsd(err.to_string()))?;
    metrics::set_global_recorder(recorder)
        .map_err(|err| BridgeError::Statsd(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Check { config } => {
            let config = load_config(&config)?;
            println!(
                "configuration ok: {} workers, {} configured applications",
                config.workers,
                config.processor.applications.len()
            );
            Ok(())
        }
        Command::Run { config, messages } => {
            let config = load_config(&config)?;
            init_metrics(&config)?;
            run(config, &messages).await
        }
    }
}

async fn run(config: Config, messages: &PathBuf) -> Result<(), BridgeError> {
    let messages = replay::load_messages(messages)?;
    tracing::info!(count = messages.len(), "replaying uplink messages");

    let source = Arc::new(FileMessageSource::new(messages));
    let processor = Arc::new(UplinkProcessor::new(
        config.processor,
        Arc::new(DryRunProvisioner::new(Duration::from_millis(50))),
        Arc::new(LoggingSender),
    ));

    let deadline = config.message_deadline_secs.map(Duration::from_secs);
    let processed = processor
        .run_workers(source, config.workers, deadline)
        .await;

    tracing::info!(
        processed,
        cached_connections = processor.cache().len(),
        "replay complete"
    );
    Ok(())
}
