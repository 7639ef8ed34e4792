//! Wake-word hub service binary
//!
//! Connects to the MQTT control bus and starts one room agent per configured
//! room.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wakeword_hub::{
    Classifier, ClassifierFactory, EnergyClassifier, HubConfig, MqttBus, Supervisor,
};

/// Log filter used when RUST_LOG is unset
const DEFAULT_LOG_FILTER: &str = "wakeword_hub=info";

#[derive(Parser, Debug)]
#[command(name = "wakeword-hub")]
#[command(about = "Multi-room wake-word detection hub", version, long_about = None)]
struct Cli {
    /// Configuration file (JSON); defaults to $WAKEWORD_HUB_CONFIG, then config.json
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins when set
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    info!("Starting wake-word hub v{}", wakeword_hub::VERSION);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = HubConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    let config = Arc::new(config);

    info!(
        "Models: {:?}, window: {} samples, thresholds: {}/{}, activation samples: {}",
        config.detection.models,
        config.detection.window_size,
        config.detection.activation_threshold,
        config.detection.deactivation_threshold,
        config.detection.activation_samples
    );

    let bus = MqttBus::connect(&config.bus)
        .await
        .context("Failed to connect to control bus")?;

    warn!("No acoustic model linked, scoring windows by signal energy");
    let models = config.detection.models.clone();
    let window_size = config.detection.window_size;
    let classifiers: ClassifierFactory = Arc::new(move |_room: &str| {
        Box::new(EnergyClassifier::new(models.clone(), window_size)) as Box<dyn Classifier>
    });

    let hub = Supervisor::new(config.clone(), Arc::new(bus), classifiers)
        .start()
        .await
        .context("Failed to start rooms")?;

    info!("Wake-word hub running with rooms: {:?}", hub.rooms().collect::<Vec<_>>());

    tokio::select! {
        _ = hub.join() => warn!("All room tasks ended"),
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Shutting down wake-word hub");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_log_filter_is_valid() {
        let directive: tracing_subscriber::filter::Directive = DEFAULT_LOG_FILTER.parse().unwrap();
        assert_eq!(directive.to_string(), "wakeword_hub=info");
    }

    #[test]
    fn test_config_flag() {
        let cli = Cli::try_parse_from(["wakeword-hub", "-c", "rooms.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("rooms.json")));

        let cli = Cli::try_parse_from(["wakeword-hub", "--config", "/etc/hub.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/hub.json")));

        let cli = Cli::try_parse_from(["wakeword-hub"]).unwrap();
        assert_eq!(cli.config, None);
    }
}
