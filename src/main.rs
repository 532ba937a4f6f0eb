//! Service entry point: CLI, logging bootstrap and transport wiring.

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pvbridge::config::DEFAULT_CONFIG_FILE;
use pvbridge::registry::{self, Tier};
use pvbridge::{BridgeConfig, ModbusReader, MqttPublisher, Processor, Runner};

#[derive(Debug, Parser)]
#[command(name = "pvbridge", about = "Inverter-to-MQTT telemetry bridge")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "PVBRIDGE_CONFIG_FILE", default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,

    /// Log level when RUST_LOG is not set.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = BridgeConfig::load(&args.config_file)?;
    info!("configuration loaded from {}", args.config_file.display());
    info!("quick items: {}", registry::list_items(Tier::Quick));
    info!("medium items: {}", registry::list_items(Tier::Medium));
    info!("slow items: {}", registry::list_items(Tier::Slow));

    let reader = ModbusReader::new(config.modbus.socket_addr()?);
    let processor = Processor::new(Box::new(reader));
    let publisher = MqttPublisher::new(config.mqtt.clone());

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signaled");
            signal_cancel.cancel();
        }
    });

    let mut runner = Runner::new(&config.runner, processor, Box::new(publisher), cancel);
    let outcome = runner.run().await;
    runner.close().await;

    if let Err(e) = &outcome {
        error!("service stopped on error: {e}");
    }
    outcome.map_err(Into::into)
}
