//! publish-telemetry - send a short burst of timestamp telemetry from a device
//!
//! Connects to the broker with the device's certificate bundle, publishes
//! `--count` messages `--interval` seconds apart and disconnects.

use clap::Parser;
use devicelink::config::ClientConfig;
use devicelink::connection::{ConnectionManager, ConnectionSettings, ConnectionState};
use devicelink::error::{CredentialKind, DeviceError};
use devicelink::observability::init_default_logging;
use devicelink::protocol::{validate_thing_name, TopicBuilder};
use devicelink::publisher::{MessageOutcome, TelemetryPublisher};
use devicelink::transport::mqtt::{BrokerEndpoint, CredentialBundle, MqttSettings, MqttTransport};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, Level};

/// Config file picked up when --config is not given
const DEFAULT_CONFIG_PATH: &str = "devicelink.toml";

/// Publish telemetry messages to an MQTT broker over mutual TLS
#[derive(Parser)]
#[command(name = "publish-telemetry")]
#[command(about = "Publish device telemetry to an MQTT broker")]
#[command(version)]
struct Cli {
    /// Broker endpoint (host, host:port or mqtts://host:port)
    #[arg(long, env = "DEVICE_ENDPOINT")]
    endpoint: String,

    /// Thing name, also used as the MQTT client ID
    #[arg(long, env = "DEVICE_THING_NAME", default_value = "test-device-001")]
    thing_name: String,

    /// Device certificate (PEM)
    #[arg(long, default_value = "certs/device.cert.pem")]
    cert: PathBuf,

    /// Device private key (PEM)
    #[arg(long, default_value = "certs/device.private.key")]
    key: PathBuf,

    /// Root CA certificate (PEM)
    #[arg(long, default_value = "certs/AmazonRootCA1.pem")]
    root_ca: PathBuf,

    /// Topic to publish to (default: device/<thing-name>/telemetry)
    #[arg(long)]
    topic: Option<String>,

    /// Number of messages to send
    #[arg(long, default_value_t = 5)]
    count: u32,

    /// Seconds between messages
    #[arg(long, default_value_t = 2)]
    interval: u64,

    /// Broker port, overriding the config file
    #[arg(long)]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    if let Err(e) = init_default_logging(default_level) {
        eprintln!("Warning: logging not initialised: {e}");
    }

    if let Err(e) = validate_thing_name(&cli.thing_name) {
        eprintln!("Error: {e}");
        process::exit(2);
    }

    let credentials = CredentialBundle::new(&cli.cert, &cli.key, &cli.root_ca);
    if let Err(e) = credentials.verify_exists() {
        report_missing_credential(&e);
        return;
    }

    if let Err(e) = run(cli, credentials).await {
        error!("Telemetry run failed: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn report_missing_credential(error: &DeviceError) {
    eprintln!("Error: {error}");
    match error {
        DeviceError::MissingCredential {
            kind: CredentialKind::RootCa,
            ..
        } => eprintln!("Please download AmazonRootCA1.pem (see README.md)"),
        _ => eprintln!("Please run the certificate creation steps first (see README.md)"),
    }
}

fn load_configuration(path: Option<&Path>) -> Result<ClientConfig, DeviceError> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ClientConfig::load_from_file(path)?)
        }
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                info!("Loading configuration from: {}", default_path.display());
                Ok(ClientConfig::load_from_file(default_path)?)
            } else {
                Ok(ClientConfig::default())
            }
        }
    }
}

async fn run(cli: Cli, credentials: CredentialBundle) -> Result<(), DeviceError> {
    let mut config = load_configuration(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    config.validate()?;

    let endpoint = BrokerEndpoint::parse(&cli.endpoint, config.connection.port)?;
    let transport = MqttTransport::new(MqttSettings {
        client_id: cli.thing_name.clone(),
        endpoint: endpoint.clone(),
        keep_alive: config.keep_alive(),
        credentials: credentials.load()?,
    });
    let connection = ConnectionManager::new(
        transport,
        ConnectionSettings::from_config(&cli.thing_name, &config),
    );

    let topic = TopicBuilder::resolve(&cli.thing_name, cli.topic.as_deref());
    let count = cli.count;
    let publisher = TelemetryPublisher::new(topic, count, Duration::from_secs(cli.interval))
        .with_observer(move |outcome| print_outcome(outcome, count));

    println!("Connecting to {endpoint}...");
    let status_printer = tokio::spawn(print_state_changes(connection.watch_state()));
    let shutdown = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        println!("\nInterrupted");
    };
    let result = publisher.run_until(&connection, shutdown).await;
    status_printer.abort();
    let report = result?;

    println!("\nDisconnected");
    println!(
        "Sent {} of {}: {} published, {} queued offline, {} rejected",
        report.outcomes.len(),
        count,
        report.accepted(),
        report.queued(),
        report.rejected()
    );
    let metrics = connection.metrics();
    if metrics.messages_dropped > 0 {
        println!("{} queued messages were never delivered", metrics.messages_dropped);
    }
    Ok(())
}

async fn print_state_changes(mut state_rx: watch::Receiver<ConnectionState>) {
    let mut connected_before = false;
    while state_rx.changed().await.is_ok() {
        let state = *state_rx.borrow_and_update();
        match state {
            ConnectionState::Connected if connected_before => println!("Reconnected"),
            ConnectionState::Connected => {
                connected_before = true;
                println!("Connected successfully!");
            }
            ConnectionState::Reconnecting { attempt: 0 } => {
                println!("Connection lost, messages will be queued offline")
            }
            ConnectionState::Reconnecting { attempt } => println!("Reconnecting (attempt {attempt})..."),
            ConnectionState::Connecting | ConnectionState::Disconnected => {}
        }
    }
}

fn print_outcome(outcome: &MessageOutcome, count: u32) {
    println!("\nPublishing message {}/{}:", outcome.sequence, count);
    println!("  Topic: {}", outcome.topic);
    println!("  Payload: {}", outcome.payload);
    println!("  Status: {}", outcome.outcome);
}
