// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ONVIF/MQTT bridge CLI
//!
//! Discovers ONVIF cameras and exposes them on an MQTT broker.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (tcp://localhost:1883, prefix "onvif", ./cams.json)
//! onvif-mqtt
//!
//! # Probe only two interfaces
//! onvif-mqtt --interfaces eth0,192.168.10.2
//!
//! # Using configuration file
//! onvif-mqtt --config bridge.toml
//!
//! # One-shot discovery, print what answered
//! onvif-mqtt discover
//! ```

use clap::{Parser, Subcommand};
use onvif_mqtt::bus;
use onvif_mqtt::{
    reconcile, Bridge, BridgeConfig, BridgeStatsSnapshot, ConfigError, DiscoveryEngine,
    JsonFileStore, OnvifSessionProvider,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// ONVIF camera bridge for MQTT
#[derive(Parser, Debug)]
#[command(name = "onvif-mqtt")]
#[command(about = "ONVIF camera discovery and pan/tilt control over MQTT")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interfaces to probe (names or IPv4 addresses, comma-separated)
    #[arg(long, env = "NETWORK_INTERFACES", value_delimiter = ',')]
    interfaces: Vec<String>,

    /// MQTT broker URL
    #[arg(long, env = "MQTT_SERVER")]
    mqtt_server: Option<String>,

    /// MQTT topic prefix
    #[arg(long, env = "MQTT_PREFIX")]
    mqtt_prefix: Option<String>,

    /// MQTT client identifier
    #[arg(long)]
    client_id: Option<String>,

    /// Persisted device document
    #[arg(long, env = "CAM_DATA_PATH")]
    store: Option<PathBuf>,

    /// Username for commands that carry none
    #[arg(long, env = "DEFAULT_USER")]
    default_user: Option<String>,

    /// Password for commands that carry none
    #[arg(long, env = "DEFAULT_PASSWORD", hide_env_values = true)]
    default_password: Option<String>,

    /// Discovery collection window (milliseconds)
    #[arg(long)]
    discovery_window_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "bridge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run one discovery pass and print the devices found
    Discover,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Some(Commands::GenConfig { ref output }) => return cmd_gen_config(output),
        Some(Commands::Validate { ref config }) => return cmd_validate(config),
        _ => {}
    }

    let config = build_config(&args)?;

    // Initialize logging
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(Commands::Discover) = args.command {
        return cmd_discover(&config).await;
    }

    run(config).await
}

fn build_config(args: &Args) -> Result<BridgeConfig, ConfigError> {
    let mut config = match args.config {
        Some(ref path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };

    if !args.interfaces.is_empty() {
        config.interfaces = args.interfaces.clone();
    }
    if let Some(ref server) = args.mqtt_server {
        config.mqtt.server = server.clone();
    }
    if let Some(ref prefix) = args.mqtt_prefix {
        config.mqtt.prefix = prefix.clone();
    }
    if let Some(ref client_id) = args.client_id {
        config.mqtt.client_id = client_id.clone();
    }
    if let Some(ref store) = args.store {
        config.store_path = store.clone();
    }
    if args.default_user.is_some() {
        config.default_user = args.default_user.clone();
    }
    if args.default_password.is_some() {
        config.default_password = args.default_password.clone();
    }
    if let Some(window_ms) = args.discovery_window_ms {
        config.discovery.window_ms = window_ms;
    }
    if let Some(ref level) = args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("onvif-mqtt v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        server = %config.mqtt.server,
        prefix = %config.mqtt.prefix,
        store = %config.store_path.display(),
        "Starting bridge"
    );

    let provider = OnvifSessionProvider::new(onvif_mqtt::onvif::REQUEST_TIMEOUT)?;
    let source = DiscoveryEngine::new(config.interfaces.clone(), &config.discovery);
    let store = JsonFileStore::new(&config.store_path);

    let (bus, events) = match bus::connect(&config.mqtt).await {
        Ok(connected) => connected,
        Err(e) => {
            tracing::error!("Cannot connect to MQTT broker {}: {}", config.mqtt.server, e);
            return Err(e.into());
        }
    };

    let bridge = Arc::new(Bridge::new(&config, provider, bus, source, Box::new(store)));

    tokio::select! {
        result = Arc::clone(&bridge).run(events) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutting down...");
        }
    }

    print_stats(&bridge.stats());
    Ok(())
}

async fn cmd_discover(config: &BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine = DiscoveryEngine::new(config.interfaces.clone(), &config.discovery);
    let found = engine.probe_all().await;
    let devices = reconcile(&found, &[]);

    println!("{}", serde_json::to_string_pretty(&devices)?);
    eprintln!("{} device(s) found", devices.len());
    Ok(())
}

fn cmd_gen_config(output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = BridgeConfig {
        interfaces: vec!["eth0".into()],
        default_user: Some("admin".into()),
        ..Default::default()
    };
    config.mqtt.server = "tcp://192.168.1.10:1883".into();

    let toml_str = toml::to_string_pretty(&config)?;

    // Add comments
    let content = format!(
        r#"# onvif-mqtt configuration
# Generated by onvif-mqtt gen-config
#
# default_password is best passed through the DEFAULT_PASSWORD environment
# variable rather than stored here.

{}
"#,
        toml_str
    );

    std::fs::write(output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    match BridgeConfig::from_file(config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Broker: {} (prefix '{}')", config.mqtt.server, config.mqtt.prefix);
            println!("Store: {}", config.store_path.display());
            if config.interfaces.is_empty() {
                println!("Interfaces: all IPv4");
            } else {
                println!("Interfaces: {}", config.interfaces.join(", "));
            }
            println!(
                "Discovery window: {} ms, default move: {} ms",
                config.discovery.window_ms, config.motion.default_timeout_ms
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &BridgeStatsSnapshot) {
    println!("--- Bridge Statistics ---");
    println!(
        "  {} messages ({:.2} msg/s), {} ignored, {} errors",
        stats.messages,
        stats.messages_per_second(),
        stats.ignored,
        stats.errors
    );
    println!(
        "  {} moves, {} failed moves, {} discovery cycles",
        stats.moves, stats.move_failures, stats.discoveries
    );
}
