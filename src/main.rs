//! Messenger listener - Main Entry Point
//!
//! Connects with the session described by the configuration file and prints
//! every received event as one JSON line on stdout.

use clap::{Parser, Subcommand};
use messenger_listener::config::ListenerConfig;
use messenger_listener::listener::{Listener, ListenerHandle};
use messenger_listener::observability::{init_default_logging, metrics};
use messenger_listener::transport::mqtt::MqttTransport;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

/// Real-time Messenger event listener
#[derive(Parser)]
#[command(name = "messenger-listen")]
#[command(about = "Listen for Messenger events over the MQTT push channel")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print events until interrupted
    Run {
        /// Sequence id to start from, overriding the configuration
        #[arg(long, env = "MESSENGER_SEQUENCE_ID")]
        sequence_id: Option<u64>,
    },
    /// Validate the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting messenger-listen v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { sequence_id } => run_listener(config, sequence_id).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ListenerConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ListenerConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["listener.toml", "config/listener.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(ListenerConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create listener.toml".into())
        }
    }
}

async fn run_listener(
    mut config: ListenerConfig,
    sequence_id: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    if sequence_id.is_some() {
        config.listener.sequence_id = sequence_id;
    }
    if config.listener.sequence_id.is_none() {
        return Err(
            "A starting sequence id is required: set listener.sequence_id or pass --sequence-id"
                .into(),
        );
    }

    info!(user_id = %config.session.user_id, "Starting listener");
    let mut listener = Listener::from_config(MqttTransport::new(), &config)?;
    tokio::spawn(forward_shutdown_signals(listener.handle()));

    let mut outcome = Ok(());
    while let Some(event) = listener.next_event().await {
        match event {
            Ok(event) => println!("{}", serde_json::to_string(&event)?),
            Err(e) => {
                error!("Listener stopped: {}", e.sanitized());
                outcome = Err(e.into());
            }
        }
    }

    info!(
        metrics = %serde_json::to_string(&metrics().snapshot())?,
        "Listener finished"
    );
    outcome
}

/// Turn SIGINT/SIGTERM into a listener disconnect request
async fn forward_shutdown_signals(handle: ListenerHandle) {
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            if signal::ctrl_c().await.is_ok() {
                handle.disconnect();
            }
            return;
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    handle.disconnect();
}

fn handle_config_command(
    config: ListenerConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    // The cookie itself is only read at connect time; make sure it is there
    if config.credential_source().cookie_available() {
        info!("Cookie environment variable {} is set", config.session.cookie_env);
    } else {
        warn!(
            "Cookie environment variable {} is not set; connecting will fail",
            config.session.cookie_env
        );
    }

    info!("Configuration validation complete");
    Ok(())
}
