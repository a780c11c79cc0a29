//! `ScriptSync` daemon
//!
//! Keeps scripts on networked script hosts in sync with a local view and
//! offers one-shot commands to inspect and change them.

use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use scriptsync_core::{Config, DeviceConnection};
use scriptsync_core::config::{DeviceConfig, load_config};
use scriptsync_daemon::commands::{self, ScriptAction};
use scriptsync_daemon::coordinator::Coordinator;
use scriptsync_daemon::registry::{CoordinatorFactory, DeviceRegistry};
use scriptsync_daemon::rpc::{RpcClient, RpcTimeouts};

#[derive(Parser, Debug)]
#[command(name = "scriptsync")]
#[command(version, about = "Keep scripts on a remote script host in sync")]
struct Args {
    /// Settings file (replaces the global settings file)
    #[arg(long, global = true, env = "SCRIPTSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Device name or address for one-shot commands
    #[arg(short, long, global = true, env = "SCRIPTSYNC_DEVICE")]
    device: Option<String>,

    /// Log level filter (e.g. "info", "debug")
    #[arg(long, global = true, default_value = "info", env = "SCRIPTSYNC_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "SCRIPTSYNC_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep every configured device in sync until interrupted.
    Run,
    /// Show the device's identity and class.
    Probe,
    #[command(flatten)]
    Script(ScriptAction),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!(
        "scriptsync_daemon={level},scriptsync_core={level}",
        level = args.log_level
    );
    scriptsync_core::tracing_init::init_tracing(&log_filter, args.log_json);

    let mut config = load_config(args.config.as_deref())?;
    let mut out = io::stdout();
    match args.command {
        Command::Run => {
            if let Some(key) = args.device.as_deref() {
                // Run just this device.
                config.devices = vec![commands::select_device(&config, Some(key))?];
            }
            run_daemon(args.config, config).await
        }
        Command::Probe => {
            let device = commands::select_device(&config, args.device.as_deref())?;
            let conn = DeviceConnection::new(&device.name, &device.address, "unknown");
            let client = RpcClient::new(&conn, RpcTimeouts::from_config(&config.sync))?;
            commands::probe(&client, &mut out).await
        }
        Command::Script(action) => {
            let device = commands::select_device(&config, args.device.as_deref())?;
            let conn = commands::connect_device(&device, &config).await;
            let coordinator = Coordinator::from_config(conn, &config)?;
            commands::run(action, &coordinator, &mut out).await
        }
    }
}

/// Long-running mode: one coordinator per configured device.
async fn run_daemon(config_path: Option<PathBuf>, config: Config) -> anyhow::Result<()> {
    if config.devices.is_empty() {
        anyhow::bail!("No devices configured");
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        devices = config.devices.len(),
        poll_secs = config.sync.poll_interval_secs,
        "Starting scriptsync"
    );

    // The factory reads the latest settings so reloads pick up changes.
    let (config_tx, config_rx) = watch::channel(config.clone());
    let factory: CoordinatorFactory = Box::new(move |device: DeviceConnection| {
        Coordinator::from_config(device, &config_rx.borrow())
    });
    let mut registry = DeviceRegistry::new(factory);

    let mut pending = activate_all(&mut registry, config.devices.clone(), &config).await;

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;

    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    let mut retry = tokio::time::interval(config.sync.poll_interval());
    retry.tick().await;
    let mut current = config;

    loop {
        #[cfg(unix)]
        let (term, hup) = (sigterm.recv(), sighup.recv());
        #[cfg(not(unix))]
        let (term, hup) = (
            std::future::pending::<Option<()>>(),
            std::future::pending::<Option<()>>(),
        );

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
                break;
            }
            _ = term => {
                info!("Received SIGTERM shutdown signal");
                break;
            }
            _ = hup => {
                info!("Received SIGHUP, reloading settings");
                match load_config(config_path.as_deref()) {
                    Ok(new_config) => {
                        config_tx.send_replace(new_config.clone());
                        pending = reload_all(&mut registry, &new_config).await;
                        current = new_config;
                    }
                    Err(e) => warn!(error = %e, "Settings reload failed, keeping current settings"),
                }
            }
            _ = retry.tick(), if !pending.is_empty() => {
                pending = activate_all(&mut registry, pending, &current).await;
            }
        }
    }

    registry.shutdown_all().await;
    info!("scriptsync stopped");
    Ok(())
}

/// Activate each device; return the ones that failed so they can be retried.
async fn activate_all(
    registry: &mut DeviceRegistry,
    devices: Vec<DeviceConfig>,
    config: &Config,
) -> Vec<DeviceConfig> {
    let mut failed = Vec::new();
    for device in devices {
        let conn = commands::connect_device(&device, config).await;
        if let Err(e) = registry.activate(conn).await {
            error!(device = %device.name, error = %e, "Device activation failed, will retry");
            failed.push(device);
        }
    }
    failed
}

/// Apply new settings: drop removed devices, restart the rest.
async fn reload_all(registry: &mut DeviceRegistry, config: &Config) -> Vec<DeviceConfig> {
    let active: Vec<String> = registry.names().into_iter().map(String::from).collect();
    for name in active {
        if !config.devices.iter().any(|d| d.name == name) {
            registry.deactivate(&name).await;
        }
    }

    let mut failed = Vec::new();
    for device in &config.devices {
        let conn = commands::connect_device(device, config).await;
        if let Err(e) = registry.reload(conn).await {
            error!(device = %device.name, error = %e, "Device reload failed, will retry");
            failed.push(device.clone());
        }
    }
    failed
}
