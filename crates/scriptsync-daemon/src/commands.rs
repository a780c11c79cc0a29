//! One-shot script commands: list, code, upload, delete, start, stop,
//! autostart, edit, probe.
//!
//! User-facing output uses writeln! to the given writer (stdout in the
//! binary), not tracing.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};

use scriptsync_core::config::DeviceConfig;
use scriptsync_core::{Config, DeviceConnection, ScriptId, Snapshot};

use crate::coordinator::Coordinator;
use crate::rpc::{RpcClient, RpcTimeouts, ScriptHost};
use crate::transfer::{ErrorClass, TransferError};

/// Script subcommands.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ScriptAction {
    /// List scripts with their state.
    List {
        /// Print the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print a script's code.
    Code { id: ScriptId },
    /// Upload a file as a new script.
    Upload {
        #[arg(long)]
        name: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Back up and delete a script.
    Delete { id: ScriptId },
    /// Start a script.
    Start { id: ScriptId },
    /// Stop a script.
    Stop { id: ScriptId },
    /// Enable or disable running a script at boot.
    Autostart {
        id: ScriptId,
        #[arg(long, conflicts_with = "disable", required_unless_present = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
    /// Replace a script's code (and optionally its name), keeping a backup.
    Edit {
        id: ScriptId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        file: PathBuf,
    },
}

/// Execute a script subcommand against one device.
pub async fn run(
    action: ScriptAction,
    coordinator: &Coordinator,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match action {
        ScriptAction::List { json } => list(coordinator, json, out).await,
        ScriptAction::Code { id } => {
            let code = coordinator.get_code(id).await.map_err(classified)?;
            write!(out, "{code}")?;
            if !code.ends_with('\n') {
                writeln!(out)?;
            }
            Ok(())
        }
        ScriptAction::Upload { name, file } => {
            let code = read_code(&file)?;
            let id = coordinator.upload(&name, &code).await.map_err(classified)?;
            writeln!(out, "Uploaded '{name}' as script {id} ({} bytes)", code.len())?;
            Ok(())
        }
        ScriptAction::Delete { id } => {
            let backup = coordinator.delete(id).await.map_err(classified)?;
            writeln!(out, "Deleted script {id}, backup at {}", backup.display())?;
            Ok(())
        }
        ScriptAction::Start { id } => {
            let was_running = coordinator.start_script(id).await.map_err(classified)?;
            if was_running {
                writeln!(out, "Script {id} was already running")?;
            } else {
                writeln!(out, "Started script {id}")?;
            }
            Ok(())
        }
        ScriptAction::Stop { id } => {
            let was_running = coordinator.stop_script(id).await.map_err(classified)?;
            if was_running {
                writeln!(out, "Stopped script {id}")?;
            } else {
                writeln!(out, "Script {id} was not running")?;
            }
            Ok(())
        }
        ScriptAction::Autostart { id, enable, .. } => {
            coordinator
                .set_autostart(id, enable)
                .await
                .map_err(classified)?;
            let verb = if enable { "enabled" } else { "disabled" };
            writeln!(out, "Autostart {verb} for script {id}")?;
            Ok(())
        }
        ScriptAction::Edit { id, name, file } => {
            let code = read_code(&file)?;
            let new_id = coordinator
                .edit(id, name.as_deref(), &code)
                .await
                .map_err(classified)?;
            writeln!(out, "Replaced script {id}, new id {new_id}")?;
            Ok(())
        }
    }
}

/// Pick the device a one-shot command talks to.
///
/// `key` may be a configured name, a configured address, or any other
/// address. Without a key the single configured device is used.
pub fn select_device(config: &Config, key: Option<&str>) -> anyhow::Result<DeviceConfig> {
    if let Some(key) = key {
        return Ok(config.find_device(key).cloned().unwrap_or_else(|| DeviceConfig {
            name: key.to_string(),
            address: key.to_string(),
            model: None,
        }));
    }
    match config.devices.as_slice() {
        [only] => Ok(only.clone()),
        [] => anyhow::bail!(
            "No device configured. Pass --device <address> or add one to the settings file"
        ),
        _ => anyhow::bail!("Several devices configured; choose one with --device <name>"),
    }
}

/// Build the connection for a configured device, probing the device class
/// when the settings do not name one.
pub async fn connect_device(device: &DeviceConfig, config: &Config) -> DeviceConnection {
    if let Some(model) = &device.model {
        return DeviceConnection::new(&device.name, &device.address, model);
    }
    let unprobed = DeviceConnection::new(&device.name, &device.address, "unknown");
    let model = match RpcClient::new(&unprobed, RpcTimeouts::from_config(&config.sync)) {
        Ok(client) => match client.get_device_info().await {
            Ok(info) => info.device_class().to_string(),
            Err(e) => {
                warn!(device = %device.name, error = %e, "Device probe failed");
                "unknown".to_string()
            }
        },
        Err(e) => {
            warn!(device = %device.name, error = %e, "Device probe failed");
            "unknown".to_string()
        }
    };
    info!(device = %device.name, %model, "Probed device class");
    DeviceConnection::new(&device.name, &device.address, model)
}

/// Print the device's identity.
pub async fn probe(host: &dyn ScriptHost, out: &mut impl Write) -> anyhow::Result<()> {
    let info = host
        .get_device_info()
        .await
        .context("Failed to query device info")?;
    writeln!(out, "Device class: {}", info.device_class())?;
    if let Some(id) = &info.id {
        writeln!(out, "Id:           {id}")?;
    }
    if let Some(ver) = &info.ver {
        writeln!(out, "Firmware:     {ver}")?;
    }
    if let Some(generation) = info.generation {
        writeln!(out, "Generation:   {generation}")?;
    }
    Ok(())
}

async fn list(coordinator: &Coordinator, json: bool, out: &mut impl Write) -> anyhow::Result<()> {
    let snapshot = coordinator
        .request_refresh()
        .await
        .map_err(|e| anyhow::anyhow!("{e} [{}]", e.class()))?;
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(snapshot.as_ref())?)?;
    } else {
        write_table(&snapshot, out)?;
    }
    Ok(())
}

fn write_table(snapshot: &Snapshot, out: &mut impl Write) -> anyhow::Result<()> {
    if snapshot.script_count() == 0 {
        writeln!(out, "No scripts on {}", snapshot.device_class())?;
        return Ok(());
    }
    writeln!(
        out,
        "{:<5} {:<24} {:<8} {:<9} {:>10} {:>10}",
        "ID", "NAME", "STATE", "AUTOSTART", "MEM USED", "MEM PEAK"
    )?;
    for script in snapshot.scripts() {
        writeln!(
            out,
            "{:<5} {:<24} {:<8} {:<9} {:>10} {:>10}",
            script.id,
            script.name,
            if script.running { "running" } else { "stopped" },
            if script.enabled { "on" } else { "off" },
            script.mem_used,
            script.mem_peak,
        )?;
    }
    writeln!(
        out,
        "{} scripts, {} running, {} with autostart",
        snapshot.script_count(),
        snapshot.running_count(),
        snapshot.enabled_count()
    )?;
    Ok(())
}

fn read_code(file: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

/// Attach the user-facing classification to a command failure.
fn classified(err: TransferError) -> anyhow::Error {
    let hint = match err.class() {
        ErrorClass::ScriptLost => {
            " The script is no longer on the device; restore it from the backup."
        }
        ErrorClass::Transient | ErrorClass::ActionFailed => "",
    };
    anyhow::anyhow!("{err} [{}: {}]{hint}", err.class(), err.kind())
}
