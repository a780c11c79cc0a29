//! Script host domain model.
//!
//! A [`Snapshot`] is the aggregate produced by one refresh cycle. It is built
//! once, never mutated, and replaced wholesale by the next cycle.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Device-assigned script identifier, unique per device while the script exists.
pub type ScriptId = u32;

/// Identifies one remote script host. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConnection {
    /// Operator-facing device name (registry key).
    pub name: String,
    /// Network address as `host` or `host:port`, without scheme.
    pub address: String,
    /// Device class / model string reported by the device.
    pub model: String,
}

impl DeviceConnection {
    pub fn new(name: impl Into<String>, address: &str, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: normalize_address(address),
            model: model.into(),
        }
    }

    /// Base URL for the HTTP RPC endpoints.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address)
    }

    /// URL of the push-notification channel.
    pub fn events_url(&self) -> String {
        format!("ws://{}/rpc", self.address)
    }
}

fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let without_scheme = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("ws://"))
        .unwrap_or(trimmed);
    without_scheme.trim_end_matches('/').to_string()
}

/// One unit of code resident on the device.
///
/// The code body is intentionally absent; it is fetched on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub id: ScriptId,
    pub name: String,
    /// Autostart flag (run on device boot).
    pub enabled: bool,
    pub running: bool,
    pub mem_used: u64,
    pub mem_peak: u64,
    pub mem_free: u64,
}

/// Immutable result of one refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    device_class: String,
    scripts: Vec<Script>,
    running_count: usize,
    enabled_count: usize,
}

impl Snapshot {
    /// Build a snapshot, keeping device order and recomputing the counts
    /// from `scripts` alone.
    ///
    /// A script id reported twice keeps its first occurrence.
    pub fn new(device_class: impl Into<String>, scripts: Vec<Script>) -> Self {
        let mut seen = HashSet::with_capacity(scripts.len());
        let scripts: Vec<Script> = scripts
            .into_iter()
            .filter(|s| {
                let fresh = seen.insert(s.id);
                if !fresh {
                    warn!(script_id = s.id, "Duplicate script id in device listing, ignoring");
                }
                fresh
            })
            .collect();

        let running_count = scripts.iter().filter(|s| s.running).count();
        let enabled_count = scripts.iter().filter(|s| s.enabled).count();
        Self {
            device_class: device_class.into(),
            scripts,
            running_count,
            enabled_count,
        }
    }

    pub fn device_class(&self) -> &str {
        &self.device_class
    }

    /// Scripts in device-reported order.
    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub const fn running_count(&self) -> usize {
        self.running_count
    }

    pub const fn enabled_count(&self) -> usize {
        self.enabled_count
    }

    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    pub fn get(&self, id: ScriptId) -> Option<&Script> {
        self.scripts.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: ScriptId) -> bool {
        self.get(id).is_some()
    }

    /// Names of the scripts currently running, in device order.
    pub fn running_names(&self) -> Vec<&str> {
        self.scripts
            .iter()
            .filter(|s| s.running)
            .map(|s| s.name.as_str())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn script(id: ScriptId, name: &str, enabled: bool, running: bool) -> Script {
        Script {
            id,
            name: name.into(),
            enabled,
            running,
            mem_used: 0,
            mem_peak: 0,
            mem_free: 0,
        }
    }

    #[test]
    fn counts_are_recomputed_from_scripts() {
        let snap = Snapshot::new(
            "SNSW-001X16EU",
            vec![
                script(1, "ble", true, true),
                script(2, "energy", false, true),
                script(3, "notify", true, false),
            ],
        );
        assert_eq!(snap.script_count(), 3);
        assert_eq!(snap.running_count(), 2);
        assert_eq!(snap.enabled_count(), 2);
        assert_eq!(snap.running_names(), vec!["ble", "energy"]);
    }

    #[test]
    fn empty_snapshot_has_zero_counts() {
        let snap = Snapshot::new("unknown", Vec::new());
        assert_eq!(snap.running_count(), 0);
        assert_eq!(snap.enabled_count(), 0);
        assert!(snap.running_names().is_empty());
    }

    #[test]
    fn duplicate_ids_keep_first_occurrence() {
        let snap = Snapshot::new(
            "m",
            vec![script(7, "first", false, true), script(7, "second", true, false)],
        );
        assert_eq!(snap.script_count(), 1);
        assert_eq!(snap.get(7).unwrap().name, "first");
        assert_eq!(snap.running_count(), 1);
        assert_eq!(snap.enabled_count(), 0);
    }

    #[test]
    fn device_order_is_preserved() {
        let snap = Snapshot::new(
            "m",
            vec![script(9, "a", false, false), script(2, "b", false, false)],
        );
        let ids: Vec<_> = snap.scripts().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![9, 2]);
        assert!(snap.contains(2));
        assert!(!snap.contains(3));
    }

    #[test]
    fn device_urls_strip_scheme_and_slash() {
        let device = DeviceConnection::new("garage", "http://192.168.1.100/", "SNSW");
        assert_eq!(device.address, "192.168.1.100");
        assert_eq!(device.base_url(), "http://192.168.1.100");
        assert_eq!(device.events_url(), "ws://192.168.1.100/rpc");
    }

    #[test]
    fn device_address_keeps_port() {
        let device = DeviceConnection::new("lab", "127.0.0.1:8080", "m");
        assert_eq!(device.base_url(), "http://127.0.0.1:8080");
    }
}
