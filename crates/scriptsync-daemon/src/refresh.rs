//! One polling cycle: list scripts, fetch every status concurrently, build a
//! [`Snapshot`].
//!
//! Only a failed `Script.List` fails the cycle. A failed status call degrades
//! that one script to "not running, no memory figures".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use scriptsync_core::{Script, ScriptId, Snapshot};

use crate::rpc::{RpcError, ScriptEntry, ScriptHost, ScriptStatus};
use crate::transfer::ErrorClass;

/// A refresh cycle that produced no snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("Update failed: {0}")]
    UpdateFailed(#[source] RpcError),

    #[error("Refresh task aborted: {0}")]
    Aborted(String),
}

impl RefreshError {
    /// Polling retries on its own schedule, so every refresh failure is transient.
    pub const fn class(&self) -> ErrorClass {
        ErrorClass::Transient
    }
}

/// Builds snapshots for one device.
pub struct RefreshEngine {
    host: Arc<dyn ScriptHost>,
    device_class: String,
}

impl RefreshEngine {
    pub fn new(host: Arc<dyn ScriptHost>, device_class: impl Into<String>) -> Self {
        Self {
            host,
            device_class: device_class.into(),
        }
    }

    pub fn device_class(&self) -> &str {
        &self.device_class
    }

    /// Run one cycle.
    pub async fn run_cycle(&self) -> Result<Snapshot, RefreshError> {
        let entries = self
            .host
            .list_scripts()
            .await
            .map_err(RefreshError::UpdateFailed)?;

        let mut statuses = self.fetch_statuses(&entries).await;

        let scripts: Vec<Script> = entries
            .into_iter()
            .map(|entry| {
                let status = statuses
                    .remove(&entry.id)
                    .unwrap_or_else(|| ScriptStatus::unavailable(entry.id));
                Script {
                    id: entry.id,
                    name: entry.name,
                    // The list is authoritative for autostart.
                    enabled: entry.enabled,
                    running: status.running,
                    mem_used: status.mem_used,
                    mem_peak: status.mem_peak,
                    mem_free: status.mem_free,
                }
            })
            .collect();

        let snapshot = Snapshot::new(self.device_class.clone(), scripts);
        debug!(
            scripts = snapshot.script_count(),
            running = snapshot.running_count(),
            enabled = snapshot.enabled_count(),
            "Refresh cycle complete"
        );
        Ok(snapshot)
    }

    /// Status for every listed script, keyed by id. Failed calls are absent.
    async fn fetch_statuses(&self, entries: &[ScriptEntry]) -> HashMap<ScriptId, ScriptStatus> {
        let mut tasks = JoinSet::new();
        let mut seen = HashSet::new();
        for entry in entries {
            if !seen.insert(entry.id) {
                continue;
            }
            let host = Arc::clone(&self.host);
            let id = entry.id;
            tasks.spawn(async move { (id, host.get_status(id).await) });
        }

        let mut statuses = HashMap::with_capacity(seen.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(status))) => {
                    statuses.insert(id, status);
                }
                Ok((id, Err(e))) => {
                    warn!(
                        script_id = id,
                        error = %e,
                        "Script status unavailable, assuming stopped"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Status task failed");
                }
            }
        }
        statuses
    }
}
