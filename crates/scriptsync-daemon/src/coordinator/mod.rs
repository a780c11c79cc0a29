//! Per-device coordinator.
//!
//! Owns the refresh engine, the poll timer and the event listener for one
//! device, publishes [`SyncState`] to subscribers, and runs user commands
//! against the device followed by a refresh.
//!
//! Refreshes are coalesced: while one is in flight every further request
//! waits on the same result instead of starting another cycle.

mod state;


use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scriptsync_core::{Config, DeviceConnection, Script, ScriptId, Snapshot};

use crate::backup::{BackupStore, FileBackupStore};
use crate::listener::{EventListener, ListenerConfig, ListenerState};
use crate::refresh::{RefreshEngine, RefreshError};
use crate::rpc::{RpcClient, RpcError, RpcTimeouts, ScriptHost};
use crate::transfer::{
    EditPolicy, EditRequest, TransferError, UploadPolicy, delete_script, edit_script,
    upload_script,
};

pub use state::SyncState;

/// Notifications queued while a refresh runs. Extra ones are dropped.
const TRIGGER_CAPACITY: usize = 16;

type SharedRefresh = Shared<BoxFuture<'static, Result<Arc<Snapshot>, RefreshError>>>;

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub poll_interval: Duration,
    pub listen_events: bool,
    pub reconnect_delay: Duration,
    pub upload: UploadPolicy,
    pub edit: EditPolicy,
}

impl CoordinatorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.sync.poll_interval(),
            listen_events: config.sync.listen_events,
            reconnect_delay: config.sync.reconnect_delay(),
            upload: UploadPolicy::from_config(&config.transfer),
            edit: EditPolicy::from_config(&config.transfer),
        }
    }
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct Inner {
    device: DeviceConnection,
    host: Arc<dyn ScriptHost>,
    backups: Arc<dyn BackupStore>,
    engine: RefreshEngine,
    options: CoordinatorOptions,
    state_tx: watch::Sender<SyncState>,
    in_flight: Mutex<Option<SharedRefresh>>,
}

struct BackgroundTasks {
    cancel: CancellationToken,
    poller: JoinHandle<()>,
    listener: Option<JoinHandle<()>>,
    listener_state: Option<watch::Receiver<ListenerState>>,
}

/// Sync engine for one device.
pub struct Coordinator {
    inner: Arc<Inner>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl Coordinator {
    pub fn new(
        device: DeviceConnection,
        host: Arc<dyn ScriptHost>,
        backups: Arc<dyn BackupStore>,
        options: CoordinatorOptions,
    ) -> Self {
        let engine = RefreshEngine::new(Arc::clone(&host), device.model.clone());
        let (state_tx, _) = watch::channel(SyncState::default());
        Self {
            inner: Arc::new(Inner {
                device,
                host,
                backups,
                engine,
                options,
                state_tx,
                in_flight: Mutex::new(None),
            }),
            tasks: Mutex::new(None),
        }
    }

    /// Coordinator talking to a real device over HTTP, with file backups.
    pub fn from_config(device: DeviceConnection, config: &Config) -> Result<Self, RpcError> {
        let host = Arc::new(RpcClient::new(
            &device,
            RpcTimeouts::from_config(&config.sync),
        )?);
        let backups = Arc::new(FileBackupStore::new(
            config.backup.resolved_dir(),
            config.backup.max_per_script,
        ));
        Ok(Self::new(
            device,
            host,
            backups,
            CoordinatorOptions::from_config(config),
        ))
    }

    pub fn device(&self) -> &DeviceConnection {
        &self.inner.device
    }

    /// Observe sync state changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.state_tx.subscribe()
    }

    pub fn state(&self) -> SyncState {
        self.inner.state_tx.borrow().clone()
    }

    /// Latest good snapshot, if any refresh has succeeded.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.state_tx.borrow().snapshot.clone()
    }

    /// Scripts from the latest snapshot, in device order.
    pub fn list_scripts(&self) -> Vec<Script> {
        self.snapshot()
            .map(|s| s.scripts().to_vec())
            .unwrap_or_default()
    }

    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    /// Listener state while running with push notifications enabled.
    pub async fn listener_state(&self) -> Option<watch::Receiver<ListenerState>> {
        self.tasks
            .lock()
            .await
            .as_ref()
            .and_then(|t| t.listener_state.clone())
    }

    /// Refresh now, or join the refresh already in flight.
    pub async fn request_refresh(&self) -> Result<Arc<Snapshot>, RefreshError> {
        self.inner.request_refresh().await
    }

    /// Refresh once, then start the poll timer and the event listener.
    ///
    /// Does nothing when already running. If the initial refresh fails the
    /// error is returned and no background task is started.
    pub async fn start(&self) -> Result<(), RefreshError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            debug!(device = %self.inner.device.name, "Coordinator already running");
            return Ok(());
        }

        self.inner.request_refresh().await?;

        let cancel = CancellationToken::new();
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CAPACITY);

        let (listener, listener_state) = if self.inner.options.listen_events {
            let listener = EventListener::new(
                ListenerConfig {
                    url: self.inner.device.events_url(),
                    reconnect_delay: self.inner.options.reconnect_delay,
                    client_id: format!("scriptsync-{}", uuid::Uuid::new_v4()),
                },
                trigger_tx,
            );
            let state = listener.state();
            (Some(listener.spawn(cancel.child_token())), Some(state))
        } else {
            drop(trigger_tx);
            (None, None)
        };

        let poller = tokio::spawn(poll_loop(
            Arc::clone(&self.inner),
            trigger_rx,
            cancel.clone(),
        ));

        *tasks = Some(BackgroundTasks {
            cancel,
            poller,
            listener,
            listener_state,
        });
        info!(
            device = %self.inner.device.name,
            address = %self.inner.device.address,
            poll_secs = self.inner.options.poll_interval.as_secs(),
            listen_events = self.inner.options.listen_events,
            "Coordinator started"
        );
        Ok(())
    }

    /// Stop the timer and the listener and wait for both to finish.
    pub async fn shutdown(&self) {
        let Some(tasks) = self.tasks.lock().await.take() else {
            debug!(device = %self.inner.device.name, "Coordinator not running");
            return;
        };

        tasks.cancel.cancel();
        if let Some(listener) = tasks.listener {
            if let Err(e) = listener.await {
                warn!(device = %self.inner.device.name, error = %e, "Event listener task failed");
            }
        }
        if let Err(e) = tasks.poller.await {
            warn!(device = %self.inner.device.name, error = %e, "Poller task failed");
        }

        // Let a refresh that is already talking to the device finish publishing.
        let pending = self.inner.in_flight.lock().await.clone();
        if let Some(pending) = pending {
            let _ = pending.await;
        }
        info!(device = %self.inner.device.name, "Coordinator stopped");
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Upload a new script.
    pub async fn upload(&self, name: &str, code: &str) -> Result<ScriptId, TransferError> {
        let id = upload_script(
            self.inner.host.as_ref(),
            name,
            code,
            &self.inner.options.upload,
        )
        .await?;
        self.refresh_after_change().await;
        Ok(id)
    }

    /// Back up and delete a script. Returns the backup location.
    pub async fn delete(&self, id: ScriptId) -> Result<PathBuf, TransferError> {
        let name = self.script_name(id).await?;
        let backup = delete_script(
            self.inner.host.as_ref(),
            self.inner.backups.as_ref(),
            id,
            &name,
        )
        .await?;
        self.refresh_after_change().await;
        Ok(backup)
    }

    /// Replace a script's code, and optionally its name. Returns the new id.
    pub async fn edit(
        &self,
        id: ScriptId,
        new_name: Option<&str>,
        new_code: &str,
    ) -> Result<ScriptId, TransferError> {
        let current_name = self.script_name(id).await?;
        let req = EditRequest {
            id,
            current_name: &current_name,
            new_name: new_name.unwrap_or(current_name.as_str()),
            new_code,
        };
        let result = edit_script(
            self.inner.host.as_ref(),
            self.inner.backups.as_ref(),
            req,
            &self.inner.options.edit,
        )
        .await;
        match &result {
            Ok(_) => self.refresh_after_change().await,
            Err(e) if e.device_changed() => self.refresh_after_change().await,
            Err(_) => {}
        }
        result
    }

    /// Start a script. Returns whether it was already running.
    pub async fn start_script(&self, id: ScriptId) -> Result<bool, TransferError> {
        let was_running = self.inner.host.start_script(id).await?;
        info!(script_id = id, was_running, "Script started");
        self.refresh_after_change().await;
        Ok(was_running)
    }

    /// Stop a script. Returns whether it was running.
    pub async fn stop_script(&self, id: ScriptId) -> Result<bool, TransferError> {
        let was_running = self.inner.host.stop_script(id).await?;
        info!(script_id = id, was_running, "Script stopped");
        self.refresh_after_change().await;
        Ok(was_running)
    }

    pub async fn set_autostart(&self, id: ScriptId, enabled: bool) -> Result<(), TransferError> {
        self.inner.host.set_autostart(id, enabled).await?;
        info!(script_id = id, enabled, "Script autostart changed");
        self.refresh_after_change().await;
        Ok(())
    }

    /// Fetch a script's code from the device. Never cached.
    pub async fn get_code(&self, id: ScriptId) -> Result<String, TransferError> {
        Ok(self.inner.host.get_code(id).await?)
    }

    /// Name of a script, from the snapshot or, failing that, the device.
    async fn script_name(&self, id: ScriptId) -> Result<String, TransferError> {
        if let Some(script) = self.snapshot().and_then(|s| s.get(id).cloned()) {
            return Ok(script.name);
        }
        self.inner
            .host
            .list_scripts()
            .await?
            .into_iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.name)
            .ok_or(TransferError::ScriptNotFound(id))
    }

    async fn refresh_after_change(&self) {
        if let Err(e) = self.inner.request_refresh().await {
            warn!(device = %self.inner.device.name, error = %e, "Refresh after change failed");
        }
    }
}

impl Inner {
    async fn request_refresh(self: &Arc<Self>) -> Result<Arc<Snapshot>, RefreshError> {
        let pending = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(pending) = in_flight.as_ref() {
                debug!(device = %self.device.name, "Joining in-flight refresh");
                pending.clone()
            } else {
                // The cycle runs on its own task so a caller that gives up
                // does not cancel it for everyone else waiting on it.
                let inner = Arc::clone(self);
                let task = tokio::spawn(async move {
                    let result = inner.run_refresh().await;
                    inner.in_flight.lock().await.take();
                    result
                });
                let pending = async move {
                    task.await
                        .unwrap_or_else(|e| Err(RefreshError::Aborted(e.to_string())))
                }
                .boxed()
                .shared();
                *in_flight = Some(pending.clone());
                pending
            }
        };
        pending.await
    }

    async fn run_refresh(&self) -> Result<Arc<Snapshot>, RefreshError> {
        match self.engine.run_cycle().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.state_tx.send_replace(SyncState {
                    snapshot: Some(Arc::clone(&snapshot)),
                    last_update_success: true,
                    last_error: None,
                });
                Ok(snapshot)
            }
            Err(e) => {
                warn!(
                    device = %self.device.name,
                    error = %e,
                    "Refresh failed, keeping last snapshot"
                );
                self.state_tx.send_modify(|state| {
                    state.last_update_success = false;
                    state.last_error = Some(e.clone());
                });
                Err(e)
            }
        }
    }
}

/// Refresh on the poll timer and on push notifications until cancelled.
async fn poll_loop(
    inner: Arc<Inner>,
    mut triggers: mpsc::Receiver<ScriptId>,
    cancel: CancellationToken,
) {
    let period = inner.options.poll_interval.max(Duration::from_secs(1));
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer.tick().await; // start() has just refreshed

    loop {
        let trigger = tokio::select! {
            () = cancel.cancelled() => break,
            _ = timer.tick() => "timer",
            Some(id) = triggers.recv() => {
                debug!(
                    device = %inner.device.name,
                    script_id = id,
                    "Status notification, refreshing"
                );
                // One refresh covers every notification already queued.
                while triggers.try_recv().is_ok() {}
                "notification"
            }
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            result = inner.request_refresh() => {
                if let Err(e) = result {
                    debug!(
                        device = %inner.device.name,
                        trigger,
                        error = %e,
                        "Scheduled refresh failed"
                    );
                }
            }
        }
    }
    debug!(device = %inner.device.name, "Poller stopped");
}
