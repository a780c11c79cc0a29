//! Shared test fixtures: an in-memory script host and backup store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use scriptsync_core::ScriptId;

use crate::backup::{BackupError, BackupReason, BackupStore};
use crate::rpc::{DeviceInfo, RpcError, ScriptEntry, ScriptHost, ScriptStatus};

/// One recorded call against [`FakeHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    DeviceInfo,
    List,
    Create(String),
    PutCode { id: ScriptId, len: usize, append: bool },
    GetCode(ScriptId),
    Delete(ScriptId),
    Status(ScriptId),
    Start(ScriptId),
    Stop(ScriptId),
    SetAutostart(ScriptId, bool),
}

#[derive(Debug, Clone)]
pub struct FakeScript {
    pub id: ScriptId,
    pub name: String,
    pub code: String,
    pub enabled: bool,
    pub running: bool,
}

#[derive(Default)]
struct Faults {
    fail_list: bool,
    /// Remaining `Script.Create` calls that fail.
    create_failures: u32,
    /// Remaining `Script.PutCode` calls that fail.
    put_failures: u32,
    fail_delete: bool,
    fail_get_code: bool,
    status_failures: HashSet<ScriptId>,
    status_delays: HashMap<ScriptId, Duration>,
    list_delay: Option<Duration>,
}

#[derive(Default)]
struct Device {
    scripts: Vec<FakeScript>,
    next_id: ScriptId,
}

/// In-memory script host that records every call.
#[derive(Default)]
pub struct FakeHost {
    device: Mutex<Device>,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<Call>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(
        self,
        id: ScriptId,
        name: &str,
        code: &str,
        enabled: bool,
        running: bool,
    ) -> Self {
        {
            let mut device = self.device.lock().unwrap();
            device.scripts.push(FakeScript {
                id,
                name: name.into(),
                code: code.into(),
                enabled,
                running,
            });
            device.next_id = device.next_id.max(id + 1);
        }
        self
    }

    pub fn fail_list(&self, fail: bool) {
        self.faults.lock().unwrap().fail_list = fail;
    }

    pub fn fail_creates(&self, count: u32) {
        self.faults.lock().unwrap().create_failures = count;
    }

    pub fn fail_puts(&self, count: u32) {
        self.faults.lock().unwrap().put_failures = count;
    }

    pub fn fail_delete(&self, fail: bool) {
        self.faults.lock().unwrap().fail_delete = fail;
    }

    pub fn fail_get_code(&self, fail: bool) {
        self.faults.lock().unwrap().fail_get_code = fail;
    }

    pub fn fail_status(&self, id: ScriptId) {
        self.faults.lock().unwrap().status_failures.insert(id);
    }

    pub fn delay_status(&self, id: ScriptId, delay: Duration) {
        self.faults.lock().unwrap().status_delays.insert(id, delay);
    }

    pub fn delay_list(&self, delay: Duration) {
        self.faults.lock().unwrap().list_delay = Some(delay);
    }

    pub fn set_running(&self, id: ScriptId, running: bool) {
        let mut device = self.device.lock().unwrap();
        if let Some(s) = device.scripts.iter_mut().find(|s| s.id == id) {
            s.running = running;
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn scripts(&self) -> Vec<FakeScript> {
        self.device.lock().unwrap().scripts.clone()
    }

    pub fn script(&self, id: ScriptId) -> Option<FakeScript> {
        self.scripts().into_iter().find(|s| s.id == id)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(counter: &mut u32) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl ScriptHost for FakeHost {
    async fn get_device_info(&self) -> Result<DeviceInfo, RpcError> {
        self.record(Call::DeviceInfo);
        Ok(DeviceInfo {
            id: Some("fake-device".into()),
            model: Some("FAKE-1".into()),
            app: None,
            ver: Some("1.0.0".into()),
            generation: Some(2),
        })
    }

    async fn list_scripts(&self) -> Result<Vec<ScriptEntry>, RpcError> {
        self.record(Call::List);
        let (fail, delay) = {
            let faults = self.faults.lock().unwrap();
            (faults.fail_list, faults.list_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(RpcError::Connection("device unreachable".into()));
        }
        let device = self.device.lock().unwrap();
        Ok(device
            .scripts
            .iter()
            .map(|s| ScriptEntry {
                id: s.id,
                name: s.name.clone(),
                enabled: s.enabled,
                running: s.running,
            })
            .collect())
    }

    async fn create_script(&self, name: &str) -> Result<ScriptId, RpcError> {
        self.record(Call::Create(name.into()));
        if Self::take_failure(&mut self.faults.lock().unwrap().create_failures) {
            return Err(RpcError::BadStatus(500));
        }
        let mut device = self.device.lock().unwrap();
        let id = device.next_id.max(1);
        device.next_id = id + 1;
        device.scripts.push(FakeScript {
            id,
            name: name.into(),
            code: String::new(),
            enabled: false,
            running: false,
        });
        Ok(id)
    }

    async fn put_code(&self, id: ScriptId, chunk: &str, append: bool) -> Result<(), RpcError> {
        self.record(Call::PutCode {
            id,
            len: chunk.len(),
            append,
        });
        if Self::take_failure(&mut self.faults.lock().unwrap().put_failures) {
            return Err(RpcError::Connection("timed out".into()));
        }
        let mut device = self.device.lock().unwrap();
        let script = device
            .scripts
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(RpcError::BadStatus(404))?;
        if append {
            script.code.push_str(chunk);
        } else {
            script.code = chunk.to_string();
        }
        Ok(())
    }

    async fn get_code(&self, id: ScriptId) -> Result<String, RpcError> {
        self.record(Call::GetCode(id));
        if self.faults.lock().unwrap().fail_get_code {
            return Err(RpcError::BadStatus(500));
        }
        self.script(id)
            .map(|s| s.code)
            .ok_or(RpcError::BadStatus(404))
    }

    async fn delete_script(&self, id: ScriptId) -> Result<(), RpcError> {
        self.record(Call::Delete(id));
        if self.faults.lock().unwrap().fail_delete {
            return Err(RpcError::BadStatus(500));
        }
        let mut device = self.device.lock().unwrap();
        let before = device.scripts.len();
        device.scripts.retain(|s| s.id != id);
        if device.scripts.len() == before {
            return Err(RpcError::BadStatus(404));
        }
        Ok(())
    }

    async fn get_status(&self, id: ScriptId) -> Result<ScriptStatus, RpcError> {
        self.record(Call::Status(id));
        let (fail, delay) = {
            let faults = self.faults.lock().unwrap();
            (
                faults.status_failures.contains(&id),
                faults.status_delays.get(&id).copied(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(RpcError::Connection("status timed out".into()));
        }
        let script = self.script(id).ok_or(RpcError::BadStatus(404))?;
        Ok(ScriptStatus {
            id,
            running: script.running,
            mem_used: if script.running { 1024 } else { 0 },
            mem_peak: if script.running { 1500 } else { 0 },
            mem_free: 2048,
        })
    }

    async fn start_script(&self, id: ScriptId) -> Result<bool, RpcError> {
        self.record(Call::Start(id));
        let mut device = self.device.lock().unwrap();
        let script = device
            .scripts
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(RpcError::BadStatus(404))?;
        let was_running = script.running;
        script.running = true;
        Ok(was_running)
    }

    async fn stop_script(&self, id: ScriptId) -> Result<bool, RpcError> {
        self.record(Call::Stop(id));
        let mut device = self.device.lock().unwrap();
        let script = device
            .scripts
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(RpcError::BadStatus(404))?;
        let was_running = script.running;
        script.running = false;
        Ok(was_running)
    }

    async fn set_autostart(&self, id: ScriptId, enabled: bool) -> Result<(), RpcError> {
        self.record(Call::SetAutostart(id, enabled));
        let mut device = self.device.lock().unwrap();
        let script = device
            .scripts
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(RpcError::BadStatus(404))?;
        script.enabled = enabled;
        Ok(())
    }
}

/// A backup saved by [`MemoryBackups`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedBackup {
    pub id: ScriptId,
    pub name: String,
    pub code: String,
    pub reason: BackupReason,
}

/// Backup store that keeps records in memory and can be told to fail.
#[derive(Default)]
pub struct MemoryBackups {
    saved: Mutex<Vec<SavedBackup>>,
    fail: Mutex<bool>,
}

impl MemoryBackups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn saved(&self) -> Vec<SavedBackup> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackupStore for MemoryBackups {
    async fn save_backup(
        &self,
        id: ScriptId,
        name: &str,
        code: &str,
        reason: BackupReason,
    ) -> Result<PathBuf, BackupError> {
        if *self.fail.lock().unwrap() {
            return Err(BackupError::Io(std::io::Error::other("disk full")));
        }
        let mut saved = self.saved.lock().unwrap();
        saved.push(SavedBackup {
            id,
            name: name.into(),
            code: code.into(),
            reason,
        });
        Ok(PathBuf::from(format!(
            "/backups/script_{id}_{}_{}.json",
            reason.as_str(),
            saved.len()
        )))
    }
}
