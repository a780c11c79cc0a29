//! Script host RPC request and response types.
//!
//! Serde structs matching the device's JSON bodies. Only the fields the engine
//! reads are modelled; unknown fields are ignored.

use serde::{Deserialize, Serialize};

use scriptsync_core::ScriptId;

/// `Shelly.GetDeviceInfo` response (subset of fields).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub ver: Option<String>,
    #[serde(default, rename = "gen")]
    pub generation: Option<u32>,
}

impl DeviceInfo {
    /// Device class: `model`, falling back to `app`, then `"unknown"`.
    pub fn device_class(&self) -> &str {
        self.model
            .as_deref()
            .or(self.app.as_deref())
            .unwrap_or("unknown")
    }
}

/// One entry of the `Script.List` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScriptEntry {
    pub id: ScriptId,
    #[serde(default)]
    pub name: String,
    /// Autostart flag. Authoritative over anything `Script.GetStatus` reports.
    #[serde(default, rename = "enable")]
    pub enabled: bool,
    #[serde(default)]
    pub running: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScriptList {
    #[serde(default)]
    pub scripts: Vec<ScriptEntry>,
}

/// `Script.GetStatus` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScriptStatus {
    pub id: ScriptId,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub mem_used: u64,
    #[serde(default)]
    pub mem_peak: u64,
    #[serde(default)]
    pub mem_free: u64,
}

impl ScriptStatus {
    /// Placeholder recorded when a status call fails.
    pub const fn unavailable(id: ScriptId) -> Self {
        Self {
            id,
            running: false,
            mem_used: 0,
            mem_peak: 0,
            mem_free: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateResponse {
    #[serde(default)]
    pub id: Option<ScriptId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CodeResponse {
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunResponse {
    #[serde(default)]
    pub was_running: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct IdRequest {
    pub id: ScriptId,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct PutCodeRequest<'a> {
    pub id: ScriptId,
    pub code: &'a str,
    pub append: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SetConfigRequest {
    pub id: ScriptId,
    pub config: ScriptConfigPatch,
}

#[derive(Debug, Serialize)]
pub(crate) struct ScriptConfigPatch {
    pub enable: bool,
}
