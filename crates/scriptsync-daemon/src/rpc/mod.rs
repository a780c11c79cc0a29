//! Script host RPC integration.
//!
//! Provides a reqwest-based client for the device's HTTP RPC endpoints and the
//! [`ScriptHost`] seam the transfer, refresh and coordinator layers are written
//! against.

mod client;
mod error;
pub mod types;


use async_trait::async_trait;

use scriptsync_core::ScriptId;

pub use client::{RpcClient, RpcTimeouts};
pub use error::RpcError;
pub use types::{DeviceInfo, ScriptEntry, ScriptStatus};

/// One operation per remote capability of the script host.
///
/// Every failure is already classified as an [`RpcError`].
#[async_trait]
pub trait ScriptHost: Send + Sync {
    async fn get_device_info(&self) -> Result<DeviceInfo, RpcError>;

    /// Scripts in device order, with the authoritative autostart flag.
    async fn list_scripts(&self) -> Result<Vec<ScriptEntry>, RpcError>;

    /// Create an empty script and return the id the device assigned.
    async fn create_script(&self, name: &str) -> Result<ScriptId, RpcError>;

    /// Write one chunk; `append = false` overwrites the existing body.
    async fn put_code(&self, id: ScriptId, chunk: &str, append: bool) -> Result<(), RpcError>;

    async fn get_code(&self, id: ScriptId) -> Result<String, RpcError>;

    async fn delete_script(&self, id: ScriptId) -> Result<(), RpcError>;

    async fn get_status(&self, id: ScriptId) -> Result<ScriptStatus, RpcError>;

    /// Returns whether the script was already running.
    async fn start_script(&self, id: ScriptId) -> Result<bool, RpcError>;

    /// Returns whether the script was running before the call.
    async fn stop_script(&self, id: ScriptId) -> Result<bool, RpcError>;

    async fn set_autostart(&self, id: ScriptId, enabled: bool) -> Result<(), RpcError>;
}
