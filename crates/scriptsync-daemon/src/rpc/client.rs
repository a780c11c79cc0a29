//! HTTP RPC client for a script host.
//!
//! Uses reqwest to call the device's `/rpc/<Method>` endpoints. Each call
//! carries its own timeout; the underlying connection pool is only an
//! optimisation and no call depends on another.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Response;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use scriptsync_core::config::SyncConfig;
use scriptsync_core::{DeviceConnection, ScriptId};

use super::ScriptHost;
use super::error::RpcError;
use super::types::{
    CodeResponse, CreateRequest, CreateResponse, DeviceInfo, IdRequest, PutCodeRequest,
    RunResponse, ScriptConfigPatch, ScriptEntry, ScriptList, ScriptStatus, SetConfigRequest,
};

/// Per-call timeouts.
#[derive(Debug, Clone, Copy)]
pub struct RpcTimeouts {
    /// Applied to every call except chunk uploads.
    pub request: Duration,
    /// Applied to `Script.PutCode`.
    pub upload: Duration,
}

impl Default for RpcTimeouts {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl RpcTimeouts {
    pub const fn from_config(config: &SyncConfig) -> Self {
        Self {
            request: config.request_timeout(),
            upload: config.upload_timeout(),
        }
    }
}

/// Script host RPC client.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    base_url: String,
    timeouts: RpcTimeouts,
}

impl RpcClient {
    /// Create a client for one device.
    pub fn new(device: &DeviceConnection, timeouts: RpcTimeouts) -> Result<Self, RpcError> {
        if device.address.is_empty() {
            return Err(RpcError::Connection("device address is empty".into()));
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RpcError::Connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: device.base_url(),
            timeouts,
        })
    }

    /// Build the URL for an RPC method, e.g. `Script.List`.
    pub(crate) fn rpc_url(&self, method: &str) -> String {
        format!("{}/rpc/{method}", self.base_url)
    }

    /// Return an error for anything but HTTP 200.
    fn check_status(resp: &Response) -> Result<(), RpcError> {
        let status = resp.status().as_u16();
        if status == 200 {
            Ok(())
        } else {
            Err(RpcError::BadStatus(status))
        }
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, RpcError> {
        Self::check_status(&resp)?;
        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| RpcError::Malformed(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        id: Option<ScriptId>,
    ) -> Result<T, RpcError> {
        let url = match id {
            Some(id) => format!("{}?id={id}", self.rpc_url(method)),
            None => self.rpc_url(method),
        };
        debug!(%url, "RPC GET");
        let resp = self
            .http
            .get(&url)
            .timeout(self.timeouts.request)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn post<B: Serialize + Sync>(
        &self,
        method: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<Response, RpcError> {
        let url = self.rpc_url(method);
        debug!(%url, "RPC POST");
        let resp = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        Self::check_status(&resp)?;
        Ok(resp)
    }

    async fn post_decode<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, RpcError> {
        let resp = self.post(method, body, self.timeouts.request).await?;
        Self::decode(resp).await
    }
}

#[async_trait]
impl ScriptHost for RpcClient {
    async fn get_device_info(&self) -> Result<DeviceInfo, RpcError> {
        self.get("Shelly.GetDeviceInfo", None).await
    }

    async fn list_scripts(&self) -> Result<Vec<ScriptEntry>, RpcError> {
        let list: ScriptList = self.get("Script.List", None).await?;
        Ok(list.scripts)
    }

    async fn create_script(&self, name: &str) -> Result<ScriptId, RpcError> {
        let resp: CreateResponse = self
            .post_decode("Script.Create", &CreateRequest { name })
            .await?;
        resp.id
            .ok_or_else(|| RpcError::Malformed("Script.Create returned no id".into()))
    }

    async fn put_code(&self, id: ScriptId, chunk: &str, append: bool) -> Result<(), RpcError> {
        let body = PutCodeRequest {
            id,
            code: chunk,
            append,
        };
        self.post("Script.PutCode", &body, self.timeouts.upload)
            .await
            .map(drop)
    }

    async fn get_code(&self, id: ScriptId) -> Result<String, RpcError> {
        let resp: CodeResponse = self.get("Script.GetCode", Some(id)).await?;
        Ok(resp.data)
    }

    async fn delete_script(&self, id: ScriptId) -> Result<(), RpcError> {
        self.post("Script.Delete", &IdRequest { id }, self.timeouts.request)
            .await
            .map(drop)
    }

    async fn get_status(&self, id: ScriptId) -> Result<ScriptStatus, RpcError> {
        self.get("Script.GetStatus", Some(id)).await
    }

    async fn start_script(&self, id: ScriptId) -> Result<bool, RpcError> {
        let resp: RunResponse = self.post_decode("Script.Start", &IdRequest { id }).await?;
        Ok(resp.was_running)
    }

    async fn stop_script(&self, id: ScriptId) -> Result<bool, RpcError> {
        let resp: RunResponse = self.post_decode("Script.Stop", &IdRequest { id }).await?;
        Ok(resp.was_running)
    }

    async fn set_autostart(&self, id: ScriptId, enabled: bool) -> Result<(), RpcError> {
        let body = SetConfigRequest {
            id,
            config: ScriptConfigPatch { enable: enabled },
        };
        self.post("Script.SetConfig", &body, self.timeouts.request)
            .await
            .map(drop)
    }
}
