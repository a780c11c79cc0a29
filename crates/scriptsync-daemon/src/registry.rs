//! Explicit map of active devices.
//!
//! One [`Coordinator`] per device name. The host process activates devices at
//! startup, reloads them on configuration change and shuts all of them down
//! on exit.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use scriptsync_core::DeviceConnection;

use crate::coordinator::Coordinator;
use crate::refresh::RefreshError;
use crate::rpc::RpcError;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Cannot connect to device '{name}': {source}")]
    Connect {
        name: String,
        #[source]
        source: RpcError,
    },

    #[error("Device '{name}' failed its first refresh: {source}")]
    Start {
        name: String,
        #[source]
        source: RefreshError,
    },
}

/// Builds an unstarted coordinator for a device.
pub type CoordinatorFactory =
    Box<dyn Fn(DeviceConnection) -> Result<Coordinator, RpcError> + Send + Sync>;

/// Active coordinators keyed by device name.
pub struct DeviceRegistry {
    factory: CoordinatorFactory,
    active: HashMap<String, Arc<Coordinator>>,
}

impl DeviceRegistry {
    pub fn new(factory: CoordinatorFactory) -> Self {
        Self {
            factory,
            active: HashMap::new(),
        }
    }

    /// Start a coordinator for `device`. A name that is already active is
    /// returned as is.
    pub async fn activate(
        &mut self,
        device: DeviceConnection,
    ) -> Result<Arc<Coordinator>, RegistryError> {
        if let Some(existing) = self.active.get(&device.name) {
            return Ok(Arc::clone(existing));
        }

        let name = device.name.clone();
        let coordinator = (self.factory)(device).map_err(|source| RegistryError::Connect {
            name: name.clone(),
            source,
        })?;
        coordinator
            .start()
            .await
            .map_err(|source| RegistryError::Start {
                name: name.clone(),
                source,
            })?;

        let coordinator = Arc::new(coordinator);
        self.active.insert(name.clone(), Arc::clone(&coordinator));
        info!(device = %name, "Device activated");
        Ok(coordinator)
    }

    /// Shut down and forget a device. Returns whether it was active.
    pub async fn deactivate(&mut self, name: &str) -> bool {
        let Some(coordinator) = self.active.remove(name) else {
            return false;
        };
        coordinator.shutdown().await;
        info!(device = %name, "Device deactivated");
        true
    }

    /// Shut down then start again, e.g. after the device's settings changed.
    pub async fn reload(
        &mut self,
        device: DeviceConnection,
    ) -> Result<Arc<Coordinator>, RegistryError> {
        self.deactivate(&device.name).await;
        self.activate(device).await
    }

    pub fn get(&self, name: &str) -> Option<Arc<Coordinator>> {
        self.active.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.active.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Shut down every device, waiting for each.
    pub async fn shutdown_all(&mut self) {
        for (name, coordinator) in self.active.drain() {
            coordinator.shutdown().await;
            info!(device = %name, "Device deactivated");
        }
    }
}
