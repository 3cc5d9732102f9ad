// SPDX-License-Identifier: AGPL-3.0-or-later
//! Device registry
//!
//! Maps device names to opened backends. One registry is built at startup and
//! handed to whatever needs to resolve paths; nothing here is global.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{BackendKind, StorageBackend};
use crate::error::{MirrorError, MirrorResult};
use crate::path::DevicePath;

/// The always-present removable storage device.
pub const PRIMARY_DEVICE: &str = "sdmc";

/// Table of opened devices
pub struct DeviceRegistry {
    devices: HashMap<String, Arc<dyn StorageBackend>>,
}

impl DeviceRegistry {
    /// Creates a registry holding only the primary device.
    pub fn new(primary: Arc<dyn StorageBackend>) -> Self {
        let mut devices: HashMap<String, Arc<dyn StorageBackend>> = HashMap::new();
        devices.insert(PRIMARY_DEVICE.to_string(), primary);
        Self { devices }
    }

    /// Registers `backend` under `name`, closing whatever held the name before.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
    ) -> MirrorResult<()> {
        let name = name.into();
        if name == PRIMARY_DEVICE {
            return Err(MirrorError::ReservedDevice(name));
        }
        if name.is_empty() || name.contains(&[':', '/'][..]) {
            return Err(MirrorError::InvalidPath(format!("{name}: bad device name")));
        }

        if let Some(previous) = self.devices.remove(&name) {
            debug!("Replacing device {}", name);
            if let Err(e) = previous.close() {
                warn!("Failed to close replaced device {}: {}", name, e);
            }
        }

        info!("Registered {} device {}", backend.kind(), name);
        self.devices.insert(name, backend);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> MirrorResult<Arc<dyn StorageBackend>> {
        self.devices
            .get(name)
            .cloned()
            .ok_or_else(|| MirrorError::DeviceNotFound(name.to_string()))
    }

    /// Resolves the device `path` lives on.
    pub fn backend_for(&self, path: &DevicePath) -> MirrorResult<Arc<dyn StorageBackend>> {
        self.resolve(path.device())
    }

    /// Flushes pending writes on `name`. Failures are returned, not retried.
    pub fn commit(&self, name: &str) -> MirrorResult<()> {
        let backend = self.resolve(name)?;
        backend.commit()?;
        debug!("Committed device {}", name);
        Ok(())
    }

    /// Closes and removes `name`. The primary device cannot be closed.
    pub fn close(&mut self, name: &str) -> MirrorResult<()> {
        if name == PRIMARY_DEVICE {
            return Err(MirrorError::ReservedDevice(name.to_string()));
        }
        let backend = self
            .devices
            .remove(name)
            .ok_or_else(|| MirrorError::DeviceNotFound(name.to_string()))?;
        backend.close()?;
        info!("Closed device {}", name);
        Ok(())
    }

    /// Closes every device, the primary included. Individual failures are
    /// logged and skipped.
    pub fn close_all(&mut self) {
        for (name, backend) in self.devices.drain() {
            if let Err(e) = backend.close() {
                warn!("Failed to close device {}: {}", name, e);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub fn kind(&self, name: &str) -> Option<BackendKind> {
        self.devices.get(name).map(|b| b.kind())
    }

    /// Registered device names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}
