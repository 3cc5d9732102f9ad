// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage providers for fsmirror
//!
//! Host volumes, in-memory devices, zip-backed save containers and raw
//! partition storage, plus building a [`DeviceRegistry`] from configuration.

pub mod memory;
#[cfg(feature = "save")]
pub mod save;
pub mod storage;
mod volume;

pub use memory::{MemoryBackend, MemoryTree};
#[cfg(feature = "save")]
pub use save::SaveContainerBackend;
pub use storage::RawStorageBackend;
pub use volume::VolumeBackend;

use fsmirror_core::{DeviceRegistry, MirrorError, MirrorResult, StorageBackend, PRIMARY_DEVICE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Which provider serves a configured device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Volume,
    Memory,
    Save,
    Storage,
}

/// One `[[device]]` table of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub kind: DeviceKind,
    /// Host directory of a volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Host file of a save container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Byte limit for memory devices and save containers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u64>,
    #[serde(default)]
    pub read_only: bool,
    /// Partition name to image file, for raw storage.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partitions: BTreeMap<String, PathBuf>,
}

impl DeviceConfig {
    pub fn volume(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: DeviceKind::Volume,
            root: Some(root.into()),
            path: None,
            capacity: None,
            read_only: false,
            partitions: BTreeMap::new(),
        }
    }

    /// Opens the backend this entry describes.
    pub fn open(&self) -> MirrorResult<Arc<dyn StorageBackend>> {
        let backend: Arc<dyn StorageBackend> = match self.kind {
            DeviceKind::Volume => {
                let root = self.required(&self.root, "root")?;
                if !root.is_dir() {
                    return Err(MirrorError::Config(format!(
                        "device {}: {} is not a directory",
                        self.name,
                        root.display()
                    )));
                }
                let volume = VolumeBackend::new(&self.name, root);
                if self.read_only {
                    Arc::new(volume.read_only())
                } else {
                    Arc::new(volume)
                }
            }
            DeviceKind::Memory => Arc::new(MemoryBackend::new(&self.name, self.capacity)),
            DeviceKind::Save => self.open_save()?,
            DeviceKind::Storage => {
                if self.partitions.is_empty() {
                    return Err(MirrorError::Config(format!(
                        "device {}: raw storage needs at least one partition",
                        self.name
                    )));
                }
                let storage = self
                    .partitions
                    .iter()
                    .fold(RawStorageBackend::new(&self.name), |s, (name, image)| {
                        s.with_partition(name, image)
                    });
                Arc::new(storage)
            }
        };
        Ok(backend)
    }

    #[cfg(feature = "save")]
    fn open_save(&self) -> MirrorResult<Arc<dyn StorageBackend>> {
        let path = self.required(&self.path, "path")?;
        Ok(Arc::new(SaveContainerBackend::open(
            &self.name,
            path,
            self.capacity,
        )?))
    }

    #[cfg(not(feature = "save"))]
    fn open_save(&self) -> MirrorResult<Arc<dyn StorageBackend>> {
        Err(MirrorError::Unsupported(format!(
            "device {}: built without save container support",
            self.name
        )))
    }

    fn required<'a>(&self, value: &'a Option<PathBuf>, key: &str) -> MirrorResult<&'a PathBuf> {
        value.as_ref().ok_or_else(|| {
            MirrorError::Config(format!("device {}: missing `{key}`", self.name))
        })
    }
}

/// Opens every configured device. The primary device must be among them.
pub fn build_registry(devices: &[DeviceConfig]) -> MirrorResult<DeviceRegistry> {
    let primary = devices
        .iter()
        .find(|d| d.name == PRIMARY_DEVICE)
        .ok_or_else(|| {
            MirrorError::Config(format!("no `{PRIMARY_DEVICE}` device configured"))
        })?;
    let mut registry = DeviceRegistry::new(primary.open()?);

    for device in devices.iter().filter(|d| d.name != PRIMARY_DEVICE) {
        if registry.contains(&device.name) {
            warn!("Device {} configured twice, using the last entry", device.name);
        }
        registry.register(device.name.clone(), device.open()?)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsmirror_core::BackendKind;
    use tempfile::TempDir;

    fn memory(name: &str) -> DeviceConfig {
        DeviceConfig {
            name: name.to_string(),
            kind: DeviceKind::Memory,
            root: None,
            path: None,
            capacity: Some(1024),
            read_only: false,
            partitions: BTreeMap::new(),
        }
    }

    #[test]
    fn test_build_registry() {
        let dir = TempDir::new().unwrap();
        let mut save = memory("save");
        save.kind = DeviceKind::Save;
        save.path = Some(dir.path().join("save.zip"));

        let registry = build_registry(&[
            DeviceConfig::volume("sdmc", dir.path()),
            memory("ram"),
            save,
        ])
        .unwrap();

        assert_eq!(registry.names(), vec!["ram", "save", "sdmc"]);
        assert_eq!(registry.kind("sdmc"), Some(BackendKind::Volume));
        assert_eq!(registry.kind("save"), Some(BackendKind::SaveStore));
    }

    #[test]
    fn test_primary_is_required() {
        let err = build_registry(&[memory("ram")]).err().unwrap();
        assert!(matches!(err, MirrorError::Config(_)));
    }

    #[test]
    fn test_missing_fields() {
        let mut volume = DeviceConfig::volume("sdmc", "/");
        volume.root = None;
        assert!(matches!(volume.open(), Err(MirrorError::Config(_))));

        let mut storage = memory("nand");
        storage.kind = DeviceKind::Storage;
        assert!(matches!(storage.open(), Err(MirrorError::Config(_))));
    }

    #[test]
    fn test_volume_root_must_exist() {
        let dir = TempDir::new().unwrap();
        let volume = DeviceConfig::volume("sdmc", dir.path().join("missing"));
        assert!(matches!(volume.open(), Err(MirrorError::Config(_))));
    }

    #[test]
    fn test_read_only_volume() {
        let dir = TempDir::new().unwrap();
        let mut volume = DeviceConfig::volume("sdmc", dir.path());
        volume.read_only = true;
        let backend = volume.open().unwrap();
        assert!(!backend.capabilities().write);
    }
}
