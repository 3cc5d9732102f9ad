// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage backend trait

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    entry::DirectoryEntry,
    error::{MirrorError, MirrorResult},
    operations::OpenMode,
};

/// What sort of storage a device is backed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A plain filesystem volume.
    Volume,
    /// An archive-backed store whose writes only persist on commit.
    SaveStore,
    /// Raw partitions exposed as fixed-size, read-only files.
    RawStorage,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Volume => "volume",
            BackendKind::SaveStore => "save",
            BackendKind::RawStorage => "storage",
        };
        f.write_str(name)
    }
}

/// Storage backend capabilities
#[derive(Debug, Clone, Default)]
pub struct StorageCapabilities {
    pub read: bool,
    pub write: bool,
    pub rename: bool,
    pub commit: bool,
    pub space_info: bool,
}

impl StorageCapabilities {
    pub fn read_only() -> Self {
        Self {
            read: true,
            space_info: true,
            ..Default::default()
        }
    }

    pub fn volume() -> Self {
        Self {
            read: true,
            write: true,
            rename: true,
            space_info: true,
            ..Default::default()
        }
    }

    pub fn transactional() -> Self {
        Self {
            commit: true,
            ..Self::volume()
        }
    }
}

/// Space information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpaceInfo {
    pub total: u64,
    pub free: u64,
}

/// Native directory handle, alive only while a listing is being read.
pub trait DirectoryReader {
    /// Number of entries, for backends that can report it before reading.
    fn entry_count(&mut self) -> MirrorResult<Option<u64>> {
        Ok(None)
    }

    /// Appends up to `max` entries to `out`, returning how many were added.
    /// Returns `Ok(0)` once the directory is exhausted.
    fn read_entries(&mut self, out: &mut Vec<DirectoryEntry>, max: usize) -> MirrorResult<usize>;
}

/// Native file handle. Offsets are tracked by the caller.
pub trait FileHandle: Send {
    fn size(&self) -> MirrorResult<u64>;

    /// Reads at `offset`. Some backends cannot tell how much was read and
    /// report `buf.len()`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> MirrorResult<usize>;

    /// Writes all of `buf` at `offset`. The range must lie within `size()`.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> MirrorResult<()>;

    fn set_size(&mut self, size: u64) -> MirrorResult<()>;

    fn flush(&mut self) -> MirrorResult<()> {
        Ok(())
    }
}

/// Storage backend trait
///
/// Every path argument is a subpath beginning with `/`, as produced by
/// [`DevicePath::subpath`](crate::DevicePath::subpath).
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;
    fn display_name(&self) -> &str;
    fn capabilities(&self) -> &StorageCapabilities;

    fn open_directory(&self, path: &str) -> MirrorResult<Box<dyn DirectoryReader + '_>>;
    fn open_file(&self, path: &str, mode: OpenMode) -> MirrorResult<Box<dyn FileHandle>>;
    fn create_file(&self, path: &str, size: u64) -> MirrorResult<()>;
    fn delete_file(&self, path: &str) -> MirrorResult<()>;
    fn create_directory(&self, path: &str) -> MirrorResult<()>;
    fn delete_directory(&self, path: &str) -> MirrorResult<()>;
    fn space_info(&self, path: &str) -> MirrorResult<SpaceInfo>;

    fn rename_file(&self, _from: &str, _to: &str) -> MirrorResult<()> {
        Err(MirrorError::Unsupported("Rename not supported".into()))
    }

    fn rename_directory(&self, _from: &str, _to: &str) -> MirrorResult<()> {
        Err(MirrorError::Unsupported("Rename not supported".into()))
    }

    /// Persists pending writes. Backends without transactions succeed.
    fn commit(&self) -> MirrorResult<()> {
        Ok(())
    }

    /// Releases the device. Called once by the registry.
    fn close(&self) -> MirrorResult<()> {
        Ok(())
    }
}
