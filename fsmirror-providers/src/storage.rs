// SPDX-License-Identifier: AGPL-3.0-or-later
//! Raw storage backend
//!
//! Exposes partition images as fixed-size, read-only files in a flat root
//! directory. Like the block devices it stands in for, a read never says how
//! many bytes it delivered; callers must clamp against the partition size.

use fsmirror_core::{
    backend::{
        BackendKind, DirectoryReader, FileHandle, SpaceInfo, StorageBackend, StorageCapabilities,
    },
    entry::DirectoryEntry,
    error::{MirrorError, MirrorResult},
    operations::OpenMode,
};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::memory::SnapshotReader;

/// Read-only device exposing raw partitions
pub struct RawStorageBackend {
    name: String,
    partitions: BTreeMap<String, PathBuf>,
    capabilities: StorageCapabilities,
}

impl RawStorageBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: BTreeMap::new(),
            capabilities: StorageCapabilities::read_only(),
        }
    }

    /// Exposes the image at `image` as `/<partition>`.
    pub fn with_partition(mut self, partition: impl Into<String>, image: impl AsRef<Path>) -> Self {
        self.partitions
            .insert(partition.into(), image.as_ref().to_path_buf());
        self
    }

    fn image(&self, path: &str) -> MirrorResult<&PathBuf> {
        self.partitions
            .get(path.trim_start_matches('/'))
            .ok_or_else(|| MirrorError::NotFound(path.to_string()))
    }

    fn read_only(&self, path: &str) -> MirrorError {
        MirrorError::ReadOnly(format!("{}:{}", self.name, path))
    }
}

struct PartitionFile {
    path: String,
    image: File,
    size: u64,
}

impl FileHandle for PartitionFile {
    fn size(&self) -> MirrorResult<u64> {
        Ok(self.size)
    }

    /// Always reports `buf.len()`. Bytes past the end of the image are left
    /// untouched.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> MirrorResult<usize> {
        self.image
            .seek(SeekFrom::Start(offset))
            .map_err(|e| MirrorError::from_io(e, &self.path))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.image.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(MirrorError::from_io(e, &self.path)),
            }
        }
        Ok(buf.len())
    }

    fn write_at(&mut self, _offset: u64, _buf: &[u8]) -> MirrorResult<()> {
        Err(MirrorError::ReadOnly(self.path.clone()))
    }

    fn set_size(&mut self, _size: u64) -> MirrorResult<()> {
        Err(MirrorError::ReadOnly(self.path.clone()))
    }
}

impl StorageBackend for RawStorageBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::RawStorage
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &StorageCapabilities {
        &self.capabilities
    }

    fn open_directory(&self, path: &str) -> MirrorResult<Box<dyn DirectoryReader + '_>> {
        if path != "/" {
            return Err(MirrorError::NotFound(path.to_string()));
        }
        let entries = self
            .partitions
            .iter()
            .map(|(name, image)| {
                let size = std::fs::metadata(image).map(|m| m.len()).unwrap_or(0);
                DirectoryEntry::file(name.clone(), size)
            })
            .collect();
        Ok(Box::new(SnapshotReader::new(entries, true)))
    }

    fn open_file(&self, path: &str, mode: OpenMode) -> MirrorResult<Box<dyn FileHandle>> {
        if mode.is_writable() {
            return Err(self.read_only(path));
        }
        let image = File::open(self.image(path)?).map_err(|e| MirrorError::from_io(e, path))?;
        let size = image
            .metadata()
            .map_err(|e| MirrorError::from_io(e, path))?
            .len();
        Ok(Box::new(PartitionFile {
            path: path.to_string(),
            image,
            size,
        }))
    }

    fn create_file(&self, path: &str, _size: u64) -> MirrorResult<()> {
        Err(self.read_only(path))
    }

    fn delete_file(&self, path: &str) -> MirrorResult<()> {
        Err(self.read_only(path))
    }

    fn create_directory(&self, path: &str) -> MirrorResult<()> {
        Err(self.read_only(path))
    }

    fn delete_directory(&self, path: &str) -> MirrorResult<()> {
        Err(self.read_only(path))
    }

    fn space_info(&self, _path: &str) -> MirrorResult<SpaceInfo> {
        let total = self
            .partitions
            .values()
            .filter_map(|image| std::fs::metadata(image).ok())
            .map(|m| m.len())
            .sum();
        Ok(SpaceInfo { total, free: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> RawStorageBackend {
        std::fs::write(dir.path().join("boot.img"), vec![7u8; 10]).unwrap();
        std::fs::write(dir.path().join("user.img"), vec![1u8; 4]).unwrap();
        RawStorageBackend::new("nand")
            .with_partition("USER", dir.path().join("user.img"))
            .with_partition("BOOT0", dir.path().join("boot.img"))
    }

    #[test]
    fn test_lists_partitions_with_count() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut reader = storage.open_directory("/").unwrap();
        assert_eq!(reader.entry_count().unwrap(), Some(2));

        let mut entries = Vec::new();
        reader.read_entries(&mut entries, 10).unwrap();
        assert_eq!(entries[0], DirectoryEntry::file("BOOT0", 10));
        assert_eq!(entries[1], DirectoryEntry::file("USER", 4));
        assert!(storage.open_directory("/BOOT0").is_err());
    }

    #[test]
    fn test_read_reports_full_buffer() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut file = storage.open_file("/USER", OpenMode::READ).unwrap();
        assert_eq!(file.size().unwrap(), 4);

        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(2, &mut buf).unwrap(), 8);
        assert_eq!(&buf[..2], &[1, 1]);
    }

    #[test]
    fn test_is_read_only() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        assert!(matches!(
            storage.open_file("/USER", OpenMode::WRITE),
            Err(MirrorError::ReadOnly(_))
        ));
        assert!(matches!(
            storage.delete_file("/USER"),
            Err(MirrorError::ReadOnly(_))
        ));
        assert!(storage
            .open_file("/MISSING", OpenMode::READ)
            .err()
            .unwrap()
            .is_not_found());
        assert_eq!(storage.space_info("/").unwrap().total, 14);
    }
}
