// SPDX-License-Identifier: AGPL-3.0-or-later
//! Save container backend
//!
//! A save container is a zip file on the host. Its contents are loaded into a
//! [`MemoryTree`] when the device opens; every change stays in memory until
//! [`StorageBackend::commit`] rewrites the container. Closing without a
//! commit discards the changes.

use crate::memory::{MemoryTree, SnapshotReader, TreeNode};
use fsmirror_core::{
    backend::{
        BackendKind, DirectoryReader, FileHandle, SpaceInfo, StorageBackend, StorageCapabilities,
    },
    error::{code, MirrorError, MirrorResult},
    operations::OpenMode,
};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Transactional device backed by a zip container
pub struct SaveContainerBackend {
    name: String,
    container: PathBuf,
    tree: MemoryTree,
    capabilities: StorageCapabilities,
    commit_lock: Mutex<()>,
}

impl SaveContainerBackend {
    /// Opens `container`, or starts an empty store if it does not exist yet.
    /// A `capacity` bounds the total file bytes the store may hold.
    pub fn open(
        name: impl Into<String>,
        container: impl AsRef<Path>,
        capacity: Option<u64>,
    ) -> MirrorResult<Self> {
        let name = name.into();
        let container = container.as_ref().to_path_buf();
        let tree = MemoryTree::new(capacity);

        if container.exists() {
            load_container(&tree, &container)?;
            info!(
                "Opened save container {} ({} bytes)",
                container.display(),
                tree.used()
            );
        } else {
            debug!("Save container {} does not exist yet", container.display());
        }
        tree.mark_clean();

        Ok(Self {
            name,
            container,
            tree,
            capabilities: StorageCapabilities::transactional(),
            commit_lock: Mutex::new(()),
        })
    }

    pub fn container(&self) -> &Path {
        &self.container
    }

    pub fn has_pending_changes(&self) -> bool {
        self.tree.is_modified()
    }

    fn write_container(&self, target: &Path) -> MirrorResult<()> {
        let file = File::create(target).map_err(|e| MirrorError::from_io(e, &target.to_string_lossy()))?;
        let mut writer = ZipWriter::new(file);
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(true);

        for node in self.tree.snapshot() {
            match node {
                TreeNode::Directory(path) => {
                    writer
                        .add_directory(entry_name(&path), options)
                        .map_err(archive_error)?;
                }
                TreeNode::File(path, data) => {
                    writer
                        .start_file(entry_name(&path), options)
                        .map_err(archive_error)?;
                    writer.write_all(&data)?;
                }
            }
        }

        let file = writer.finish().map_err(archive_error)?;
        file.sync_all()?;
        Ok(())
    }
}

fn entry_name(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

fn archive_error(err: zip::result::ZipError) -> MirrorError {
    MirrorError::Archive(err.to_string())
}

fn corrupted(container: &Path, err: impl std::fmt::Display) -> MirrorError {
    MirrorError::backend(
        code::CONTAINER_CORRUPTED,
        format!("{}: {err}", container.display()),
    )
}

fn load_container(tree: &MemoryTree, container: &Path) -> MirrorResult<()> {
    let file = File::open(container).map_err(|e| MirrorError::from_io(e, &container.to_string_lossy()))?;
    let mut archive = ZipArchive::new(file).map_err(|e| corrupted(container, e))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| corrupted(container, e))?;
        let name = entry.name().trim_matches('/').to_string();
        if name.is_empty() || name.split('/').any(|s| s.is_empty() || s == "..") {
            warn!("Skipping unsafe entry {:?} in {}", entry.name(), container.display());
            continue;
        }

        let path = format!("/{name}");
        if entry.is_dir() {
            tree.insert_directory(&path);
        } else {
            let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
            entry
                .read_to_end(&mut data)
                .map_err(|e| corrupted(container, e))?;
            tree.insert_file(&path, data);
        }
    }
    Ok(())
}

impl StorageBackend for SaveContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SaveStore
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &StorageCapabilities {
        &self.capabilities
    }

    fn open_directory(&self, path: &str) -> MirrorResult<Box<dyn DirectoryReader + '_>> {
        Ok(Box::new(SnapshotReader::new(self.tree.children(path)?, true)))
    }

    fn open_file(&self, path: &str, mode: OpenMode) -> MirrorResult<Box<dyn FileHandle>> {
        Ok(Box::new(self.tree.open_file(path, mode)?))
    }

    fn create_file(&self, path: &str, size: u64) -> MirrorResult<()> {
        self.tree.create_file(path, size)
    }

    fn delete_file(&self, path: &str) -> MirrorResult<()> {
        self.tree.delete_file(path)
    }

    fn create_directory(&self, path: &str) -> MirrorResult<()> {
        self.tree.create_directory(path)
    }

    fn delete_directory(&self, path: &str) -> MirrorResult<()> {
        self.tree.delete_directory(path)
    }

    fn rename_file(&self, from: &str, to: &str) -> MirrorResult<()> {
        self.tree.rename_file(from, to)
    }

    fn rename_directory(&self, from: &str, to: &str) -> MirrorResult<()> {
        self.tree.rename_directory(from, to)
    }

    fn space_info(&self, _path: &str) -> MirrorResult<SpaceInfo> {
        Ok(self.tree.space_info())
    }

    /// Rewrites the container next to the original and swaps it in.
    fn commit(&self) -> MirrorResult<()> {
        let _guard = self.commit_lock.lock();
        if !self.tree.is_modified() && self.container.exists() {
            debug!("Nothing to commit for {}", self.name);
            return Ok(());
        }

        let mut staging = self.container.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        if let Err(e) = self.write_container(&staging) {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
        fs::rename(&staging, &self.container)
            .map_err(|e| MirrorError::from_io(e, &self.container.to_string_lossy()))?;

        self.tree.mark_clean();
        info!("Committed {} to {}", self.name, self.container.display());
        Ok(())
    }

    fn close(&self) -> MirrorResult<()> {
        if self.tree.is_modified() {
            warn!("Closing {} with uncommitted changes", self.name);
        }
        Ok(())
    }
}
