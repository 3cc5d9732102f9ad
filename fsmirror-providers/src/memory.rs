// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory storage
//!
//! [`MemoryTree`] holds a whole directory tree in a sorted map keyed by
//! subpath. It backs [`MemoryBackend`] directly and stages the contents of
//! save containers until they are committed.

use fsmirror_core::{
    backend::{
        BackendKind, DirectoryReader, FileHandle, SpaceInfo, StorageBackend, StorageCapabilities,
    },
    entry::DirectoryEntry,
    error::{code, MirrorError, MirrorResult},
    operations::OpenMode,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
enum Node {
    Directory,
    File(Arc<Mutex<Vec<u8>>>),
}

/// Byte accounting shared between a tree and its open files.
struct Usage {
    capacity: Option<u64>,
    used: AtomicU64,
    modified: AtomicBool,
}

impl Usage {
    /// Accounts for a file changing from `old` to `new` bytes.
    fn resize(&self, old: u64, new: u64) -> MirrorResult<()> {
        if new > old {
            let grow = new - old;
            let result = self
                .used
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                    let next = used.checked_add(grow)?;
                    match self.capacity {
                        Some(capacity) if next > capacity => None,
                        _ => Some(next),
                    }
                });
            if result.is_err() {
                return Err(MirrorError::backend(
                    code::OUT_OF_SPACE,
                    format!("{grow} more bytes do not fit"),
                ));
            }
        } else {
            self.used.fetch_sub(old - new, Ordering::SeqCst);
        }
        self.modified.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A directory tree held in memory
pub struct MemoryTree {
    nodes: RwLock<BTreeMap<String, Node>>,
    usage: Arc<Usage>,
}

/// One node of a [`MemoryTree`] as returned by [`MemoryTree::snapshot`].
pub enum TreeNode {
    Directory(String),
    File(String, Vec<u8>),
}

impl MemoryTree {
    /// Creates an empty tree. With a capacity, file growth past that many
    /// bytes fails with [`code::OUT_OF_SPACE`].
    pub fn new(capacity: Option<u64>) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Directory);
        Self {
            nodes: RwLock::new(nodes),
            usage: Arc::new(Usage {
                capacity,
                used: AtomicU64::new(0),
                modified: AtomicBool::new(false),
            }),
        }
    }

    pub fn used(&self) -> u64 {
        self.usage.used.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> Option<u64> {
        self.usage.capacity
    }

    /// True once anything changed since creation or the last
    /// [`mark_clean`](Self::mark_clean).
    pub fn is_modified(&self) -> bool {
        self.usage.modified.load(Ordering::SeqCst)
    }

    pub fn mark_clean(&self) {
        self.usage.modified.store(false, Ordering::SeqCst);
    }

    pub fn is_directory(&self, path: &str) -> bool {
        matches!(self.nodes.read().get(path), Some(Node::Directory))
    }

    pub fn is_file(&self, path: &str) -> bool {
        matches!(self.nodes.read().get(path), Some(Node::File(_)))
    }

    /// Sorted entries directly below `path`.
    pub fn children(&self, path: &str) -> MirrorResult<Vec<DirectoryEntry>> {
        let nodes = self.nodes.read();
        match nodes.get(path) {
            Some(Node::Directory) => {}
            Some(Node::File(_)) => {
                return Err(MirrorError::backend(
                    code::PATH_NOT_FOUND,
                    format!("{path} is not a directory"),
                ))
            }
            None => return Err(MirrorError::NotFound(path.to_string())),
        }

        let prefix = child_prefix(path);
        let entries = nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, node)| {
                let name = &key[prefix.len()..];
                if name.contains('/') {
                    return None;
                }
                Some(match node {
                    Node::Directory => DirectoryEntry::directory(name),
                    Node::File(data) => DirectoryEntry::file(name, data.lock().len() as u64),
                })
            })
            .collect();
        Ok(entries)
    }

    pub fn create_file(&self, path: &str, size: u64) -> MirrorResult<()> {
        let mut nodes = self.nodes.write();
        check_creatable(&nodes, path)?;
        let len = usize::try_from(size).map_err(|_| {
            MirrorError::backend(code::OUT_OF_SPACE, format!("{path}: {size} bytes"))
        })?;
        self.usage.resize(0, size)?;
        nodes.insert(path.to_string(), Node::File(Arc::new(Mutex::new(vec![0; len]))));
        Ok(())
    }

    /// Inserts a file with `data`, creating missing parent directories.
    /// Capacity is not enforced.
    pub fn insert_file(&self, path: &str, data: Vec<u8>) {
        self.insert_directory(parent_of(path));
        let len = data.len() as u64;
        let previous = self
            .nodes
            .write()
            .insert(path.to_string(), Node::File(Arc::new(Mutex::new(data))));
        if let Some(Node::File(old)) = previous {
            self.usage.used.fetch_sub(old.lock().len() as u64, Ordering::SeqCst);
        }
        self.usage.used.fetch_add(len, Ordering::SeqCst);
    }

    /// Inserts `path` and any missing ancestors as directories.
    pub fn insert_directory(&self, path: &str) {
        let mut nodes = self.nodes.write();
        let mut end = 0;
        while let Some(slash) = path[end + 1..].find('/').map(|i| i + end + 1) {
            nodes
                .entry(path[..slash].to_string())
                .or_insert(Node::Directory);
            end = slash;
        }
        if path.len() > 1 {
            nodes.entry(path.to_string()).or_insert(Node::Directory);
        }
    }

    pub fn delete_file(&self, path: &str) -> MirrorResult<()> {
        let mut nodes = self.nodes.write();
        match nodes.get(path) {
            Some(Node::File(data)) => {
                let len = data.lock().len() as u64;
                self.usage.resize(len, 0)?;
            }
            Some(Node::Directory) => {
                return Err(MirrorError::backend(
                    code::NOT_PERMITTED,
                    format!("{path} is a directory"),
                ))
            }
            None => return Err(MirrorError::NotFound(path.to_string())),
        }
        nodes.remove(path);
        Ok(())
    }

    pub fn create_directory(&self, path: &str) -> MirrorResult<()> {
        let mut nodes = self.nodes.write();
        check_creatable(&nodes, path)?;
        nodes.insert(path.to_string(), Node::Directory);
        self.usage.modified.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn delete_directory(&self, path: &str) -> MirrorResult<()> {
        if path == "/" {
            return Err(MirrorError::backend(
                code::NOT_PERMITTED,
                "the root directory cannot be deleted",
            ));
        }
        let mut nodes = self.nodes.write();
        match nodes.get(path) {
            Some(Node::Directory) => {}
            Some(Node::File(_)) => {
                return Err(MirrorError::backend(
                    code::NOT_PERMITTED,
                    format!("{path} is a file"),
                ))
            }
            None => return Err(MirrorError::NotFound(path.to_string())),
        }

        let prefix = child_prefix(path);
        if nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
        {
            return Err(MirrorError::backend(code::DIRECTORY_NOT_EMPTY, path));
        }

        nodes.remove(path);
        self.usage.modified.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn rename_file(&self, from: &str, to: &str) -> MirrorResult<()> {
        let mut nodes = self.nodes.write();
        if !matches!(nodes.get(from), Some(Node::File(_))) {
            return Err(MirrorError::NotFound(from.to_string()));
        }
        check_creatable(&nodes, to)?;
        if let Some(node) = nodes.remove(from) {
            nodes.insert(to.to_string(), node);
        }
        self.usage.modified.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Moves a directory and everything below it.
    pub fn rename_directory(&self, from: &str, to: &str) -> MirrorResult<()> {
        let mut nodes = self.nodes.write();
        if from == "/" || !matches!(nodes.get(from), Some(Node::Directory)) {
            return Err(MirrorError::NotFound(from.to_string()));
        }
        if to.starts_with(&child_prefix(from)) {
            return Err(MirrorError::InvalidPath(format!(
                "cannot move {from} into itself"
            )));
        }
        check_creatable(&nodes, to)?;

        let prefix = child_prefix(from);
        let moved: Vec<String> = nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();

        nodes.remove(from);
        nodes.insert(to.to_string(), Node::Directory);
        for key in moved {
            if let Some(node) = nodes.remove(&key) {
                nodes.insert(format!("{to}/{}", &key[prefix.len()..]), node);
            }
        }
        self.usage.modified.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn open_file(&self, path: &str, mode: OpenMode) -> MirrorResult<MemoryFile> {
        match self.nodes.read().get(path) {
            Some(Node::File(data)) => Ok(MemoryFile {
                data: data.clone(),
                usage: self.usage.clone(),
                writable: mode.is_writable(),
            }),
            Some(Node::Directory) => Err(MirrorError::backend(
                code::NOT_PERMITTED,
                format!("{path} is a directory"),
            )),
            None => Err(MirrorError::NotFound(path.to_string())),
        }
    }

    pub fn space_info(&self) -> SpaceInfo {
        let used = self.used();
        match self.usage.capacity {
            Some(total) => SpaceInfo {
                total,
                free: total.saturating_sub(used),
            },
            None => SpaceInfo {
                total: u64::MAX,
                free: u64::MAX - used,
            },
        }
    }

    /// Every node except the root, in path order.
    pub fn snapshot(&self) -> Vec<TreeNode> {
        self.nodes
            .read()
            .iter()
            .filter(|(key, _)| key.as_str() != "/")
            .map(|(key, node)| match node {
                Node::Directory => TreeNode::Directory(key.clone()),
                Node::File(data) => TreeNode::File(key.clone(), data.lock().clone()),
            })
            .collect()
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn check_creatable(nodes: &BTreeMap<String, Node>, path: &str) -> MirrorResult<()> {
    if !path.starts_with('/') || path.len() < 2 {
        return Err(MirrorError::InvalidPath(path.to_string()));
    }
    if nodes.contains_key(path) {
        return Err(MirrorError::AlreadyExists(path.to_string()));
    }
    if !matches!(nodes.get(parent_of(path)), Some(Node::Directory)) {
        return Err(MirrorError::NotFound(parent_of(path).to_string()));
    }
    Ok(())
}

/// Open file in a [`MemoryTree`]
pub struct MemoryFile {
    data: Arc<Mutex<Vec<u8>>>,
    usage: Arc<Usage>,
    writable: bool,
}

impl MemoryFile {
    fn check_writable(&self) -> MirrorResult<()> {
        if !self.writable {
            return Err(MirrorError::backend(
                code::NOT_PERMITTED,
                "file not opened for writing",
            ));
        }
        Ok(())
    }
}

impl FileHandle for MemoryFile {
    fn size(&self) -> MirrorResult<u64> {
        Ok(self.data.lock().len() as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> MirrorResult<usize> {
        let data = self.data.lock();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(buf.len()).min(data.len());
        buf[..end - start].copy_from_slice(&data[start..end]);
        Ok(end - start)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> MirrorResult<()> {
        self.check_writable()?;
        let mut data = self.data.lock();
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(buf.len());
        if end > data.len() {
            return Err(MirrorError::backend(
                code::OUT_OF_RANGE,
                format!("write of {} bytes at {offset} past end of file", buf.len()),
            ));
        }
        data[start..end].copy_from_slice(buf);
        self.usage.modified.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_size(&mut self, size: u64) -> MirrorResult<()> {
        self.check_writable()?;
        let len = usize::try_from(size)
            .map_err(|_| MirrorError::backend(code::OUT_OF_SPACE, format!("{size} bytes")))?;
        let mut data = self.data.lock();
        self.usage.resize(data.len() as u64, size)?;
        data.resize(len, 0);
        Ok(())
    }
}

/// Reader over a listing taken when the directory was opened.
pub(crate) struct SnapshotReader {
    entries: std::vec::IntoIter<DirectoryEntry>,
    count: Option<u64>,
}

impl SnapshotReader {
    /// With `report_count` the entry count is available before reading.
    pub(crate) fn new(entries: Vec<DirectoryEntry>, report_count: bool) -> Self {
        let count = report_count.then_some(entries.len() as u64);
        Self {
            entries: entries.into_iter(),
            count,
        }
    }
}

impl DirectoryReader for SnapshotReader {
    fn entry_count(&mut self) -> MirrorResult<Option<u64>> {
        Ok(self.count)
    }

    fn read_entries(&mut self, out: &mut Vec<DirectoryEntry>, max: usize) -> MirrorResult<usize> {
        let before = out.len();
        out.extend(self.entries.by_ref().take(max));
        Ok(out.len() - before)
    }
}

/// Volatile device held entirely in memory
pub struct MemoryBackend {
    name: String,
    tree: MemoryTree,
    capabilities: StorageCapabilities,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>, capacity: Option<u64>) -> Self {
        Self {
            name: name.into(),
            tree: MemoryTree::new(capacity),
            capabilities: StorageCapabilities::volume(),
        }
    }

    pub fn tree(&self) -> &MemoryTree {
        &self.tree
    }
}

impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Volume
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &StorageCapabilities {
        &self.capabilities
    }

    fn open_directory(&self, path: &str) -> MirrorResult<Box<dyn DirectoryReader + '_>> {
        Ok(Box::new(SnapshotReader::new(self.tree.children(path)?, false)))
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
}
