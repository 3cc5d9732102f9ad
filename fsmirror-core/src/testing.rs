// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scripted in-memory backend for unit tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{
    BackendKind, DirectoryReader, FileHandle, SpaceInfo, StorageBackend, StorageCapabilities,
};
use crate::entry::DirectoryEntry;
use crate::error::{code, MirrorError, MirrorResult};
use crate::operations::OpenMode;

#[derive(Clone)]
enum Node {
    Directory,
    File(Arc<Mutex<Vec<u8>>>),
}

/// How the backend reports directory contents.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ListingStyle {
    CountUpFront,
    UntilExhausted,
    /// Reports one more entry than it can deliver.
    WrongCount,
}

pub struct ScriptedBackend {
    nodes: Mutex<BTreeMap<String, Node>>,
    style: ListingStyle,
    pub batch: usize,
    pub max_size: Option<u64>,
    /// Reads reaching end of file fail after filling the buffer.
    pub fail_at_end: bool,
    pub directory_deletes: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub commits: AtomicUsize,
    pub open_readers: Arc<AtomicUsize>,
    caps: StorageCapabilities,
}

impl ScriptedBackend {
    pub fn new(style: ListingStyle) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Directory);
        Self {
            nodes: Mutex::new(nodes),
            style,
            batch: 2,
            max_size: None,
            fail_at_end: false,
            directory_deletes: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            commits: AtomicUsize::new(0),
            open_readers: Arc::new(AtomicUsize::new(0)),
            caps: StorageCapabilities::transactional(),
        }
    }

    pub fn with_file(self, path: &str, data: &[u8]) -> Self {
        self.nodes
            .lock()
            .unwrap()
            .insert(path.to_string(), Node::File(Arc::new(Mutex::new(data.to_vec()))));
        self
    }

    pub fn with_dir(self, path: &str) -> Self {
        self.nodes
            .lock()
            .unwrap()
            .insert(path.to_string(), Node::Directory);
        self
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::File(data)) => Some(data.lock().unwrap().clone()),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.nodes.lock().unwrap().get(path), Some(Node::Directory))
    }

    fn children(&self, path: &str) -> Vec<DirectoryEntry> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(key, node)| {
                let rest = key.strip_prefix(&prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    return None;
                }
                Some(match node {
                    Node::Directory => DirectoryEntry::directory(rest),
                    Node::File(data) => DirectoryEntry::file(rest, data.lock().unwrap().len() as u64),
                })
            })
            .collect()
    }

    fn parent_exists(&self, path: &str) -> bool {
        let parent = match path.rfind('/') {
            Some(0) => "/",
            Some(i) => &path[..i],
            None => return false,
        };
        self.is_dir(parent)
    }
}

struct ScriptedReader {
    entries: Vec<DirectoryEntry>,
    position: usize,
    style: ListingStyle,
    batch: usize,
    open_readers: Arc<AtomicUsize>,
}

impl DirectoryReader for ScriptedReader {
    fn entry_count(&mut self) -> MirrorResult<Option<u64>> {
        Ok(match self.style {
            ListingStyle::CountUpFront => Some(self.entries.len() as u64),
            ListingStyle::WrongCount => Some(self.entries.len() as u64 + 1),
            ListingStyle::UntilExhausted => None,
        })
    }

    fn read_entries(&mut self, out: &mut Vec<DirectoryEntry>, max: usize) -> MirrorResult<usize> {
        let take = max.min(self.batch).min(self.entries.len() - self.position);
        out.extend_from_slice(&self.entries[self.position..self.position + take]);
        self.position += take;
        Ok(take)
    }
}

impl Drop for ScriptedReader {
    fn drop(&mut self) {
        self.open_readers.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedFile {
    data: Arc<Mutex<Vec<u8>>>,
    max_size: Option<u64>,
    fail_at_end: bool,
}

impl FileHandle for ScriptedFile {
    fn size(&self) -> MirrorResult<u64> {
        Ok(self.data.lock().unwrap().len() as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> MirrorResult<usize> {
        let data = self.data.lock().unwrap();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(MirrorError::backend(code::OUT_OF_RANGE, "read past end"));
        }
        buf.copy_from_slice(&data[start..end]);
        if self.fail_at_end && end == data.len() {
            return Err(MirrorError::backend(code::OUT_OF_RANGE, "end of file"));
        }
        Ok(buf.len())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> MirrorResult<()> {
        let mut data = self.data.lock().unwrap();
        let start = offset as usize;
        if start + buf.len() > data.len() {
            return Err(MirrorError::backend(code::OUT_OF_RANGE, "write past end"));
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn set_size(&mut self, size: u64) -> MirrorResult<()> {
        if self.max_size.is_some_and(|max| size > max) {
            return Err(MirrorError::backend(code::OUT_OF_SPACE, "too large"));
        }
        self.data.lock().unwrap().resize(size as usize, 0);
        Ok(())
    }
}

impl StorageBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Volume
    }

    fn display_name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> &StorageCapabilities {
        &self.caps
    }

    fn open_directory(&self, path: &str) -> MirrorResult<Box<dyn DirectoryReader + '_>> {
        if !self.is_dir(path) {
            return Err(MirrorError::NotFound(path.to_string()));
        }
        self.open_readers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedReader {
            entries: self.children(path),
            position: 0,
            style: self.style,
            batch: self.batch,
            open_readers: self.open_readers.clone(),
        }))
    }

    fn open_file(&self, path: &str, _mode: OpenMode) -> MirrorResult<Box<dyn FileHandle>> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::File(data)) => Ok(Box::new(ScriptedFile {
                data: data.clone(),
                max_size: self.max_size,
                fail_at_end: self.fail_at_end,
            })),
            _ => Err(MirrorError::NotFound(path.to_string())),
        }
    }

    fn create_file(&self, path: &str, size: u64) -> MirrorResult<()> {
        if !self.parent_exists(path) {
            return Err(MirrorError::NotFound(path.to_string()));
        }
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(path) {
            return Err(MirrorError::AlreadyExists(path.to_string()));
        }
        nodes.insert(
            path.to_string(),
            Node::File(Arc::new(Mutex::new(vec![0; size as usize]))),
        );
        Ok(())
    }

    fn delete_file(&self, path: &str) -> MirrorResult<()> {
        match self.nodes.lock().unwrap().remove(path) {
            Some(_) => Ok(()),
            None => Err(MirrorError::NotFound(path.to_string())),
        }
    }

    fn create_directory(&self, path: &str) -> MirrorResult<()> {
        if !self.parent_exists(path) {
            return Err(MirrorError::NotFound(path.to_string()));
        }
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(path) {
            return Err(MirrorError::AlreadyExists(path.to_string()));
        }
        nodes.insert(path.to_string(), Node::Directory);
        Ok(())
    }

    fn delete_directory(&self, path: &str) -> MirrorResult<()> {
        self.directory_deletes.fetch_add(1, Ordering::SeqCst);
        if !self.children(path).is_empty() {
            return Err(MirrorError::backend(code::DIRECTORY_NOT_EMPTY, path));
        }
        match self.nodes.lock().unwrap().remove(path) {
            Some(_) => Ok(()),
            None => Err(MirrorError::NotFound(path.to_string())),
        }
    }

    fn rename_file(&self, from: &str, to: &str) -> MirrorResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .remove(from)
            .ok_or_else(|| MirrorError::NotFound(from.to_string()))?;
        nodes.insert(to.to_string(), node);
        Ok(())
    }

    fn space_info(&self, _path: &str) -> MirrorResult<SpaceInfo> {
        Ok(SpaceInfo {
            total: 1000,
            free: 400,
        })
    }

    fn commit(&self) -> MirrorResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> MirrorResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
