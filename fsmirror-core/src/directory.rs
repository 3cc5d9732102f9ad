// SPDX-License-Identifier: AGPL-3.0-or-later
//! Directory listings
//!
//! A [`Directory`] is a sorted snapshot. The native handle is read to the end
//! and released inside [`Directory::open`]; later lookups are served from
//! memory and never see changes made after the open.

use tracing::debug;

use crate::backend::DirectoryReader;
use crate::entry::{compare_entries, DirectoryEntry};
use crate::error::{code, MirrorError, MirrorResult};
use crate::path::DevicePath;
use crate::registry::DeviceRegistry;

/// Upper bound on entries read from a backend that cannot report a count.
pub const MAX_DIRECTORY_ENTRIES: usize = 0x10000;

const READ_BATCH: usize = 64;

/// Sorted snapshot of one directory
#[derive(Debug, Clone)]
pub struct Directory {
    path: DevicePath,
    entries: Vec<DirectoryEntry>,
}

impl Directory {
    pub fn open(registry: &DeviceRegistry, path: &DevicePath) -> MirrorResult<Self> {
        let backend = registry.backend_for(path)?;
        let mut entries = {
            let mut reader = backend.open_directory(path.subpath())?;
            match reader.entry_count()? {
                Some(count) => read_counted(reader.as_mut(), path, count)?,
                None => read_until_exhausted(reader.as_mut(), path)?,
            }
        };

        entries.sort_by(compare_entries);
        debug!("Listed {} ({} entries)", path, entries.len());

        Ok(Self {
            path: path.clone(),
            entries,
        })
    }

    pub fn path(&self) -> &DevicePath {
        &self.path
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_at(&self, index: usize) -> Option<&DirectoryEntry> {
        self.entries.get(index)
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.name.as_str())
    }

    /// `false` when `index` is out of range.
    pub fn is_directory_at(&self, index: usize) -> bool {
        self.entries
            .get(index)
            .is_some_and(DirectoryEntry::is_directory)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DirectoryEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a Directory {
    type Item = &'a DirectoryEntry;
    type IntoIter = std::slice::Iter<'a, DirectoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn read_counted(
    reader: &mut (dyn DirectoryReader + '_),
    path: &DevicePath,
    count: u64,
) -> MirrorResult<Vec<DirectoryEntry>> {
    let count = usize::try_from(count).unwrap_or(usize::MAX);
    if count > MAX_DIRECTORY_ENTRIES {
        return Err(MirrorError::CapacityExceeded {
            needed: count,
            capacity: MAX_DIRECTORY_ENTRIES,
        });
    }

    let mut entries = Vec::with_capacity(count);
    while entries.len() < count {
        let want = count - entries.len();
        if reader.read_entries(&mut entries, want)? == 0 {
            break;
        }
    }

    if entries.len() != count {
        return Err(MirrorError::backend(
            code::ENTRY_COUNT_MISMATCH,
            format!("{path}: expected {count} entries, read {}", entries.len()),
        ));
    }
    Ok(entries)
}

fn read_until_exhausted(
    reader: &mut (dyn DirectoryReader + '_),
    path: &DevicePath,
) -> MirrorResult<Vec<DirectoryEntry>> {
    let mut entries = Vec::new();
    loop {
        // Ask for one past the limit so an oversized directory is detected.
        let room = (MAX_DIRECTORY_ENTRIES + 1 - entries.len()).min(READ_BATCH);
        if reader.read_entries(&mut entries, room)? == 0 {
            break;
        }
        if entries.len() > MAX_DIRECTORY_ENTRIES {
            debug!("{} has more than {} entries", path, MAX_DIRECTORY_ENTRIES);
            return Err(MirrorError::CapacityExceeded {
                needed: entries.len(),
                capacity: MAX_DIRECTORY_ENTRIES,
            });
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StorageBackend;
    use crate::testing::{ListingStyle, ScriptedBackend};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn sample(style: ListingStyle) -> ScriptedBackend {
        ScriptedBackend::new(style)
            .with_file("/b.txt", b"bb")
            .with_dir("/A")
            .with_file("/a.txt", b"a")
            .with_dir("/B")
            .with_file("/A/inner.bin", b"x")
    }

    fn names(dir: &Directory) -> Vec<String> {
        dir.iter()
            .map(|e| {
                if e.is_directory() {
                    format!("{}/", e.name)
                } else {
                    e.name.clone()
                }
            })
            .collect()
    }

    #[test]
    fn test_open_sorts_directories_first() {
        for style in [ListingStyle::CountUpFront, ListingStyle::UntilExhausted] {
            let registry = DeviceRegistry::new(Arc::new(sample(style)));
            let path = DevicePath::parse("sdmc:/").unwrap();
            let dir = Directory::open(&registry, &path).unwrap();
            assert_eq!(names(&dir), vec!["A/", "B/", "a.txt", "b.txt"]);
            assert_eq!(dir.entry_count(), 4);
        }
    }

    #[test]
    fn test_indexed_access() {
        let registry = DeviceRegistry::new(Arc::new(sample(ListingStyle::CountUpFront)));
        let dir = Directory::open(&registry, &DevicePath::parse("sdmc:/").unwrap()).unwrap();

        assert!(dir.is_directory_at(0));
        assert!(!dir.is_directory_at(3));
        assert!(!dir.is_directory_at(99));
        assert_eq!(dir.name_at(3), Some("b.txt"));
        assert_eq!(dir.entry_at(3).map(|e| e.size), Some(2));
        assert!(dir.entry_at(4).is_none());
        assert_eq!((&dir).into_iter().count(), 4);
    }

    #[test]
    fn test_handle_released_after_open() {
        let backend = Arc::new(sample(ListingStyle::UntilExhausted));
        let readers = backend.open_readers.clone();
        let registry = DeviceRegistry::new(backend);

        let dir = Directory::open(&registry, &DevicePath::parse("sdmc:/A").unwrap()).unwrap();
        assert_eq!(readers.load(Ordering::SeqCst), 0);
        assert_eq!(names(&dir), vec!["inner.bin"]);
    }

    #[test]
    fn test_snapshot_does_not_change() {
        let backend = Arc::new(sample(ListingStyle::CountUpFront));
        let registry = DeviceRegistry::new(backend.clone());
        let dir = Directory::open(&registry, &DevicePath::parse("sdmc:/").unwrap()).unwrap();

        backend.create_file("/c.txt", 0).unwrap();
        assert_eq!(dir.entry_count(), 4);
    }

    #[test]
    fn test_count_mismatch_is_an_error() {
        let registry = DeviceRegistry::new(Arc::new(sample(ListingStyle::WrongCount)));
        let err = Directory::open(&registry, &DevicePath::parse("sdmc:/").unwrap()).unwrap_err();
        assert_eq!(err.backend_code(), Some(code::ENTRY_COUNT_MISMATCH));
    }

    #[test]
    fn test_missing_directory() {
        let registry = DeviceRegistry::new(Arc::new(sample(ListingStyle::CountUpFront)));
        let err = Directory::open(&registry, &DevicePath::parse("sdmc:/nope").unwrap()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unknown_device() {
        let registry = DeviceRegistry::new(Arc::new(sample(ListingStyle::CountUpFront)));
        let err = Directory::open(&registry, &DevicePath::parse("nand:/").unwrap()).unwrap_err();
        assert!(matches!(err, MirrorError::DeviceNotFound(_)));
    }

    #[test]
    fn test_empty_directory() {
        let registry = DeviceRegistry::new(Arc::new(sample(ListingStyle::UntilExhausted)));
        let dir = Directory::open(&registry, &DevicePath::parse("sdmc:/B").unwrap()).unwrap();
        assert!(dir.is_empty());
    }
}
