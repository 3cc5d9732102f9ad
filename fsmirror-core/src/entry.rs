// SPDX-License-Identifier: AGPL-3.0-or-later
//! Directory entries

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a directory as reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    /// Backend-reported size; zero for directories.
    pub size: u64,
    pub kind: EntryKind,
}

impl DirectoryEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            kind: EntryKind::Directory,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Listing order: directories first, then names compared byte by byte
/// case-folded, with a shorter common prefix sorting first.
pub fn compare_entries(a: &DirectoryEntry, b: &DirectoryEntry) -> Ordering {
    match (a.is_directory(), b.is_directory()) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    let folded_a = a.name.bytes().map(|c| c.to_ascii_lowercase());
    let folded_b = b.name.bytes().map(|c| c.to_ascii_lowercase());
    folded_a.cmp(folded_b)
}
