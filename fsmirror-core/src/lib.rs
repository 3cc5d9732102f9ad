// SPDX-License-Identifier: AGPL-3.0-or-later
//! fsmirror core
//!
//! Device paths, the backend contract, the device registry, directory
//! listings and byte streams shared by every fsmirror crate.

pub mod backend;
pub mod directory;
pub mod entry;
pub mod error;
pub mod functions;
pub mod operations;
pub mod path;
pub mod registry;
pub mod stream;

#[cfg(test)]
mod testing;

pub use backend::{
    BackendKind, DirectoryReader, FileHandle, SpaceInfo, StorageBackend, StorageCapabilities,
};
pub use directory::Directory;
pub use entry::{compare_entries, DirectoryEntry, EntryKind};
pub use error::{MirrorError, MirrorResult};
pub use operations::{OpenMode, SeekOrigin};
pub use path::DevicePath;
pub use registry::{DeviceRegistry, PRIMARY_DEVICE};
pub use stream::Stream;
