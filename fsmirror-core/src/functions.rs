// SPDX-License-Identifier: AGPL-3.0-or-later
//! Path-level file and directory operations
//!
//! Thin wrappers that resolve the device of a [`DevicePath`] and forward the
//! subpath to its backend.

use tracing::debug;

use crate::backend::SpaceInfo;
use crate::error::{code, MirrorError, MirrorResult};
use crate::operations::OpenMode;
use crate::path::{DevicePath, PATH_SEPARATOR};
use crate::registry::DeviceRegistry;

pub fn create_directory(registry: &DeviceRegistry, path: &DevicePath) -> MirrorResult<()> {
    registry.backend_for(path)?.create_directory(path.subpath())
}

/// Creates `path` and every missing ancestor, one segment at a time.
pub fn create_directories_recursively(
    registry: &DeviceRegistry,
    path: &DevicePath,
) -> MirrorResult<()> {
    let backend = registry.backend_for(path)?;
    let Some(root) = path.find_first_of(PATH_SEPARATOR) else {
        return Err(MirrorError::InvalidPath(path.to_string()));
    };

    let mut from = root + 1;
    loop {
        let end = path.find_first_of_from(PATH_SEPARATOR, from);
        let ancestor = path.prefix(end.unwrap_or(path.len()))?;
        if !ancestor.is_root() && !directory_exists(registry, &ancestor) {
            debug!("Creating {}", ancestor);
            backend.create_directory(ancestor.subpath())?;
        }
        match end {
            Some(slash) => from = slash + 1,
            None => return Ok(()),
        }
    }
}

/// Deletes an empty directory. The device root is never passed to the backend.
pub fn delete_directory(registry: &DeviceRegistry, path: &DevicePath) -> MirrorResult<()> {
    let backend = registry.backend_for(path)?;
    if path.is_root() {
        return Err(MirrorError::backend(
            code::NOT_PERMITTED,
            format!("{path}: the root directory cannot be deleted"),
        ));
    }
    backend.delete_directory(path.subpath())
}

/// True when `path` can be opened as a directory.
pub fn directory_exists(registry: &DeviceRegistry, path: &DevicePath) -> bool {
    match registry.backend_for(path) {
        Ok(backend) => backend.open_directory(path.subpath()).is_ok(),
        Err(_) => false,
    }
}

pub fn rename_directory(
    registry: &DeviceRegistry,
    from: &DevicePath,
    to: &DevicePath,
) -> MirrorResult<()> {
    check_same_device(from, to)?;
    registry
        .backend_for(from)?
        .rename_directory(from.subpath(), to.subpath())
}

/// Creates a file of `size` zero bytes.
pub fn create_file(registry: &DeviceRegistry, path: &DevicePath, size: u64) -> MirrorResult<()> {
    registry.backend_for(path)?.create_file(path.subpath(), size)
}

pub fn file_exists(registry: &DeviceRegistry, path: &DevicePath) -> bool {
    match registry.backend_for(path) {
        Ok(backend) => backend.open_file(path.subpath(), OpenMode::READ).is_ok(),
        Err(_) => false,
    }
}

pub fn delete_file(registry: &DeviceRegistry, path: &DevicePath) -> MirrorResult<()> {
    registry.backend_for(path)?.delete_file(path.subpath())
}

pub fn file_size(registry: &DeviceRegistry, path: &DevicePath) -> MirrorResult<u64> {
    registry
        .backend_for(path)?
        .open_file(path.subpath(), OpenMode::READ)?
        .size()
}

pub fn rename_file(registry: &DeviceRegistry, from: &DevicePath, to: &DevicePath) -> MirrorResult<()> {
    check_same_device(from, to)?;
    registry
        .backend_for(from)?
        .rename_file(from.subpath(), to.subpath())
}

pub fn space_info(registry: &DeviceRegistry, path: &DevicePath) -> MirrorResult<SpaceInfo> {
    registry.backend_for(path)?.space_info(path.subpath())
}

pub fn free_space(registry: &DeviceRegistry, path: &DevicePath) -> MirrorResult<u64> {
    space_info(registry, path).map(|info| info.free)
}

pub fn total_space(registry: &DeviceRegistry, path: &DevicePath) -> MirrorResult<u64> {
    space_info(registry, path).map(|info| info.total)
}

fn check_same_device(from: &DevicePath, to: &DevicePath) -> MirrorResult<()> {
    if from.device() != to.device() {
        return Err(MirrorError::InvalidPath(format!(
            "cannot rename {from} across devices to {to}"
        )));
    }
    Ok(())
}
