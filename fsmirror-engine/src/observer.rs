// SPDX-License-Identifier: AGPL-3.0-or-later
//! Walk progress callbacks

use fsmirror_core::{DevicePath, MirrorError};

/// Receives progress from a running walk. All methods default to no-ops.
pub trait WalkObserver {
    fn file_started(&self, _path: &DevicePath, _size: u64) {}

    /// Called on the walking thread as each chunk is handed to the writer.
    fn bytes_transferred(&self, _bytes: u64) {}

    fn file_finished(&self, _path: &DevicePath) {}

    fn entry_failed(&self, _path: &DevicePath, _error: &MirrorError) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl WalkObserver for Silent {}
