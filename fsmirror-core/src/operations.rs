// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stream open modes and seek origins

use bitflags::bitflags;

bitflags! {
    /// How a [`Stream`](crate::Stream) is opened.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenMode: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Start at end of stream. Implies `WRITE`.
        const APPEND = 1 << 2;
        /// Replace any existing file with a new one before opening.
        const CREATE = 1 << 3;
    }
}

impl OpenMode {
    pub fn is_readable(self) -> bool {
        self.contains(OpenMode::READ)
    }

    pub fn is_writable(self) -> bool {
        self.intersects(OpenMode::WRITE | OpenMode::APPEND)
    }
}

/// Origin for [`Stream::seek`](crate::Stream::seek)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Begin,
    Current,
    End,
}
