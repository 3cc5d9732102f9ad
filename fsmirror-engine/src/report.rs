// SPDX-License-Identifier: AGPL-3.0-or-later
//! Walk results

use serde::Serialize;
use std::fmt;

/// Counters for one tree walk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkReport {
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
    /// Entries that failed and were skipped.
    pub failures: u64,
    /// Files and directories removed by a delete walk.
    pub deleted: u64,
    pub cancelled: bool,
}

impl WalkReport {
    pub fn is_success(&self) -> bool {
        self.failures == 0 && !self.cancelled
    }

    /// Folds the counters of another walk into this one.
    pub fn merge(&mut self, other: &WalkReport) {
        self.files += other.files;
        self.directories += other.directories;
        self.bytes += other.bytes;
        self.failures += other.failures;
        self.deleted += other.deleted;
        self.cancelled |= other.cancelled;
    }
}

impl fmt::Display for WalkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files, {} directories, {} bytes",
            self.files, self.directories, self.bytes
        )?;
        if self.deleted > 0 {
            write!(f, ", {} deleted", self.deleted)?;
        }
        if self.failures > 0 {
            write!(f, ", {} failed", self.failures)?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}
