// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tree walks
//!
//! Each walk is single-threaded and visits entries in listing order. A
//! failing entry is logged, reported to the observer and skipped; only a
//! top-level source that cannot be listed aborts the walk.

use fsmirror_core::{
    functions, Directory, DevicePath, DeviceRegistry, MirrorError, MirrorResult, OpenMode, Stream,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::archive::{entry_name, ArchiveSink};
use crate::config::EngineConfig;
use crate::observer::{Silent, WalkObserver};
use crate::pipeline::{transfer, ChunkSink};
use crate::report::WalkReport;

/// Copies, deletes and archives directory trees across devices
pub struct CopyEngine<'r> {
    registry: &'r DeviceRegistry,
    config: EngineConfig,
    running: Option<Arc<AtomicBool>>,
    observer: Box<dyn WalkObserver + 'r>,
}

impl<'r> CopyEngine<'r> {
    pub fn new(registry: &'r DeviceRegistry, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            running: None,
            observer: Box::new(Silent),
        }
    }

    /// Walks stop at the next entry once `running` is cleared.
    pub fn with_liveness(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    pub fn with_observer(mut self, observer: impl WalkObserver + 'r) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Copies one file, replacing `dest`. Returns the bytes copied.
    pub fn copy_file(&self, source: &DevicePath, dest: &DevicePath) -> MirrorResult<u64> {
        let mut src = Stream::open(self.registry, source, OpenMode::READ)?;
        let size = src.size();
        let mut dst = Stream::open_sized(
            self.registry,
            dest,
            OpenMode::CREATE | OpenMode::WRITE,
            size,
        )?;
        self.observer.file_started(source, size);

        let copied = self.transfer(&mut src, &mut dst, size)?;
        dst.close()?;
        self.observer.file_finished(source);
        debug!("Copied {} -> {} ({} bytes)", source, dest, copied);
        Ok(copied)
    }

    /// Copies the contents of `source` into `dest`, creating `dest` if needed.
    pub fn copy_tree(&self, source: &DevicePath, dest: &DevicePath) -> MirrorResult<WalkReport> {
        let listing = Directory::open(self.registry, source)?;
        self.copy_listing(&listing, dest)
    }

    /// Deletes everything below `path`, then `path` itself unless it is a
    /// device root. A directory is only removed once its subtree is empty.
    pub fn delete_tree(&self, path: &DevicePath) -> MirrorResult<WalkReport> {
        let listing = Directory::open(self.registry, path)?;
        let mut report = WalkReport::default();
        self.delete_entries(&listing, &mut report);

        if report.failures == 0 && !report.cancelled && !path.is_root() {
            match functions::delete_directory(self.registry, path) {
                Ok(()) => report.deleted += 1,
                Err(e) => self.fail(path, e, &mut report),
            }
        }
        info!("Deleted {}: {}", path, report);
        Ok(report)
    }

    /// Writes every file below `source` into one zip archive at `archive`.
    pub fn archive_tree(&self, source: &DevicePath, archive: &DevicePath) -> MirrorResult<WalkReport> {
        let listing = Directory::open(self.registry, source)?;
        let mut sink = ArchiveSink::create(self.registry, archive, self.config.compression)?;
        let mut report = WalkReport::default();

        self.archive_entries(&listing, &mut sink, &mut report);
        let entries = sink.finish()?;
        info!("Archived {} into {} ({} entries): {}", source, archive, entries, report);
        Ok(report)
    }

    /// Replaces `dest` with a fresh copy of `source`.
    pub fn dump_tree(&self, source: &DevicePath, dest: &DevicePath) -> MirrorResult<WalkReport> {
        let listing = Directory::open(self.registry, source)?;

        let mut cleared = WalkReport::default();
        if functions::directory_exists(self.registry, dest) {
            cleared = self.delete_tree(dest)?;
            if cleared.cancelled {
                return Err(MirrorError::Cancelled);
            }
            if cleared.failures > 0 {
                return Err(MirrorError::ClearFailed {
                    path: dest.to_string(),
                    failures: cleared.failures,
                });
            }
        }

        let mut report = self.copy_listing(&listing, dest)?;
        report.deleted = cleared.deleted;
        Ok(report)
    }

    fn copy_listing(&self, listing: &Directory, dest: &DevicePath) -> MirrorResult<WalkReport> {
        if !functions::directory_exists(self.registry, dest) {
            functions::create_directories_recursively(self.registry, dest)?;
        }
        let mut report = WalkReport::default();
        self.copy_entries(listing, dest, &mut report);
        info!("Copied {} -> {}: {}", listing.path(), dest, report);
        Ok(report)
    }

    fn copy_entries(&self, listing: &Directory, dest: &DevicePath, report: &mut WalkReport) {
        for entry in listing {
            if self.stopped(report) {
                return;
            }
            let Some(from) = self.child(listing.path(), &entry.name, report) else {
                continue;
            };
            let Some(to) = self.child(dest, &entry.name, report) else {
                continue;
            };

            if entry.is_directory() {
                if !functions::directory_exists(self.registry, &to) {
                    if let Err(e) = functions::create_directory(self.registry, &to) {
                        self.fail(&to, e, report);
                        continue;
                    }
                }
                match Directory::open(self.registry, &from) {
                    Ok(sub) => {
                        report.directories += 1;
                        self.copy_entries(&sub, &to, report);
                    }
                    Err(e) => self.fail(&from, e, report),
                }
            } else {
                match self.copy_file(&from, &to) {
                    Ok(bytes) => {
                        report.files += 1;
                        report.bytes += bytes;
                    }
                    Err(e) => self.fail(&from, e, report),
                }
            }
        }
    }

    fn delete_entries(&self, listing: &Directory, report: &mut WalkReport) {
        for entry in listing {
            if self.stopped(report) {
                return;
            }
            let Some(path) = self.child(listing.path(), &entry.name, report) else {
                continue;
            };

            if entry.is_directory() {
                let sub = match Directory::open(self.registry, &path) {
                    Ok(sub) => sub,
                    Err(e) => {
                        self.fail(&path, e, report);
                        continue;
                    }
                };
                let failures = report.failures;
                self.delete_entries(&sub, report);
                if report.failures != failures || report.cancelled {
                    continue;
                }
                match functions::delete_directory(self.registry, &path) {
                    Ok(()) => {
                        report.deleted += 1;
                        report.directories += 1;
                    }
                    Err(e) => self.fail(&path, e, report),
                }
            } else {
                match functions::delete_file(self.registry, &path) {
                    Ok(()) => {
                        report.deleted += 1;
                        report.files += 1;
                    }
                    Err(e) => self.fail(&path, e, report),
                }
            }
        }
    }

    fn archive_entries(&self, listing: &Directory, sink: &mut ArchiveSink, report: &mut WalkReport) {
        for entry in listing {
            if self.stopped(report) {
                return;
            }
            let Some(path) = self.child(listing.path(), &entry.name, report) else {
                continue;
            };

            if entry.is_directory() {
                match Directory::open(self.registry, &path) {
                    Ok(sub) => {
                        report.directories += 1;
                        self.archive_entries(&sub, sink, report);
                    }
                    Err(e) => self.fail(&path, e, report),
                }
            } else if &path == sink.path() {
                debug!("Skipping the archive itself at {}", path);
            } else {
                match self.archive_file(&path, sink) {
                    Ok(bytes) => {
                        report.files += 1;
                        report.bytes += bytes;
                    }
                    Err(e) => self.fail(&path, e, report),
                }
            }
        }
    }

    fn archive_file(&self, path: &DevicePath, sink: &mut ArchiveSink) -> MirrorResult<u64> {
        let mut src = Stream::open(self.registry, path, OpenMode::READ)?;
        let size = src.size();
        sink.start_entry(entry_name(path))?;
        self.observer.file_started(path, size);

        let written = self.transfer(&mut src, sink, size)?;
        self.observer.file_finished(path);
        Ok(written)
    }

    fn transfer<S: ChunkSink + ?Sized>(&self, src: &mut Stream, sink: &mut S, size: u64) -> MirrorResult<u64> {
        let observer = &self.observer;
        transfer(src, sink, size, self.config.chunk_size, &mut |n| {
            observer.bytes_transferred(n)
        })
    }

    fn child(&self, parent: &DevicePath, name: &str, report: &mut WalkReport) -> Option<DevicePath> {
        match parent.join(name) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Skipping {} in {}: {}", name, parent, e);
                self.observer.entry_failed(parent, &e);
                report.failures += 1;
                None
            }
        }
    }

    fn fail(&self, path: &DevicePath, err: MirrorError, report: &mut WalkReport) {
        warn!("Failed on {}: {}", path, err);
        self.observer.entry_failed(path, &err);
        report.failures += 1;
    }

    fn stopped(&self, report: &mut WalkReport) -> bool {
        if report.cancelled {
            return true;
        }
        let running = self
            .running
            .as_ref()
            .map_or(true, |flag| flag.load(Ordering::SeqCst));
        if !running {
            info!("Walk cancelled");
            report.cancelled = true;
        }
        !running
    }
}
