// SPDX-License-Identifier: AGPL-3.0-or-later
//! Zip archive destination
//!
//! The archive is itself a [`Stream`] on a device, so a tree can be exported
//! into any writable backend.

use chrono::{Datelike, Local, Timelike};
use fsmirror_core::{DevicePath, DeviceRegistry, MirrorError, MirrorResult, OpenMode, Stream};
use std::io::Write;
use tracing::debug;
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::config::ArchiveCompression;
use crate::pipeline::ChunkSink;

/// Zip writer opened once for a whole walk
pub struct ArchiveSink {
    path: DevicePath,
    writer: Option<ZipWriter<Stream>>,
    compression: ArchiveCompression,
    entries: usize,
}

impl ArchiveSink {
    /// Creates (or replaces) the archive file at `path`.
    pub fn create(
        registry: &DeviceRegistry,
        path: &DevicePath,
        compression: ArchiveCompression,
    ) -> MirrorResult<Self> {
        let stream = Stream::open(registry, path, OpenMode::CREATE | OpenMode::WRITE)?;
        debug!("Opened archive {}", path);
        Ok(Self {
            path: path.clone(),
            writer: Some(ZipWriter::new(stream)),
            compression,
            entries: 0,
        })
    }

    pub fn path(&self) -> &DevicePath {
        &self.path
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Starts a new entry stamped with the current local time. Chunks
    /// written afterwards belong to it.
    pub fn start_entry(&mut self, name: &str) -> MirrorResult<()> {
        let options = FileOptions::default()
            .compression_method(self.compression.method())
            .last_modified_time(now())
            .large_file(true);
        self.writer()?
            .start_file(name, options)
            .map_err(archive_error)?;
        self.entries += 1;
        Ok(())
    }

    /// Writes the central directory and closes the archive stream.
    pub fn finish(&mut self) -> MirrorResult<usize> {
        let mut writer = self.writer.take().ok_or(MirrorError::NotOpen("archive"))?;
        let mut stream = writer.finish().map_err(archive_error)?;
        stream.close()?;
        debug!("Closed archive {} with {} entries", self.path, self.entries);
        Ok(self.entries)
    }

    fn writer(&mut self) -> MirrorResult<&mut ZipWriter<Stream>> {
        self.writer.as_mut().ok_or(MirrorError::NotOpen("archive"))
    }
}

impl ChunkSink for ArchiveSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> MirrorResult<()> {
        self.writer()?.write_all(chunk)?;
        Ok(())
    }
}

/// Entry name for a file: its subpath without the leading separator.
pub fn entry_name(path: &DevicePath) -> &str {
    path.subpath().trim_start_matches('/')
}

fn now() -> zip::DateTime {
    let now = Local::now();
    zip::DateTime::from_date_and_time(
        u16::try_from(now.year()).unwrap_or(1980),
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second().min(59) as u8,
    )
    .unwrap_or_default()
}

fn archive_error(err: zip::result::ZipError) -> MirrorError {
    match err {
        zip::result::ZipError::Io(e) => MirrorError::Io(e),
        other => MirrorError::Archive(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsmirror_providers::MemoryBackend;
    use std::io::Read;
    use std::sync::Arc;
    use zip::ZipArchive;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(MemoryBackend::new("sdmc", None)))
    }

    #[test]
    fn test_entries_round_trip() {
        let registry = registry();
        let path = DevicePath::parse("sdmc:/out.zip").unwrap();
        let mut sink = ArchiveSink::create(&registry, &path, ArchiveCompression::Stored).unwrap();

        sink.start_entry("a/one.txt").unwrap();
        sink.write_chunk(b"hello ").unwrap();
        sink.write_chunk(b"world").unwrap();
        sink.start_entry("two.txt").unwrap();
        assert_eq!(sink.finish().unwrap(), 2);

        let stream = Stream::open(&registry, &path, OpenMode::READ).unwrap();
        let mut archive = ZipArchive::new(stream).unwrap();
        assert_eq!(archive.len(), 2);

        let mut entry = archive.by_name("a/one.txt").unwrap();
        assert_eq!(entry.compression(), zip::CompressionMethod::Stored);
        let mut text = String::new();
        entry.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello world");
        drop(entry);
        assert_eq!(archive.by_name("two.txt").unwrap().size(), 0);
    }

    #[test]
    fn test_finish_twice() {
        let registry = registry();
        let path = DevicePath::parse("sdmc:/empty.zip").unwrap();
        let mut sink = ArchiveSink::create(&registry, &path, ArchiveCompression::Deflated).unwrap();
        assert_eq!(sink.finish().unwrap(), 0);
        assert!(matches!(sink.finish(), Err(MirrorError::NotOpen(_))));
        assert!(matches!(sink.write_chunk(b"x"), Err(MirrorError::NotOpen(_))));
    }

    #[test]
    fn test_entry_name() {
        let path = DevicePath::parse("sdmc:/saves/game/slot1.bin").unwrap();
        assert_eq!(entry_name(&path), "saves/game/slot1.bin");
    }
}
