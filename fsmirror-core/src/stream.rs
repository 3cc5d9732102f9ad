// SPDX-License-Identifier: AGPL-3.0-or-later
//! Byte streams over backend files
//!
//! [`Stream`] tracks its own offset and size on top of a positionless
//! [`FileHandle`]. The offset is always kept within `[0, size]`, and a write
//! that would run past the end grows the file first.

use std::io;
use tracing::debug;

use crate::backend::FileHandle;
use crate::error::{MirrorError, MirrorResult};
use crate::operations::{OpenMode, SeekOrigin};
use crate::path::DevicePath;
use crate::registry::DeviceRegistry;

/// Open file on a device
pub struct Stream {
    path: DevicePath,
    handle: Option<Box<dyn FileHandle>>,
    mode: OpenMode,
    offset: u64,
    size: u64,
}

impl Stream {
    pub fn open(registry: &DeviceRegistry, path: &DevicePath, mode: OpenMode) -> MirrorResult<Self> {
        Self::open_sized(registry, path, mode, 0)
    }

    /// Opens `path`. With [`OpenMode::CREATE`] any existing file is replaced
    /// by a new one of `initial_size` bytes, for backends that cannot grow a
    /// file freely.
    pub fn open_sized(
        registry: &DeviceRegistry,
        path: &DevicePath,
        mut mode: OpenMode,
        initial_size: u64,
    ) -> MirrorResult<Self> {
        let backend = registry.backend_for(path)?;
        let subpath = path.subpath();

        if mode.contains(OpenMode::APPEND) {
            mode.insert(OpenMode::WRITE);
        }

        if mode.contains(OpenMode::CREATE) {
            match backend.delete_file(subpath) {
                Ok(()) => debug!("Replaced existing file {}", path),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            backend.create_file(subpath, initial_size)?;
            mode.remove(OpenMode::CREATE);
        }

        let handle = backend.open_file(subpath, mode)?;
        let size = handle.size()?;
        let offset = if mode.contains(OpenMode::APPEND) { size } else { 0 };

        Ok(Self {
            path: path.clone(),
            handle: Some(handle),
            mode,
            offset,
            size,
        })
    }

    pub fn path(&self) -> &DevicePath {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn tell(&self) -> u64 {
        self.offset
    }

    pub fn end_of_stream(&self) -> bool {
        self.offset >= self.size
    }

    /// Reads into `buf`, returning `Ok(0)` at end of stream.
    ///
    /// The count reported by the backend is clamped to what remains in the
    /// stream.
    pub fn read(&mut self, buf: &mut [u8]) -> MirrorResult<usize> {
        let remaining = self.size.saturating_sub(self.offset);
        let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        if want == 0 {
            return Ok(0);
        }

        let handle = self.handle.as_mut().ok_or(MirrorError::NotOpen("read"))?;
        let read = handle.read_at(self.offset, &mut buf[..want])?.min(want);
        self.offset += read as u64;
        Ok(read)
    }

    pub fn read_byte(&mut self) -> MirrorResult<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Reads up to and including the next `\n`, or to end of stream.
    /// Returns `None` when nothing is left.
    pub fn read_line(&mut self) -> MirrorResult<Option<String>> {
        let mut line = Vec::new();
        while let Some(byte) = self.read_byte()? {
            line.push(byte);
            if byte == b'\n' {
                break;
            }
        }
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    /// Writes all of `buf`, growing the file first when the write runs past
    /// its end. A failed resize writes nothing.
    pub fn write(&mut self, buf: &[u8]) -> MirrorResult<usize> {
        if !self.mode.is_writable() {
            return Err(MirrorError::NotOpen("write"));
        }
        let handle = self.handle.as_mut().ok_or(MirrorError::NotOpen("write"))?;
        if buf.is_empty() {
            return Ok(0);
        }

        let end = self.offset + buf.len() as u64;
        if end > self.size {
            handle.set_size(end)?;
            self.size = end;
        }

        handle.write_at(self.offset, buf)?;
        self.offset = end;
        Ok(buf.len())
    }

    pub fn write_byte(&mut self, byte: u8) -> MirrorResult<()> {
        self.write(&[byte]).map(|_| ())
    }

    /// Moves the offset and returns it, clamped to `[0, size]`.
    pub fn seek(&mut self, offset: i64, origin: SeekOrigin) -> u64 {
        let base = match origin {
            SeekOrigin::Begin => 0,
            SeekOrigin::Current => self.offset,
            SeekOrigin::End => self.size,
        };
        let target = if offset < 0 {
            base.saturating_sub(offset.unsigned_abs())
        } else {
            base.saturating_add(offset as u64)
        };
        self.offset = target.min(self.size);
        self.offset
    }

    /// Flushes pending writes. Read-only streams have nothing to flush.
    pub fn flush(&mut self) -> MirrorResult<()> {
        if !self.mode.is_writable() {
            return Ok(());
        }
        match self.handle.as_mut() {
            Some(handle) => handle.flush(),
            None => Ok(()),
        }
    }

    /// Flushes and releases the handle. Closing twice is a no-op.
    pub fn close(&mut self) -> MirrorResult<()> {
        let result = self.flush();
        self.handle = None;
        result
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Flush on drop failed for {}: {}", self.path, e);
        }
    }
}

impl io::Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Stream::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Stream::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Stream::flush(self).map_err(io::Error::from)
    }
}

impl io::Seek for Stream {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, origin) = match pos {
            io::SeekFrom::Start(n) => (i64::try_from(n).unwrap_or(i64::MAX), SeekOrigin::Begin),
            io::SeekFrom::Current(n) => (n, SeekOrigin::Current),
            io::SeekFrom::End(n) => (n, SeekOrigin::End),
        };
        Ok(Stream::seek(self, offset, origin))
    }
}
