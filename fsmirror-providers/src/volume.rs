// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host filesystem volume backend

use fsmirror_core::{
    backend::{
        BackendKind, DirectoryReader, FileHandle, SpaceInfo, StorageBackend, StorageCapabilities,
    },
    entry::DirectoryEntry,
    error::{code, MirrorError, MirrorResult},
    operations::OpenMode,
};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Device backed by a directory on the host
pub struct VolumeBackend {
    name: String,
    root: PathBuf,
    read_only: bool,
    capabilities: StorageCapabilities,
}

impl VolumeBackend {
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            root: root.as_ref().to_path_buf(),
            read_only: false,
            capabilities: StorageCapabilities::volume(),
        }
    }

    /// Rejects every mutating call with [`MirrorError::ReadOnly`].
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self.capabilities = StorageCapabilities::read_only();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_real_path(&self, path: &str) -> MirrorResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(MirrorError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn check_writable(&self, path: &str) -> MirrorResult<()> {
        if self.read_only {
            return Err(MirrorError::ReadOnly(format!("{}:{}", self.name, path)));
        }
        Ok(())
    }
}

struct VolumeReader {
    path: String,
    entries: fs::ReadDir,
}

impl DirectoryReader for VolumeReader {
    fn read_entries(&mut self, out: &mut Vec<DirectoryEntry>, max: usize) -> MirrorResult<usize> {
        let mut read = 0;
        while read < max {
            let Some(entry) = self.entries.next() else {
                break;
            };
            let entry = entry.map_err(|e| MirrorError::from_io(e, &self.path))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // Links are never followed; they list as files and unlink as files.
            let entry = match entry.file_type() {
                Ok(kind) if kind.is_dir() => DirectoryEntry::directory(name),
                _ => DirectoryEntry::file(name, entry.metadata().map_or(0, |m| m.len())),
            };
            out.push(entry);
            read += 1;
        }
        Ok(read)
    }
}

struct VolumeFile {
    path: String,
    file: File,
}

impl VolumeFile {
    fn io_err(&self, err: io::Error) -> MirrorError {
        MirrorError::from_io(err, &self.path)
    }
}

impl FileHandle for VolumeFile {
    fn size(&self) -> MirrorResult<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| self.io_err(e))
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> MirrorResult<usize> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| self.io_err(e))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.io_err(e)),
            }
        }
        Ok(filled)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> MirrorResult<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| self.io_err(e))?;
        self.file.write_all(buf).map_err(|e| self.io_err(e))
    }

    fn set_size(&mut self, size: u64) -> MirrorResult<()> {
        self.file.set_len(size).map_err(|e| self.io_err(e))
    }

    fn flush(&mut self) -> MirrorResult<()> {
        self.file.sync_data().map_err(|e| self.io_err(e))
    }
}

impl StorageBackend for VolumeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Volume
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &StorageCapabilities {
        &self.capabilities
    }

    fn open_directory(&self, path: &str) -> MirrorResult<Box<dyn DirectoryReader + '_>> {
        let real = self.to_real_path(path)?;
        let entries = fs::read_dir(&real).map_err(|e| MirrorError::from_io(e, path))?;
        Ok(Box::new(VolumeReader {
            path: path.to_string(),
            entries,
        }))
    }

    fn open_file(&self, path: &str, mode: OpenMode) -> MirrorResult<Box<dyn FileHandle>> {
        if mode.is_writable() {
            self.check_writable(path)?;
        }
        let real = self.to_real_path(path)?;
        if real.is_dir() {
            return Err(MirrorError::InvalidPath(format!("{path} is a directory")));
        }
        let file = File::options()
            .read(true)
            .write(mode.is_writable())
            .open(&real)
            .map_err(|e| MirrorError::from_io(e, path))?;
        Ok(Box::new(VolumeFile {
            path: path.to_string(),
            file,
        }))
    }

    fn create_file(&self, path: &str, size: u64) -> MirrorResult<()> {
        self.check_writable(path)?;
        let real = self.to_real_path(path)?;
        let file = File::options()
            .write(true)
            .create_new(true)
            .open(&real)
            .map_err(|e| MirrorError::from_io(e, path))?;
        file.set_len(size).map_err(|e| MirrorError::from_io(e, path))
    }

    fn delete_file(&self, path: &str) -> MirrorResult<()> {
        self.check_writable(path)?;
        let real = self.to_real_path(path)?;
        fs::remove_file(&real).map_err(|e| MirrorError::from_io(e, path))
    }

    fn create_directory(&self, path: &str) -> MirrorResult<()> {
        self.check_writable(path)?;
        let real = self.to_real_path(path)?;
        fs::create_dir(&real).map_err(|e| MirrorError::from_io(e, path))
    }

    fn delete_directory(&self, path: &str) -> MirrorResult<()> {
        self.check_writable(path)?;
        if path.trim_start_matches('/').is_empty() {
            return Err(MirrorError::backend(
                code::NOT_PERMITTED,
                "the root directory cannot be deleted",
            ));
        }
        let real = self.to_real_path(path)?;
        fs::remove_dir(&real).map_err(|e| MirrorError::from_io(e, path))
    }

    fn rename_file(&self, from: &str, to: &str) -> MirrorResult<()> {
        self.rename(from, to)
    }

    fn rename_directory(&self, from: &str, to: &str) -> MirrorResult<()> {
        self.rename(from, to)
    }

    fn space_info(&self, path: &str) -> MirrorResult<SpaceInfo> {
        let real = self.to_real_path(path)?;
        volume_space(&real).map_err(|e| MirrorError::from_io(e, path))
    }
}

impl VolumeBackend {
    fn rename(&self, from: &str, to: &str) -> MirrorResult<()> {
        self.check_writable(from)?;
        let src = self.to_real_path(from)?;
        let dst = self.to_real_path(to)?;
        if dst.exists() {
            return Err(MirrorError::AlreadyExists(to.to_string()));
        }
        debug!("Renaming {} to {}", src.display(), dst.display());
        fs::rename(&src, &dst).map_err(|e| MirrorError::from_io(e, from))
    }
}

#[cfg(unix)]
fn volume_space(path: &Path) -> io::Result<SpaceInfo> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: statvfs only writes into the zeroed struct we pass it.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let block = stat.f_frsize as u64;
    Ok(SpaceInfo {
        total: (stat.f_blocks as u64).saturating_mul(block),
        free: (stat.f_bavail as u64).saturating_mul(block),
    })
}

#[cfg(not(unix))]
fn volume_space(_path: &Path) -> io::Result<SpaceInfo> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "space information is only available on unix hosts",
    ))
}
