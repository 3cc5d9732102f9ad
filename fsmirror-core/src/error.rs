// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fsmirror

use thiserror::Error;

/// Result type alias
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Numeric codes reported by the in-process backends.
///
/// Host-backed devices report the OS error number instead.
pub mod code {
    pub const PATH_NOT_FOUND: u32 = 0x202;
    pub const PATH_ALREADY_EXISTS: u32 = 0x402;
    pub const OUT_OF_SPACE: u32 = 0x2A802;
    pub const DIRECTORY_NOT_EMPTY: u32 = 0x2A402;
    pub const OUT_OF_RANGE: u32 = 0x2EE02;
    pub const ENTRY_COUNT_MISMATCH: u32 = 0x2EE04;
    pub const NOT_PERMITTED: u32 = 0x2F802;
    pub const CONTAINER_CORRUPTED: u32 = 0x1B802;
}

/// Main error type
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device name is reserved: {0}")]
    ReservedDevice(String),

    #[error("Backend error 0x{code:X}: {message}")]
    Backend { code: u32, message: String },

    #[error("Path capacity exceeded: {needed} bytes needed, {capacity} available")]
    CapacityExceeded { needed: usize, capacity: usize },

    #[error("Partial transfer of {path}: {transferred} of {expected} bytes")]
    PartialTransfer {
        path: String,
        expected: u64,
        transferred: u64,
    },

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Stream not open for {0}")]
    NotOpen(&'static str),

    #[error("Device is read-only: {0}")]
    ReadOnly(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Could not clear {path}: {failures} entries remain")]
    ClearFailed { path: String, failures: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MirrorError {
    pub fn backend(code: u32, message: impl Into<String>) -> Self {
        MirrorError::Backend {
            code,
            message: message.into(),
        }
    }

    /// Maps a host I/O failure on `path` onto the closest variant.
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => MirrorError::NotFound(path.to_string()),
            std::io::ErrorKind::AlreadyExists => MirrorError::AlreadyExists(path.to_string()),
            _ => MirrorError::Backend {
                code: err.raw_os_error().map(|c| c as u32).unwrap_or(0),
                message: format!("{path}: {err}"),
            },
        }
    }

    /// Backend-specific numeric code, when the failure carries one.
    pub fn backend_code(&self) -> Option<u32> {
        match self {
            MirrorError::Backend { code, .. } => Some(*code),
            MirrorError::NotFound(_) => Some(code::PATH_NOT_FOUND),
            MirrorError::AlreadyExists(_) => Some(code::PATH_ALREADY_EXISTS),
            MirrorError::Io(e) => e.raw_os_error().map(|c| c as u32),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            MirrorError::NotFound(_) | MirrorError::DeviceNotFound(_) => true,
            MirrorError::Backend { code, .. } => *code == code::PATH_NOT_FOUND,
            MirrorError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<MirrorError> for std::io::Error {
    fn from(err: MirrorError) -> Self {
        match err {
            MirrorError::Io(e) => e,
            MirrorError::NotFound(_) => std::io::Error::new(std::io::ErrorKind::NotFound, err),
            other => std::io::Error::other(other),
        }
    }
}
