// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration file handling

use fsmirror_core::{MirrorError, MirrorResult, PRIMARY_DEVICE};
use fsmirror_engine::{ArchiveCompression, EngineConfig, DEFAULT_CHUNK_SIZE};
use fsmirror_providers::DeviceConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_FILE: &str = "fsmirror.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub chunk_size: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSection {
    pub compression: ArchiveCompression,
}

/// Contents of `fsmirror.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub archive: ArchiveSection,
    #[serde(rename = "device")]
    pub devices: Vec<DeviceConfig>,
}

impl AppConfig {
    /// Loads `path`, or the default location when none is given. A missing
    /// default file gives a single `sdmc` volume over the working directory.
    pub fn load(path: Option<&Path>) -> MirrorResult<Self> {
        if let Some(path) = path {
            return Self::read(path);
        }
        match default_path() {
            Some(path) if path.exists() => Self::read(&path),
            _ => Self::fallback(),
        }
    }

    pub fn parse(text: &str) -> MirrorResult<Self> {
        toml::from_str(text).map_err(|e| MirrorError::Config(e.to_string()))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_chunk_size(self.engine.chunk_size)
            .with_compression(self.archive.compression)
    }

    fn read(path: &Path) -> MirrorResult<Self> {
        debug!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)
            .map_err(|e| MirrorError::Config(format!("{}: {e}", path.display())))?;
        Self::parse(&text)
    }

    fn fallback() -> MirrorResult<Self> {
        let cwd = std::env::current_dir()?;
        debug!("No configuration file, serving {} as {}", cwd.display(), PRIMARY_DEVICE);
        Ok(Self {
            devices: vec![DeviceConfig::volume(PRIMARY_DEVICE, cwd)],
            ..Default::default()
        })
    }
}

/// `fsmirror.toml` in the platform configuration directory.
pub fn default_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "hyperpolymath", "fsmirror")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
