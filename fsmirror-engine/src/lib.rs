// SPDX-License-Identifier: AGPL-3.0-or-later
//! Copy engine for fsmirror
//!
//! Walks directory trees on one device and mirrors them onto another, into
//! a zip archive, or out of existence. File contents move through a
//! two-thread pipeline holding a single chunk in flight.

pub mod archive;
pub mod config;
pub mod engine;
pub mod observer;
pub mod pipeline;
pub mod report;

pub use archive::ArchiveSink;
pub use config::{ArchiveCompression, EngineConfig, DEFAULT_CHUNK_SIZE};
pub use engine::CopyEngine;
pub use observer::{Silent, WalkObserver};
pub use pipeline::{transfer, ChunkSink};
pub use report::WalkReport;
