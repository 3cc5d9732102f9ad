// SPDX-License-Identifier: AGPL-3.0-or-later
//! Two-thread file transfer
//!
//! The calling thread reads chunks from the source into one shared buffer.
//! A scoped writer thread copies each chunk into its own buffer, hands the
//! shared buffer back and writes. Only one chunk is ever in flight, so a
//! transfer holds exactly two buffers however large the file is.

use fsmirror_core::{MirrorError, MirrorResult, Stream};
use parking_lot::{Condvar, Mutex};
use std::thread;
use tracing::trace;

/// Destination of a transfer.
pub trait ChunkSink: Send {
    fn write_chunk(&mut self, chunk: &[u8]) -> MirrorResult<()>;
}

impl ChunkSink for Stream {
    fn write_chunk(&mut self, chunk: &[u8]) -> MirrorResult<()> {
        self.write(chunk).map(|_| ())
    }
}

/// The single slot shared by reader and writer.
struct Slot {
    buffer: Vec<u8>,
    len: usize,
    /// A chunk is waiting for the writer.
    ready: bool,
    /// The reader will produce nothing more.
    finished: bool,
    /// The writer failed and stopped consuming.
    aborted: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    signal: Condvar,
}

/// Moves `expected` bytes from `source` to `sink`, calling `progress` with
/// each chunk handed to the writer.
///
/// A zero-byte transfer returns immediately without starting a writer.
pub fn transfer<S>(
    source: &mut Stream,
    sink: &mut S,
    expected: u64,
    chunk_size: usize,
    progress: &mut dyn FnMut(u64),
) -> MirrorResult<u64>
where
    S: ChunkSink + ?Sized,
{
    if expected == 0 {
        return Ok(0);
    }

    let chunk_size = chunk_size.max(1);
    let shared = Shared {
        slot: Mutex::new(Slot {
            buffer: vec![0; chunk_size],
            len: 0,
            ready: false,
            finished: false,
            aborted: false,
        }),
        signal: Condvar::new(),
    };

    let (read_result, write_result) = thread::scope(|scope| {
        let shared = &shared;
        let writer = thread::Builder::new()
            .name("fsmirror-writer".to_string())
            .spawn_scoped(scope, move || consume(shared, sink, expected, chunk_size))?;

        let read_result = produce(shared, source, expected, progress);
        let write_result = match writer.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        Ok::<_, MirrorError>((read_result, write_result))
    })?;

    read_result?;
    let written = write_result?;
    if written != expected {
        return Err(MirrorError::PartialTransfer {
            path: source.path().to_string(),
            expected,
            transferred: written,
        });
    }
    Ok(written)
}

fn produce(
    shared: &Shared,
    source: &mut Stream,
    expected: u64,
    progress: &mut dyn FnMut(u64),
) -> MirrorResult<u64> {
    let mut total = 0u64;
    let result = loop {
        if total >= expected {
            break Ok(total);
        }

        let mut slot = shared.slot.lock();
        shared
            .signal
            .wait_while(&mut slot, |s| s.ready && !s.aborted);
        if slot.aborted {
            break Ok(total);
        }

        let read = match source.read(&mut slot.buffer) {
            Ok(0) => break Ok(total),
            Ok(read) => read,
            Err(e) => break Err(e),
        };
        slot.len = read;
        slot.ready = true;
        shared.signal.notify_one();
        drop(slot);

        total += read as u64;
        progress(read as u64);
    };

    let mut slot = shared.slot.lock();
    slot.finished = true;
    shared.signal.notify_one();
    result
}

fn consume<S>(shared: &Shared, sink: &mut S, expected: u64, chunk_size: usize) -> MirrorResult<u64>
where
    S: ChunkSink + ?Sized,
{
    let mut local = Vec::with_capacity(chunk_size);
    let mut written = 0u64;

    while written < expected {
        {
            let mut slot = shared.slot.lock();
            shared
                .signal
                .wait_while(&mut slot, |s| !s.ready && !s.finished);
            if !slot.ready {
                break;
            }
            local.clear();
            local.extend_from_slice(&slot.buffer[..slot.len]);
            slot.ready = false;
            shared.signal.notify_one();
        }

        if let Err(e) = sink.write_chunk(&local) {
            shared.slot.lock().aborted = true;
            shared.signal.notify_one();
            return Err(e);
        }
        written += local.len() as u64;
        trace!("Wrote chunk of {} bytes ({}/{})", local.len(), written, expected);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsmirror_core::{DevicePath, DeviceRegistry, OpenMode};
    use fsmirror_providers::MemoryBackend;
    use std::sync::Arc;

    fn registry_with(data: &[u8]) -> DeviceRegistry {
        let backend = MemoryBackend::new("sdmc", None);
        backend.tree().insert_file("/src.bin", data.to_vec());
        DeviceRegistry::new(Arc::new(backend))
    }

    fn open_source(registry: &DeviceRegistry) -> Stream {
        let path = DevicePath::parse("sdmc:/src.bin").unwrap();
        Stream::open(registry, &path, OpenMode::READ).unwrap()
    }

    /// Collects chunks in memory, failing after `fail_after` chunks.
    struct VecSink {
        data: Vec<u8>,
        chunks: usize,
        fail_after: Option<usize>,
    }

    impl ChunkSink for VecSink {
        fn write_chunk(&mut self, chunk: &[u8]) -> MirrorResult<()> {
            if self.fail_after == Some(self.chunks) {
                return Err(MirrorError::backend(0x2A802, "disk full"));
            }
            self.chunks += 1;
            self.data.extend_from_slice(chunk);
            Ok(())
        }
    }

    fn sink() -> VecSink {
        VecSink {
            data: Vec::new(),
            chunks: 0,
            fail_after: None,
        }
    }

    #[test]
    fn test_transfer_in_chunks() {
        let data: Vec<u8> = (0..3 * 16 + 5).map(|i| i as u8).collect();
        let registry = registry_with(&data);
        let mut source = open_source(&registry);
        let mut out = sink();
        let mut seen = Vec::new();

        let moved = transfer(&mut source, &mut out, data.len() as u64, 16, &mut |n| seen.push(n)).unwrap();
        assert_eq!(moved, data.len() as u64);
        assert_eq!(out.data, data);
        assert_eq!(out.chunks, 4);
        assert_eq!(seen, vec![16, 16, 16, 5]);
    }

    #[test]
    fn test_zero_bytes_never_reach_the_sink() {
        let registry = registry_with(b"");
        let mut source = open_source(&registry);
        let mut out = sink();
        out.fail_after = Some(0);
        assert_eq!(transfer(&mut source, &mut out, 0, 16, &mut |_| {}).unwrap(), 0);
        assert_eq!(out.chunks, 0);
    }

    #[test]
    fn test_write_failure_stops_reader() {
        let data = vec![9u8; 100];
        let registry = registry_with(&data);
        let mut source = open_source(&registry);
        let mut out = sink();
        out.fail_after = Some(2);

        let err = transfer(&mut source, &mut out, 100, 10, &mut |_| {}).unwrap_err();
        assert_eq!(err.backend_code(), Some(0x2A802));
        assert_eq!(out.data.len(), 20);
        assert!(source.tell() < 100);
    }

    #[test]
    fn test_short_source_is_partial_transfer() {
        let registry = registry_with(b"abc");
        let mut source = open_source(&registry);
        let mut out = sink();
        let err = transfer(&mut source, &mut out, 10, 4, &mut |_| {}).unwrap_err();
        assert!(matches!(
            err,
            MirrorError::PartialTransfer {
                expected: 10,
                transferred: 3,
                ..
            }
        ));
    }
}
