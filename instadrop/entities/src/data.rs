//! Core data abstraction for byte-oriented, read-only sources.
//!
//! This module defines the `Data` trait, which models a thread-safe source of
//! bytes with a fixed length that can be sliced at arbitrary offsets. Typical
//! implementors include in-memory buffers and files on disk.
//!
//! Reads are positional rather than cursor based: the caller owns the offset,
//! so a single source can be streamed from the start again without any reset
//! step.

use std::io;

/// A thread-safe, positional source of bytes.
///
/// Implementors must be `Send + Sync` so instances can be shared behind an
/// `Arc` and handed to blocking worker threads.
///
/// Contract:
/// - `len()` returns the total length of the underlying data in bytes. It
///   must not change over the lifetime of the object.
/// - `read_slice(offset, size)` returns up to `size` bytes starting at
///   `offset`. It returns fewer bytes only when the end of the data is
///   reached, and an empty `Vec` when `offset >= len()`.
pub trait Data: Send + Sync {
    /// Total length of the data in bytes.
    fn len(&self) -> u64;

    /// Checks if the data is empty (length is 0).
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads up to `size` bytes starting at `offset`.
    ///
    /// This call may block (e.g. on disk I/O); async callers should run it on
    /// a blocking pool.
    fn read_slice(&self, offset: u64, size: u64) -> io::Result<Vec<u8>>;
}

/// `Data` backed by an owned byte buffer.
#[derive(Clone, Debug, Default)]
pub struct InMemoryData {
    buf: Vec<u8>,
}

impl InMemoryData {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { buf: bytes.into() }
    }
}

impl Data for InMemoryData {
    fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    fn read_slice(&self, offset: u64, size: u64) -> io::Result<Vec<u8>> {
        let len = self.buf.len() as u64;
        if offset >= len {
            return Ok(Vec::new());
        }
        let end = offset.saturating_add(size).min(len);
        Ok(self.buf[offset as usize..end as usize].to_vec())
    }
}
