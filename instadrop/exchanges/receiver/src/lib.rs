//! Receive-side library for drop transfers.
//!
//! This crate joins a room as the receiver and rebuilds the files a sender
//! streams through the relay. It exposes:
//! - `Reassembly`: the pure, bounds-checked reassembly machine.
//! - Receiver configuration.
//! - Events and subscription mechanisms (see `receive_files` module) to observe
//!   connection, per-chunk progress and completed files.
//!
//! Typical flow:
//! 1. Build a `ReceiveFilesRequest` with the room code and relay endpoint.
//! 2. Call `receive_files` to obtain a `ReceiveFilesBubble`.
//! 3. Subscribe to events to observe progress.
//! 4. Await `ReceiveFilesBubble::wait()` and collect `files()`.
//! 5. Optionally cancel with `ReceiveFilesBubble::cancel()`.

mod reassembly;
mod receive_files;

pub use reassembly::{Reassembly, ReassemblyError, ReassemblyStep};
pub use receive_files::*;

/// Tunable settings for a receiving session.
#[derive(Clone, Debug)]
pub struct ReceiverConfig {
    /// Upper bound on the buffer reserved up front from a file's declared
    /// size. Larger files still grow past it as bytes arrive.
    pub preallocate_limit: usize,
}

impl Default for ReceiverConfig {
    /// 64 MiB of up-front reservation.
    fn default() -> Self {
        Self {
            preallocate_limit: 64 * 1024 * 1024,
        }
    }
}
