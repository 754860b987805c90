mod chunk_reader;
mod send_files;

use instadrop_entities::Data;
use instadropx_common::{
    BACKPRESSURE_DELAY, BACKPRESSURE_THRESHOLD, CHUNK_SIZE, CLOSE_GRACE,
};
use std::{sync::Arc, time::Duration};

pub use chunk_reader::ChunkReader;
pub use send_files::*;

pub struct SenderFile {
    pub name: String,
    pub mime_type: String,
    pub data: Arc<dyn Data>,
}

/// Framing convention of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferMode {
    /// One file, terminated by `eof`.
    Single,
    /// Ordered files, each terminated by `file-eof`, then `batch-eof`.
    Batch,
}

impl TransferMode {
    pub fn for_files(count: usize) -> Self {
        if count == 1 { Self::Single } else { Self::Batch }
    }
}

#[derive(Clone, Debug)]
pub struct SenderConfig {
    pub chunk_size: usize,
    pub backpressure_threshold: u64,
    pub backpressure_delay: Duration,
    pub close_grace: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            backpressure_threshold: BACKPRESSURE_THRESHOLD,
            backpressure_delay: BACKPRESSURE_DELAY,
            close_grace: CLOSE_GRACE,
        }
    }
}
