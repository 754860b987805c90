//! Progress projection and reconstructed files.

use crate::FileMetadata;

/// Percentage of `size` covered by `received`, rounded to the nearest
/// integer and capped at 100. A zero-byte file is always complete.
pub fn progress_pct(received: u64, size: u64) -> u8 {
    if size == 0 {
        return 100;
    }
    let pct = (received as f64 / size as f64 * 100.0).round();
    pct.min(100.0) as u8
}

/// A file rebuilt from its metadata and the binary frames that followed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileProjection {
    pub metadata: FileMetadata,
    pub data: Vec<u8>,
}

impl FileProjection {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn mime_type(&self) -> &str {
        &self.metadata.mime_type
    }
}
