use std::{
    fs,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use instadrop_entities::Data;

/// `Data` backed by a file on disk. Every read opens the file anew, so one
/// instance can be shared across sessions.
#[derive(Clone, Debug)]
pub struct FileData {
    path: PathBuf,
    len: u64,
}

impl FileData {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = fs::metadata(&path).with_context(|| {
            format!("Failed to read metadata for {}", path.display())
        })?;
        if !metadata.is_file() {
            anyhow::bail!("{} is not a regular file", path.display());
        }

        Ok(Self {
            path,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name, or the full path when it has none.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

impl Data for FileData {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_slice(&self, offset: u64, size: u64) -> io::Result<Vec<u8>> {
        if offset >= self.len {
            return Ok(Vec::new());
        }
        let size = size.min(self.len - offset);

        let mut file = fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(size as usize);
        file.take(size).read_to_end(&mut buf)?;
        Ok(buf)
    }
}
