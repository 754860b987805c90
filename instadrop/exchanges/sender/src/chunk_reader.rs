use std::{io, sync::Arc};

use instadrop_entities::Data;

/// Sequential, lazy reader producing a file's bytes one chunk at a time.
///
/// Each slice is read on the blocking pool and the returned future only
/// resolves once the slice is in memory, so a single reader never has two
/// reads in flight.
pub struct ChunkReader {
    data: Arc<dyn Data>,
    len: u64,
    offset: u64,
    chunk_size: u64,
}

impl ChunkReader {
    pub fn new(data: Arc<dyn Data>, chunk_size: usize) -> Self {
        let len = data.len();
        Self {
            data,
            len,
            offset: 0,
            chunk_size: chunk_size.max(1) as u64,
        }
    }

    /// Bytes emitted so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> u64 {
        self.len - self.offset
    }

    /// Next chunk, or `None` once every declared byte has been emitted.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.offset >= self.len {
            return Ok(None);
        }

        let size = self.chunk_size.min(self.remaining());
        let data = self.data.clone();
        let offset = self.offset;
        let chunk = tokio::task::spawn_blocking(move || {
            data.read_slice(offset, size)
        })
        .await
        .map_err(io::Error::other)??;

        if chunk.len() as u64 != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "expected {size} bytes at offset {offset}, read {}",
                    chunk.len()
                ),
            ));
        }

        self.offset += size;
        Ok(Some(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use instadrop_entities::InMemoryData;
    use rstest::rstest;

    fn reader(len: usize, chunk_size: usize) -> ChunkReader {
        let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        ChunkReader::new(Arc::new(InMemoryData::new(bytes)), chunk_size)
    }

    async fn drain(reader: &mut ChunkReader) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn splits_forty_thousand_bytes() {
        let mut reader = reader(40000, 16384);
        let sizes: Vec<usize> =
            drain(&mut reader).await.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![16384, 16384, 7232]);
        assert_eq!(reader.offset(), 40000);
        assert_eq!(reader.remaining(), 0);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(16383)]
    #[case(16384)]
    #[case(16385)]
    #[case(100_000)]
    #[tokio::test]
    async fn emits_ceil_of_size_over_chunk(#[case] len: usize) {
        let mut reader = reader(len, 16384);
        let chunks = drain(&mut reader).await;

        assert_eq!(chunks.len(), len.div_ceil(16384));
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), len);
        assert!(chunks.iter().all(|c| c.len() <= 16384 && !c.is_empty()));
    }

    #[tokio::test]
    async fn preserves_byte_order() {
        let mut reader = reader(50000, 16384);
        let joined: Vec<u8> = drain(&mut reader).await.concat();
        let expected: Vec<u8> = (0..50000).map(|i| (i % 251) as u8).collect();
        assert_eq!(joined, expected);
    }

    struct ShortData;

    impl Data for ShortData {
        fn len(&self) -> u64 {
            10
        }

        fn read_slice(&self, _offset: u64, _size: u64) -> io::Result<Vec<u8>> {
            Ok(vec![0; 4])
        }
    }

    #[tokio::test]
    async fn short_reads_are_errors() {
        let mut reader = ChunkReader::new(Arc::new(ShortData), 16384);
        let err = reader.next_chunk().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
