//! Pure reassembly of files from an ordered frame stream.
//!
//! [`Reassembly`] owns the per-file buffer and is fed decoded frames one at a
//! time. It never trusts the sender: a binary frame must belong to an open
//! file, may not push the file past its declared size, and a file may only be
//! closed once every declared byte arrived. A batch must keep the size it
//! declared first, close each file with `file-eof`, and deliver every file
//! before `batch-eof`.

use instadropx_common::{
    ControlFrame, FileMetadata, FileProjection, progress_pct,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("received file data before any metadata")]
    ChunkWithoutMetadata,
    #[error("`{name}` overran its declared size: {received} of {size} bytes")]
    Overrun {
        name: String,
        size: u64,
        received: u64,
    },
    #[error("metadata for `{next}` arrived before `{open}` was terminated")]
    MetadataBeforeEof { open: String, next: String },
    #[error("end of file without an open file")]
    EofWithoutMetadata,
    #[error("`{name}` was terminated after {received} of {size} bytes")]
    Truncated {
        name: String,
        size: u64,
        received: u64,
    },
    #[error("expected file #{expected} of the batch, got #{got}")]
    OutOfOrder { expected: usize, got: u32 },
    #[error("batch ended while `{name}` was still open")]
    UnterminatedFile { name: String },
    #[error("`{name}` is part of a batch but does not declare its size")]
    MissingBatchSize { name: String },
    #[error("file #{index} is outside a batch of {total}")]
    IndexOutOfRange { index: u32, total: u32 },
    #[error("batch size changed from {expected} to {got}")]
    BatchSizeChanged { expected: u32, got: u32 },
    #[error("`{name}` mixes single-file and batch framing")]
    MixedFraming { name: String },
    #[error("`{name}` was closed with `{got}` instead of `{expected}`")]
    WrongTerminator {
        name: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("batch ended after {completed} of {total} files")]
    IncompleteBatch { total: u32, completed: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReassemblyStep {
    /// A new file was opened.
    Started(FileMetadata),
    Progress {
        received: u64,
        size: u64,
        progress: u8,
    },
    /// A batch file was closed (`file-eof`).
    FileCompleted(FileProjection),
    /// The session ended: `eof` carries the single file, `batch-eof` none.
    SessionCompleted(Option<FileProjection>),
    /// Frame with no effect on reassembly.
    Ignored,
}

struct OpenFile {
    metadata: FileMetadata,
    data: Vec<u8>,
}

impl OpenFile {
    fn received(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Framing fixed by the first metadata frame of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Framing {
    Single,
    Batch { total: u32 },
}

pub struct Reassembly {
    open: Option<OpenFile>,
    framing: Option<Framing>,
    completed: usize,
    preallocate_limit: usize,
}

impl Reassembly {
    pub fn new(preallocate_limit: usize) -> Self {
        Self {
            open: None,
            framing: None,
            completed: 0,
            preallocate_limit,
        }
    }

    /// Number of files closed so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Metadata of the file currently being filled.
    pub fn open_file(&self) -> Option<&FileMetadata> {
        self.open.as_ref().map(|open| &open.metadata)
    }

    pub fn on_control(
        &mut self,
        frame: ControlFrame,
    ) -> Result<ReassemblyStep, ReassemblyError> {
        match frame {
            ControlFrame::Metadata(metadata) => self.start(metadata),
            ControlFrame::Eof => {
                let file = self.close(Terminator::Eof)?;
                Ok(ReassemblyStep::SessionCompleted(Some(file)))
            }
            ControlFrame::FileEof => self
                .close(Terminator::FileEof)
                .map(ReassemblyStep::FileCompleted),
            ControlFrame::BatchEof => self.finish_batch(),
            ControlFrame::PeerConnected { .. }
            | ControlFrame::PeerDisconnected { .. }
            | ControlFrame::Error { .. } => Ok(ReassemblyStep::Ignored),
        }
    }

    pub fn on_chunk(
        &mut self,
        bytes: Vec<u8>,
    ) -> Result<ReassemblyStep, ReassemblyError> {
        let open = self
            .open
            .as_mut()
            .ok_or(ReassemblyError::ChunkWithoutMetadata)?;

        let size = open.metadata.size;
        let received = open.received() + bytes.len() as u64;
        if received > size {
            return Err(ReassemblyError::Overrun {
                name: open.metadata.name.clone(),
                size,
                received,
            });
        }

        open.data.extend_from_slice(&bytes);
        Ok(ReassemblyStep::Progress {
            received,
            size,
            progress: progress_pct(received, size),
        })
    }

    fn start(
        &mut self,
        metadata: FileMetadata,
    ) -> Result<ReassemblyStep, ReassemblyError> {
        if let Some(open) = &self.open {
            return Err(ReassemblyError::MetadataBeforeEof {
                open: open.metadata.name.clone(),
                next: metadata.name,
            });
        }
        let framing = match (metadata.index, metadata.total_count) {
            (None, _) => Framing::Single,
            (Some(_), None) => {
                return Err(ReassemblyError::MissingBatchSize {
                    name: metadata.name,
                });
            }
            (Some(index), Some(total)) => {
                if index >= total {
                    return Err(ReassemblyError::IndexOutOfRange {
                        index,
                        total,
                    });
                }
                if index as usize != self.completed {
                    return Err(ReassemblyError::OutOfOrder {
                        expected: self.completed,
                        got: index,
                    });
                }
                Framing::Batch { total }
            }
        };
        match (self.framing, framing) {
            (None, _) => self.framing = Some(framing),
            (
                Some(Framing::Batch { total: expected }),
                Framing::Batch { total: got },
            ) if expected != got => {
                return Err(ReassemblyError::BatchSizeChanged {
                    expected,
                    got,
                });
            }
            (Some(Framing::Batch { .. }), Framing::Batch { .. }) => {}
            (Some(_), _) => {
                return Err(ReassemblyError::MixedFraming {
                    name: metadata.name,
                });
            }
        }

        let capacity =
            usize::try_from(metadata.size).unwrap_or(usize::MAX);
        self.open = Some(OpenFile {
            metadata: metadata.clone(),
            data: Vec::with_capacity(capacity.min(self.preallocate_limit)),
        });
        Ok(ReassemblyStep::Started(metadata))
    }

    fn close(
        &mut self,
        terminator: Terminator,
    ) -> Result<FileProjection, ReassemblyError> {
        let open = self
            .open
            .take()
            .ok_or(ReassemblyError::EofWithoutMetadata)?;

        let expected = match open.metadata.index {
            Some(_) => Terminator::FileEof,
            None => Terminator::Eof,
        };
        if terminator != expected {
            return Err(ReassemblyError::WrongTerminator {
                name: open.metadata.name,
                expected: expected.as_str(),
                got: terminator.as_str(),
            });
        }

        if open.received() < open.metadata.size {
            return Err(ReassemblyError::Truncated {
                name: open.metadata.name,
                size: open.metadata.size,
                received: open.data.len() as u64,
            });
        }

        self.completed += 1;
        Ok(FileProjection {
            metadata: open.metadata,
            data: open.data,
        })
    }

    fn finish_batch(&self) -> Result<ReassemblyStep, ReassemblyError> {
        if let Some(open) = &self.open {
            return Err(ReassemblyError::UnterminatedFile {
                name: open.metadata.name.clone(),
            });
        }
        let total = match self.framing {
            Some(Framing::Batch { total }) => total,
            _ => 0,
        };
        if total == 0 || self.completed != total as usize {
            return Err(ReassemblyError::IncompleteBatch {
                total,
                completed: self.completed,
            });
        }
        Ok(ReassemblyStep::SessionCompleted(None))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Terminator {
    Eof,
    FileEof,
}

impl Terminator {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eof => "eof",
            Self::FileEof => "file-eof",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(size: u64) -> ControlFrame {
        ControlFrame::Metadata(FileMetadata::single(
            "doc.pdf".into(),
            size,
            "application/pdf".into(),
        ))
    }

    fn batched(name: &str, size: u64, index: u32, total: u32) -> ControlFrame {
        ControlFrame::Metadata(FileMetadata::batched(
            name.into(),
            size,
            String::new(),
            index,
            total,
        ))
    }

    fn progress(step: ReassemblyStep) -> u8 {
        match step {
            ReassemblyStep::Progress { progress, .. } => progress,
            other => panic!("expected progress, got {other:?}"),
        }
    }

    #[test]
    fn reports_rounded_progress_per_chunk() {
        let mut reassembly = Reassembly::new(1024);
        reassembly.on_control(single(40000)).unwrap();

        let steps: Vec<u8> = [16384, 16384, 7232]
            .into_iter()
            .map(|n| progress(reassembly.on_chunk(vec![0; n]).unwrap()))
            .collect();
        assert_eq!(steps, vec![41, 82, 100]);

        match reassembly.on_control(ControlFrame::Eof).unwrap() {
            ReassemblyStep::SessionCompleted(Some(file)) => {
                assert_eq!(file.name(), "doc.pdf");
                assert_eq!(file.mime_type(), "application/pdf");
                assert_eq!(file.data.len(), 40000);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn batch_files_complete_in_order() {
        let mut reassembly = Reassembly::new(1024);
        reassembly.on_control(batched("a", 2, 0, 2)).unwrap();
        reassembly.on_chunk(vec![1, 2]).unwrap();
        let first = reassembly.on_control(ControlFrame::FileEof).unwrap();
        assert!(matches!(
            first,
            ReassemblyStep::FileCompleted(ref f) if f.data == vec![1, 2]
        ));

        reassembly.on_control(batched("b", 1, 1, 2)).unwrap();
        reassembly.on_chunk(vec![3]).unwrap();
        reassembly.on_control(ControlFrame::FileEof).unwrap();

        assert_eq!(
            reassembly.on_control(ControlFrame::BatchEof).unwrap(),
            ReassemblyStep::SessionCompleted(None)
        );
        assert_eq!(reassembly.completed(), 2);
    }

    #[test]
    fn empty_file_completes_without_chunks() {
        let mut reassembly = Reassembly::new(1024);
        reassembly.on_control(single(0)).unwrap();
        assert!(matches!(
            reassembly.on_control(ControlFrame::Eof).unwrap(),
            ReassemblyStep::SessionCompleted(Some(f)) if f.data.is_empty()
        ));
    }

    #[test]
    fn rejects_chunk_without_metadata() {
        let mut reassembly = Reassembly::new(1024);
        assert_eq!(
            reassembly.on_chunk(vec![0; 4]),
            Err(ReassemblyError::ChunkWithoutMetadata)
        );
    }

    #[test]
    fn rejects_overrun() {
        let mut reassembly = Reassembly::new(1024);
        reassembly.on_control(single(10)).unwrap();
        reassembly.on_chunk(vec![0; 8]).unwrap();
        assert_eq!(
            reassembly.on_chunk(vec![0; 3]),
            Err(ReassemblyError::Overrun {
                name: "doc.pdf".into(),
                size: 10,
                received: 11,
            })
        );
    }

    #[test]
    fn rejects_metadata_before_eof() {
        let mut reassembly = Reassembly::new(1024);
        reassembly.on_control(batched("a", 5, 0, 2)).unwrap();
        assert!(matches!(
            reassembly.on_control(batched("b", 5, 1, 2)),
            Err(ReassemblyError::MetadataBeforeEof { .. })
        ));
    }

    #[test]
    fn rejects_truncated_file() {
        let mut reassembly = Reassembly::new(1024);
        reassembly.on_control(single(10)).unwrap();
        reassembly.on_chunk(vec![0; 4]).unwrap();
        assert!(matches!(
            reassembly.on_control(ControlFrame::Eof),
            Err(ReassemblyError::Truncated { received: 4, .. })
        ));
    }

    #[test]
    fn rejects_eof_without_file() {
        let mut reassembly = Reassembly::new(1024);
        assert_eq!(
            reassembly.on_control(ControlFrame::FileEof),
            Err(ReassemblyError::EofWithoutMetadata)
        );
    }

    #[test]
    fn rejects_out_of_order_batch() {
        let mut reassembly = Reassembly::new(1024);
        assert_eq!(
            reassembly.on_control(batched("b", 1, 1, 2)),
            Err(ReassemblyError::OutOfOrder {
                expected: 0,
                got: 1
            })
        );
    }

    #[test]
    fn rejects_batch_eof_with_open_file() {
        let mut reassembly = Reassembly::new(1024);
        reassembly.on_control(batched("a", 1, 0, 1)).unwrap();
        assert!(matches!(
            reassembly.on_control(ControlFrame::BatchEof),
            Err(ReassemblyError::UnterminatedFile { .. })
        ));
    }

    #[test]
    fn caps_preallocation() {
        let mut reassembly = Reassembly::new(16);
        reassembly.on_control(single(u64::MAX)).unwrap();
        reassembly.on_chunk(vec![7; 3]).unwrap();
        assert_eq!(reassembly.open_file().map(|m| m.size), Some(u64::MAX));
    }

    #[test]
    fn relay_frames_are_ignored() {
        let mut reassembly = Reassembly::new(16);
        assert_eq!(
            reassembly
                .on_control(ControlFrame::PeerConnected { client_type: None })
                .unwrap(),
            ReassemblyStep::Ignored
        );
    }

    fn complete_batch_file(reassembly: &mut Reassembly, index: u32, total: u32) {
        reassembly
            .on_control(batched("f", 1, index, total))
            .unwrap();
        reassembly.on_chunk(vec![index as u8]).unwrap();
        reassembly.on_control(ControlFrame::FileEof).unwrap();
    }

    #[test]
    fn rejects_batch_eof_before_every_file() {
        let mut reassembly = Reassembly::new(1024);
        complete_batch_file(&mut reassembly, 0, 3);
        assert_eq!(
            reassembly.on_control(ControlFrame::BatchEof),
            Err(ReassemblyError::IncompleteBatch {
                total: 3,
                completed: 1
            })
        );
    }

    #[test]
    fn rejects_batch_eof_without_files() {
        let mut reassembly = Reassembly::new(1024);
        assert_eq!(
            reassembly.on_control(ControlFrame::BatchEof),
            Err(ReassemblyError::IncompleteBatch {
                total: 0,
                completed: 0
            })
        );
    }

    #[test]
    fn rejects_index_outside_batch() {
        let mut reassembly = Reassembly::new(1024);
        complete_batch_file(&mut reassembly, 0, 1);
        assert_eq!(
            reassembly.on_control(batched("extra", 1, 1, 1)),
            Err(ReassemblyError::IndexOutOfRange { index: 1, total: 1 })
        );
    }

    #[test]
    fn rejects_changed_batch_size() {
        let mut reassembly = Reassembly::new(1024);
        complete_batch_file(&mut reassembly, 0, 3);
        assert_eq!(
            reassembly.on_control(batched("b", 1, 1, 2)),
            Err(ReassemblyError::BatchSizeChanged {
                expected: 3,
                got: 2
            })
        );
    }

    #[test]
    fn rejects_batch_index_without_size() {
        let mut metadata =
            FileMetadata::batched("a".into(), 1, String::new(), 0, 1);
        metadata.total_count = None;
        let mut reassembly = Reassembly::new(1024);
        assert!(matches!(
            reassembly.on_control(ControlFrame::Metadata(metadata)),
            Err(ReassemblyError::MissingBatchSize { .. })
        ));
    }

    #[test]
    fn rejects_single_file_inside_batch() {
        let mut reassembly = Reassembly::new(1024);
        complete_batch_file(&mut reassembly, 0, 2);
        assert!(matches!(
            reassembly.on_control(single(1)),
            Err(ReassemblyError::MixedFraming { .. })
        ));
    }

    #[test]
    fn batch_file_must_close_with_file_eof() {
        let mut reassembly = Reassembly::new(1024);
        reassembly.on_control(batched("a", 1, 0, 1)).unwrap();
        reassembly.on_chunk(vec![1]).unwrap();
        assert_eq!(
            reassembly.on_control(ControlFrame::Eof),
            Err(ReassemblyError::WrongTerminator {
                name: "a".into(),
                expected: "file-eof",
                got: "eof",
            })
        );
    }

    #[test]
    fn single_file_must_close_with_eof() {
        let mut reassembly = Reassembly::new(1024);
        reassembly.on_control(single(1)).unwrap();
        reassembly.on_chunk(vec![1]).unwrap();
        assert!(matches!(
            reassembly.on_control(ControlFrame::FileEof),
            Err(ReassemblyError::WrongTerminator {
                expected: "eof",
                got: "file-eof",
                ..
            })
        ));
    }
}
