//! Minimal models for files offered in a transfer, with a pluggable,
//! thread-safe byte source abstraction.
//!
//! This crate provides:
//! - `Data`: a trait for thread-safe, read-only, positional byte sources.
//! - `InMemoryData`: a `Data` implementation over an owned buffer.
//! - `File`: a lightweight wrapper around an `Arc<dyn Data>` with identity, a
//!   human-readable name and a MIME type.
//!
//! Example:
//! ```rust
//! use std::sync::Arc;
//! use instadrop_entities::{Data, File, InMemoryData};
//!
//! let file = File {
//!     id: "file-1".into(),
//!     name: "greeting.txt".into(),
//!     mime_type: "text/plain".into(),
//!     data: Arc::new(InMemoryData::new(b"hello".to_vec())),
//! };
//!
//! assert_eq!(file.len(), 5);
//! assert_eq!(file.data.read_slice(0, 2).unwrap(), b"he".to_vec());
//! ```

mod data;
mod file;

/// Re-export of the core data source trait and its in-memory implementation.
pub use data::{Data, InMemoryData};
/// Re-export of the file abstraction backed by `Data`.
pub use file::File;
