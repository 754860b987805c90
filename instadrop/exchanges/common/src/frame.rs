//! Wire format of a transfer channel.
//!
//! A single ordered channel carries two kinds of messages:
//! - UTF-8 text frames holding a JSON control message, tagged by `type`.
//! - Binary frames holding raw file bytes, each at most one chunk long.
//!
//! Binary frames that follow a `metadata` control frame belong to the file it
//! describes until exactly `size` bytes have been observed; an `eof` (single
//! file) or `file-eof` (batch) control frame then closes that file. No
//! sequence numbers are carried: order is the channel's arrival order.
//!
//! Decoding happens once, at the channel boundary, through
//! [`Inbound::decode`]. Everything past that point works with the typed
//! [`ControlFrame`] enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::Role;

/// `type` tags understood by [`ControlFrame`].
const KNOWN_TYPES: [&str; 7] = [
    "peer-connected",
    "peer-disconnected",
    "metadata",
    "eof",
    "file-eof",
    "batch-eof",
    "error",
];

#[derive(Debug, Error)]
pub enum FrameError {
    /// Not JSON, not an object with a string `type`, or a known `type` whose
    /// fields do not match.
    #[error("malformed control frame: {0}")]
    Malformed(String),
    #[error("unknown control frame type `{0}`")]
    UnknownType(String),
    #[error("failed to encode control frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Descriptive header sent immediately before a file's bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    /// Exact number of payload bytes that follow.
    pub size: u64,
    #[serde(rename = "fileType", default)]
    pub mime_type: String,
    /// Zero-based position of this file in a batch.
    #[serde(
        rename = "currentIdx",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub index: Option<u32>,
    #[serde(
        rename = "totalFiles",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_count: Option<u32>,
}

impl FileMetadata {
    pub fn single(name: String, size: u64, mime_type: String) -> Self {
        Self {
            name,
            size,
            mime_type,
            index: None,
            total_count: None,
        }
    }

    pub fn batched(
        name: String,
        size: u64,
        mime_type: String,
        index: u32,
        total_count: u32,
    ) -> Self {
        Self {
            name,
            size,
            mime_type,
            index: Some(index),
            total_count: Some(total_count),
        }
    }
}

/// JSON control message exchanged on the channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlFrame {
    /// Sent by the relay when the other role joins the room.
    PeerConnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_type: Option<Role>,
    },
    /// Sent by the relay when the other role leaves the room.
    PeerDisconnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_type: Option<Role>,
    },
    Metadata(FileMetadata),
    /// Terminates the only file of a single-file session.
    Eof,
    /// Terminates one file of a batch.
    FileEof,
    /// Terminates a batch session.
    BatchEof,
    Error {
        message: String,
    },
}

impl ControlFrame {
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| FrameError::Malformed(e.to_string()))?;

        match value.get("type").and_then(Value::as_str) {
            Some(tag) if KNOWN_TYPES.contains(&tag) => {}
            Some(tag) => return Err(FrameError::UnknownType(tag.to_owned())),
            None => {
                return Err(FrameError::Malformed(
                    "missing string `type` tag".to_owned(),
                ));
            }
        }

        serde_json::from_value(value)
            .map_err(|e| FrameError::Malformed(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_frame(&self) -> Result<Frame, FrameError> {
        self.encode().map(Frame::Text)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PeerConnected { .. } => "peer-connected",
            Self::PeerDisconnected { .. } => "peer-disconnected",
            Self::Metadata(_) => "metadata",
            Self::Eof => "eof",
            Self::FileEof => "file-eof",
            Self::BatchEof => "batch-eof",
            Self::Error { .. } => "error",
        }
    }
}

/// A raw message as carried by the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Control(ControlFrame),
    Chunk(Vec<u8>),
}

impl Inbound {
    pub fn decode(frame: Frame) -> Result<Self, FrameError> {
        match frame {
            Frame::Text(text) => ControlFrame::decode(&text).map(Self::Control),
            Frame::Binary(bytes) => Ok(Self::Chunk(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn metadata_uses_wire_field_names() {
        let frame = ControlFrame::Metadata(FileMetadata::batched(
            "report.pdf".into(),
            40000,
            "application/pdf".into(),
            1,
            3,
        ));

        let value: Value =
            serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "metadata");
        assert_eq!(value["name"], "report.pdf");
        assert_eq!(value["size"], 40000);
        assert_eq!(value["fileType"], "application/pdf");
        assert_eq!(value["currentIdx"], 1);
        assert_eq!(value["totalFiles"], 3);
    }

    #[test]
    fn single_metadata_omits_batch_fields() {
        let frame = ControlFrame::Metadata(FileMetadata::single(
            "a.txt".into(),
            3,
            "text/plain".into(),
        ));
        let text = frame.encode().unwrap();
        assert!(!text.contains("currentIdx"));
        assert!(!text.contains("totalFiles"));
    }

    #[rstest]
    #[case(r#"{"type":"peer-connected"}"#, ControlFrame::PeerConnected { client_type: None })]
    #[case(
        r#"{"type":"peer-connected","client_type":"receiver"}"#,
        ControlFrame::PeerConnected { client_type: Some(Role::Receiver) }
    )]
    #[case(
        r#"{"type":"peer-disconnected","client_type":"sender"}"#,
        ControlFrame::PeerDisconnected { client_type: Some(Role::Sender) }
    )]
    #[case(r#"{"type":"eof"}"#, ControlFrame::Eof)]
    #[case(r#"{"type":"file-eof"}"#, ControlFrame::FileEof)]
    #[case(r#"{"type":"batch-eof"}"#, ControlFrame::BatchEof)]
    #[case(
        r#"{"type":"error","message":"room is full"}"#,
        ControlFrame::Error { message: "room is full".into() }
    )]
    #[case(
        r#"{"type":"metadata","name":"a.bin","size":10,"fileType":""}"#,
        ControlFrame::Metadata(FileMetadata::single("a.bin".into(), 10, String::new()))
    )]
    fn decodes_known_frames(#[case] text: &str, #[case] expected: ControlFrame) {
        assert_eq!(ControlFrame::decode(text).unwrap(), expected);
    }

    #[test]
    fn metadata_without_file_type_defaults_to_empty() {
        let frame =
            ControlFrame::decode(r#"{"type":"metadata","name":"x","size":1}"#)
                .unwrap();
        assert_eq!(
            frame,
            ControlFrame::Metadata(FileMetadata::single(
                "x".into(),
                1,
                String::new()
            ))
        );
    }

    #[rstest]
    #[case("not json")]
    #[case("42")]
    #[case(r#"{"name":"no tag"}"#)]
    #[case(r#"{"type":7}"#)]
    #[case(r#"{"type":"metadata","name":"missing size"}"#)]
    #[case(r#"{"type":"error"}"#)]
    fn rejects_malformed_frames(#[case] text: &str) {
        assert!(matches!(
            ControlFrame::decode(text),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn reports_unknown_type() {
        match ControlFrame::decode(r#"{"type":"offer","sdp":"..."}"#) {
            Err(FrameError::UnknownType(tag)) => assert_eq!(tag, "offer"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn binary_frames_are_chunks() {
        let inbound = Inbound::decode(Frame::Binary(vec![1, 2, 3])).unwrap();
        assert_eq!(inbound, Inbound::Chunk(vec![1, 2, 3]));
    }

    #[test]
    fn every_variant_roundtrips_through_its_kind() {
        let frames = [
            ControlFrame::PeerConnected { client_type: None },
            ControlFrame::PeerDisconnected { client_type: None },
            ControlFrame::Metadata(FileMetadata::single(
                "f".into(),
                0,
                String::new(),
            )),
            ControlFrame::Eof,
            ControlFrame::FileEof,
            ControlFrame::BatchEof,
            ControlFrame::Error {
                message: "x".into(),
            },
        ];
        for frame in frames {
            let value: Value =
                serde_json::from_str(&frame.encode().unwrap()).unwrap();
            assert_eq!(value["type"], frame.kind());
            assert!(KNOWN_TYPES.contains(&frame.kind()));
        }
    }
}
