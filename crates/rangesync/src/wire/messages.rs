//! Messages exchanged between peers during a file transfer.
use std::fmt;

use speedy::{Readable, Writable};

use crate::{parts::PartState, range::Range};

/// Identifies a file inside a synchronized folder.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Readable, Writable)]
pub struct FileId(pub String);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// The state of a part of a file, as told to another peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Readable, Writable)]
pub struct PartRecord {
    pub range: Range,
    pub state: PartState,
}

#[derive(Clone, Debug, PartialEq, Readable, Writable)]
pub enum TransferMessage {
    /// Ask a source for the bytes of `range`.
    RequestPart { file: FileId, range: Range },
    /// Bytes of a file, starting at `offset`.
    FileChunk { file: FileId, offset: u64, data: Vec<u8> },
    /// What the sender knows about the parts of a file.
    PartStates { file: FileId, parts: Vec<PartRecord> },
    /// The downloader doesn't want any more parts of the file.
    StopUpload { file: FileId },
}

impl TransferMessage {
    pub fn file(&self) -> &FileId {
        match self {
            TransferMessage::RequestPart { file, .. }
            | TransferMessage::FileChunk { file, .. }
            | TransferMessage::PartStates { file, .. }
            | TransferMessage::StopUpload { file } => file,
        }
    }

    /// The range of the file this message is about, if any.
    pub fn range(&self) -> Option<Range> {
        match self {
            TransferMessage::RequestPart { range, .. } => Some(*range),
            TransferMessage::FileChunk { offset, data, .. } => {
                Some(Range::by_length(*offset, data.len() as u64))
            }
            _ => None,
        }
    }
}
