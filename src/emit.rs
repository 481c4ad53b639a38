// SPDX-License-Identifier: Apache-2.0

//! Downstream delivery of framed records.
//!
//! Readers hand each batch of records to an [`Emitter`] together with a
//! snapshot of their metadata. A reader only advances its offset once the
//! emitter accepted the batch, so a failed emit is re-read on the next cycle.

use std::path::PathBuf;

use crate::bounded_channel::BoundedSender;
use crate::error::{Error, Result};
use crate::reader::Metadata;

/// Represents a line's position in a file.
///
/// The offset is the byte position where the line BEGINS, and len is the
/// total bytes consumed (including the newline). The resume position after
/// this line is `offset + len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOffset {
    /// Byte position where the line begins
    pub offset: u64,
    /// Length of the line in bytes (including newline)
    pub len: u32,
}

impl LineOffset {
    pub fn new(offset: u64, len: u32) -> Self {
        Self { offset, len }
    }

    /// Get the ending byte position (offset + len)
    pub fn end_offset(&self) -> u64 {
        self.offset + self.len as u64
    }
}

/// A single framed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub body: String,
    pub offset: LineOffset,
}

/// Records read from one file in one go
#[derive(Debug, Clone)]
pub struct EmitBatch {
    pub path: PathBuf,
    pub lines: Vec<LogLine>,
    /// Reader metadata at the time of the emit; the offset is the position
    /// before these lines.
    pub metadata: Metadata,
}

impl EmitBatch {
    /// Offset just past the last record in the batch
    pub fn end_offset(&self) -> Option<u64> {
        self.lines.last().map(|l| l.offset.end_offset())
    }
}

/// Consumer of framed records. Called from blocking reader tasks.
pub trait Emitter: Send + Sync {
    fn emit(&self, batch: EmitBatch) -> Result<()>;
}

/// Emitter that forwards batches into a bounded channel, blocking while the
/// channel is full.
#[derive(Clone)]
pub struct ChannelEmitter {
    tx: BoundedSender<EmitBatch>,
}

impl ChannelEmitter {
    pub fn new(tx: BoundedSender<EmitBatch>) -> Self {
        Self { tx }
    }
}

impl Emitter for ChannelEmitter {
    fn emit(&self, batch: EmitBatch) -> Result<()> {
        self.tx.send_blocking(batch).map_err(|_| Error::ChannelSend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::bounded;
    use crate::fingerprint::Fingerprint;
    use std::collections::HashMap;

    fn batch(lines: &[(&str, u64)]) -> EmitBatch {
        EmitBatch {
            path: PathBuf::from("/var/log/app.log"),
            lines: lines
                .iter()
                .map(|(body, offset)| LogLine {
                    body: body.to_string(),
                    offset: LineOffset::new(*offset, body.len() as u32 + 1),
                })
                .collect(),
            metadata: Metadata {
                fingerprint: Fingerprint::from_bytes(b"line".to_vec()),
                offset: 0,
                file_attributes: HashMap::new(),
            },
        }
    }

    #[test]
    fn test_line_offset_end() {
        let offset = LineOffset::new(100, 25);
        assert_eq!(offset.end_offset(), 125);
    }

    #[test]
    fn test_batch_end_offset() {
        assert_eq!(batch(&[]).end_offset(), None);
        assert_eq!(batch(&[("one", 0), ("two", 4)]).end_offset(), Some(8));
    }

    #[test]
    fn test_channel_emitter_forwards() {
        let (tx, rx) = bounded(4);
        let emitter = ChannelEmitter::new(tx);

        emitter.emit(batch(&[("one", 0)])).unwrap();
        let received = rx.try_recv().unwrap();
        assert_eq!(received.lines[0].body, "one");
        assert_eq!(received.path, PathBuf::from("/var/log/app.log"));
    }

    #[test]
    fn test_channel_emitter_disconnected() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let emitter = ChannelEmitter::new(tx);

        let result = emitter.emit(batch(&[("one", 0)]));
        assert!(matches!(result, Err(Error::ChannelSend)));
    }
}
