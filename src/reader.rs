// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::emit::{EmitBatch, Emitter, LineOffset, LogLine};
use crate::error::Result;
use crate::fingerprint::Fingerprint;

/// Attribute holding the base name of the file a record came from
pub const FILE_NAME_ATTRIBUTE: &str = "log.file.name";
/// Attribute holding the full path of the file a record came from
pub const FILE_PATH_ATTRIBUTE: &str = "log.file.path";

/// Persisted state of a single reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Fingerprint for identifying this file
    pub fingerprint: Fingerprint,
    /// Byte offset of the first unconsumed byte
    pub offset: u64,
    /// Attributes attached to every record from this file
    #[serde(default)]
    pub file_attributes: HashMap<String, String>,
}

/// FileReader tails a single file from its saved offset
pub struct FileReader {
    /// Path the file was found at
    path: PathBuf,
    /// The open file handle, None once closed or for placeholders
    file: Option<File>,
    metadata: Metadata,
    /// Maximum size of a single record
    max_log_size: usize,
    /// Maximum number of records per emitted batch
    emit_batch_size: usize,
}

impl FileReader {
    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the file name
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Get the current fingerprint
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.metadata.fingerprint
    }

    /// Get the current offset
    pub fn offset(&self) -> u64 {
        self.metadata.offset
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn file(&self) -> Option<&File> {
        self.file.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Read every complete record from the current offset to EOF and hand
    /// them to the emitter in batches. A trailing line without a newline is
    /// left for the next call. The offset only moves past records that were
    /// accepted by the emitter.
    pub fn read_to_end(&mut self, emitter: &dyn Emitter, cancel: &CancellationToken) -> Result<()> {
        let mut file = match self.file.take() {
            Some(f) => f,
            None => return Ok(()),
        };

        let result = self.read_from(&mut file, emitter, cancel);
        self.file = Some(file);
        result
    }

    fn read_from(
        &mut self,
        file: &mut File,
        emitter: &dyn Emitter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let len = file.metadata()?.len();
        if len < self.metadata.offset {
            warn!(
                path = ?self.path,
                offset = self.metadata.offset,
                len,
                "File is shorter than the saved offset, reading from the beginning"
            );
            self.metadata.offset = 0;
        }

        file.seek(SeekFrom::Start(self.metadata.offset))?;
        let mut reader = BufReader::new(file);

        let mut buf = Vec::new();
        let mut pending = Vec::with_capacity(self.emit_batch_size);
        let mut position = self.metadata.offset;

        loop {
            if cancel.is_cancelled() {
                debug!(path = ?self.path, offset = self.metadata.offset, "Read cancelled");
                return Ok(());
            }

            buf.clear();
            let consumed = match next_record(&mut reader, &mut buf, self.max_log_size)? {
                Some(n) => n,
                None => break,
            };

            let len = u32::try_from(consumed).unwrap_or(u32::MAX);
            let line_offset = LineOffset::new(position, len);
            position += consumed as u64;

            // Blank lines move the offset but produce no record
            if !buf.is_empty() {
                pending.push(LogLine {
                    body: String::from_utf8_lossy(&buf).into_owned(),
                    offset: line_offset,
                });
            }

            if pending.len() >= self.emit_batch_size {
                self.flush(emitter, &mut pending, position)?;
            }
        }

        self.flush(emitter, &mut pending, position)
    }

    fn flush(&mut self, emitter: &dyn Emitter, pending: &mut Vec<LogLine>, end: u64) -> Result<()> {
        if !pending.is_empty() {
            let batch = EmitBatch {
                path: self.path.clone(),
                lines: std::mem::take(pending),
                metadata: self.metadata.clone(),
            };
            emitter.emit(batch)?;
        }
        self.metadata.offset = end;
        Ok(())
    }

    /// Close the file handle
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(path = ?self.path, offset = self.metadata.offset, "Closed file reader");
        }
    }
}

impl Drop for FileReader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read one record into `buf`, without its line terminator. Returns the
/// number of bytes the record spans in the file, or None when only an
/// incomplete line (or nothing) is left. Records longer than `max_log_size`
/// are cut into `max_log_size` chunks.
fn next_record<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_log_size: usize,
) -> io::Result<Option<usize>> {
    let mut consumed = 0;

    loop {
        let available = match reader.fill_buf() {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok(None);
        }

        let room = max_log_size.saturating_sub(buf.len());
        let window = &available[..available.len().min(room)];

        match window.iter().position(|b| *b == b'\n') {
            Some(i) => {
                buf.extend_from_slice(&window[..i]);
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                reader.consume(i + 1);
                return Ok(Some(consumed + i + 1));
            }
            None => {
                let n = window.len();
                buf.extend_from_slice(window);
                reader.consume(n);
                consumed += n;
                if buf.len() >= max_log_size {
                    // A CRLF split by the limit still ends this chunk
                    if buf.last() == Some(&b'\r') {
                        match peek_byte(reader)? {
                            Some(b'\n') => {
                                buf.pop();
                                reader.consume(1);
                                return Ok(Some(consumed + 1));
                            }
                            None => return Ok(None),
                            Some(_) => {}
                        }
                    }
                    return Ok(Some(consumed));
                }
            }
        }
    }
}

fn peek_byte<R: BufRead>(reader: &mut R) -> io::Result<Option<u8>> {
    loop {
        match reader.fill_buf() {
            Ok(b) => return Ok(b.first().copied()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Builds readers with a shared set of limits and the current start policy.
#[derive(Debug, Clone)]
pub struct ReaderFactory {
    pub fingerprint_size: usize,
    pub max_log_size: usize,
    pub emit_batch_size: usize,
    pub include_file_name: bool,
    pub include_file_path: bool,
    /// New files start at offset 0 when set, otherwise at their current end
    pub from_beginning: bool,
}

impl ReaderFactory {
    /// Reader for a file not seen before
    pub fn new_reader(&self, file: File, fingerprint: Fingerprint, path: &Path) -> io::Result<FileReader> {
        let offset = if self.from_beginning {
            0
        } else {
            file.metadata()?.len()
        };

        let metadata = Metadata {
            fingerprint,
            offset,
            file_attributes: HashMap::new(),
        };
        Ok(self.build(path, Some(file), metadata))
    }

    /// Continue a known file: keeps the old offset and attributes, adopts
    /// the new fingerprint (which extends the old one) and the current path.
    pub fn copy(&self, old: &Metadata, file: File, fingerprint: Fingerprint, path: &Path) -> FileReader {
        let metadata = Metadata {
            fingerprint,
            offset: old.offset,
            file_attributes: old.file_attributes.clone(),
        };
        self.build(path, Some(file), metadata)
    }

    /// Handle-less reader restored from a checkpoint. It only serves as a
    /// match candidate until the file is seen again.
    pub fn placeholder(&self, metadata: Metadata) -> FileReader {
        let path = metadata
            .file_attributes
            .get(FILE_PATH_ATTRIBUTE)
            .or_else(|| metadata.file_attributes.get(FILE_NAME_ATTRIBUTE))
            .map(PathBuf::from)
            .unwrap_or_default();

        FileReader {
            path,
            file: None,
            metadata,
            max_log_size: self.max_log_size.max(1),
            emit_batch_size: self.emit_batch_size.max(1),
        }
    }

    fn build(&self, path: &Path, file: Option<File>, mut metadata: Metadata) -> FileReader {
        if self.include_file_name {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                metadata
                    .file_attributes
                    .insert(FILE_NAME_ATTRIBUTE.to_string(), name.to_string());
            }
        }
        if self.include_file_path {
            metadata.file_attributes.insert(
                FILE_PATH_ATTRIBUTE.to_string(),
                path.to_string_lossy().into_owned(),
            );
        }

        FileReader {
            path: path.to_path_buf(),
            file,
            metadata,
            max_log_size: self.max_log_size.max(1),
            emit_batch_size: self.emit_batch_size.max(1),
        }
    }
}
