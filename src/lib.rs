// SPDX-License-Identifier: Apache-2.0

//! File consumer for tailing log files.
//!
//! Finds files matching glob patterns, reads new lines as they are appended,
//! and hands them to an [`Emitter`] in batches.
//!
//! Features:
//! - Content fingerprints to follow files across renames and rotations
//! - Draining of files rotated away between two polls
//! - Bounded concurrency with batched, parallel reads
//! - Checkpoints for resume after restarts
//! - Optional ranking of matched files by values in their names

pub mod bounded_channel;
pub mod checkpoint;
pub mod config;
pub mod emit;
pub mod error;
pub mod file_id;
pub mod finder;
pub mod fingerprint;
pub mod manager;
pub mod persistence;
pub mod reader;

pub use config::{FileConsumerConfig, StartAt};
pub use emit::{ChannelEmitter, EmitBatch, Emitter, LineOffset, LogLine};
pub use error::{Error, Result};
pub use file_id::FileId;
pub use finder::{FileFinder, OrderingCriteria, SortRule};
pub use fingerprint::Fingerprint;
pub use manager::{Manager, ManagerState, PollSettings};
pub use persistence::{JsonFileDatabase, JsonFilePersister, Persister, PersisterExt};
pub use reader::{FileReader, Metadata, ReaderFactory};
