// SPDX-License-Identifier: Apache-2.0

//! Persistence for storing reader checkpoints.
//!
//! A [`Persister`] is a scoped key/value store. The JSON file database keeps
//! every scope in one document and replaces it atomically on each write.

mod json_file;
mod store;

pub use json_file::{JsonFileDatabase, JsonFilePersister};
#[cfg(test)]
pub use store::MockPersister;
pub use store::{Persister, PersisterExt};
