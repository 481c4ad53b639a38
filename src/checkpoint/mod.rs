// SPDX-License-Identifier: Apache-2.0

//! Durable reader checkpoints.
//!
//! The metadata of every reader from the last completed poll cycle is stored
//! under [`KNOWN_FILES_KEY`] as one versioned JSON document, written with a
//! single `set` call.

mod schema;

pub use schema::{KNOWN_FILES_KEY, PERSISTED_STATE_VERSION, PersistedStateV1};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::persistence::Persister;
use crate::reader::Metadata;
use schema::PersistedEntryLegacy;

#[derive(Serialize)]
struct PersistedStateRef<'a> {
    version: u8,
    files: &'a [Metadata],
}

/// Save the given reader metadata, replacing the previous checkpoint
pub fn save(persister: &dyn Persister, files: &[Metadata]) -> Result<()> {
    let state = PersistedStateRef {
        version: PERSISTED_STATE_VERSION,
        files,
    };
    let bytes = serde_json::to_vec(&state)?;
    persister.set(KNOWN_FILES_KEY, bytes)?;

    debug!(count = files.len(), "Saved checkpoint");
    Ok(())
}

/// Load the last saved reader metadata. Returns an empty list when nothing
/// was saved yet; unreadable content is an error.
pub fn load(persister: &dyn Persister) -> Result<Vec<Metadata>> {
    let bytes = match persister.get(KNOWN_FILES_KEY)? {
        Some(b) => b,
        None => return Ok(Vec::new()),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value @ Value::Object(_)) => load_v1(value),
        _ => load_legacy(&bytes),
    }
}

fn load_v1(value: Value) -> Result<Vec<Metadata>> {
    let state: PersistedStateV1 = serde_json::from_value(value)
        .map_err(|e| Error::Persistence(format!("invalid checkpoint document: {}", e)))?;

    if state.version != PERSISTED_STATE_VERSION {
        return Err(Error::Persistence(format!(
            "unsupported checkpoint version {}",
            state.version
        )));
    }

    Ok(state.files)
}

fn load_legacy(bytes: &[u8]) -> Result<Vec<Metadata>> {
    let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<Value>();

    let count = match stream.next() {
        Some(Ok(Value::Number(n))) => n.as_u64().ok_or_else(|| {
            Error::Persistence(format!("invalid legacy checkpoint entry count: {}", n))
        })?,
        Some(Err(e)) => {
            return Err(Error::Persistence(format!("corrupt checkpoint: {}", e)));
        }
        _ => {
            return Err(Error::Persistence(
                "checkpoint is neither a versioned document nor a legacy stream".to_string(),
            ));
        }
    };

    let mut files = Vec::new();
    for i in 0..count {
        let value = stream
            .next()
            .ok_or_else(|| {
                Error::Persistence(format!(
                    "legacy checkpoint ended after {} of {} entries",
                    i, count
                ))
            })?
            .map_err(|e| Error::Persistence(format!("corrupt legacy checkpoint entry: {}", e)))?;

        let entry: PersistedEntryLegacy = serde_json::from_value(value)
            .map_err(|e| Error::Persistence(format!("invalid legacy checkpoint entry: {}", e)))?;
        files.push(entry.into());
    }

    info!(count = files.len(), "Migrated legacy checkpoint format");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::persistence::{JsonFileDatabase, MockPersister};
    use std::collections::HashMap;

    fn metadata(bytes: &[u8], offset: u64) -> Metadata {
        Metadata {
            fingerprint: Fingerprint::from_bytes(bytes.to_vec()),
            offset,
            file_attributes: HashMap::from([("log.file.name".to_string(), "a.log".to_string())]),
        }
    }

    #[test]
    fn test_load_empty() {
        let persister = MockPersister::new();
        assert!(load(&persister).unwrap().is_empty());

        persister.set(KNOWN_FILES_KEY, b"  \n".to_vec()).unwrap();
        assert!(load(&persister).unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let persister = MockPersister::new();
        let files = vec![metadata(b"first", 10), metadata(b"second", 20)];

        save(&persister, &files).unwrap();
        assert_eq!(load(&persister).unwrap(), files);

        // the latest save replaces the previous one
        save(&persister, &files[1..]).unwrap();
        assert_eq!(load(&persister).unwrap(), files[1..].to_vec());
    }

    #[test]
    fn test_save_writes_versioned_document() {
        let persister = MockPersister::new();
        save(&persister, &[metadata(b"hello", 5)]).unwrap();

        let value: Value = serde_json::from_slice(&persister.raw(KNOWN_FILES_KEY).unwrap()).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["files"][0]["offset"], 5);
        assert_eq!(value["files"][0]["fingerprint"]["first_bytes"], "aGVsbG8=");
    }

    #[test]
    fn test_save_and_load_through_json_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("checkpoints.json");
        let files = vec![metadata(b"hello", 5)];

        {
            let db = JsonFileDatabase::open(&db_path).unwrap();
            save(&db.persister("consumer"), &files).unwrap();
        }

        let db = JsonFileDatabase::open(&db_path).unwrap();
        assert_eq!(load(&db.persister("consumer")).unwrap(), files);
    }

    #[test]
    fn test_load_legacy_stream() {
        let persister = MockPersister::new();
        let legacy = concat!(
            "2\n",
            r#"{"Fingerprint":{"first_bytes":"Zmlyc3Q="},"Offset":10,"FileAttributes":{"log.file.name":"a.log"}}"#,
            "\n",
            r#"{"Fingerprint":{"first_bytes":"c2Vjb25k"},"Offset":20,"FileAttributes":{}}"#,
            "\n"
        );
        persister.set(KNOWN_FILES_KEY, legacy.as_bytes().to_vec()).unwrap();

        let files = load(&persister).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0], metadata(b"first", 10));
        assert_eq!(files[1].fingerprint.bytes(), b"second");
        assert_eq!(files[1].offset, 20);
    }

    #[test]
    fn test_load_legacy_stream_zero_entries() {
        let persister = MockPersister::new();
        persister.set(KNOWN_FILES_KEY, b"0\n".to_vec()).unwrap();
        assert!(load(&persister).unwrap().is_empty());
    }

    #[test]
    fn test_load_truncated_legacy_stream_is_error() {
        let persister = MockPersister::new();
        let legacy = concat!(
            "2\n",
            r#"{"Fingerprint":{"first_bytes":"Zmlyc3Q="},"Offset":10}"#
        );
        persister.set(KNOWN_FILES_KEY, legacy.as_bytes().to_vec()).unwrap();
        assert!(matches!(load(&persister), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_load_corrupt_is_error() {
        let persister = MockPersister::new();
        persister.set(KNOWN_FILES_KEY, b"{ definitely not".to_vec()).unwrap();
        assert!(matches!(load(&persister), Err(Error::Persistence(_))));

        persister.set(KNOWN_FILES_KEY, br#"{"version":7,"files":[]}"#.to_vec()).unwrap();
        assert!(matches!(load(&persister), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_load_propagates_persister_errors() {
        let persister = MockPersister::new();
        persister.fail_get(true);
        assert!(load(&persister).is_err());

        persister.fail_get(false);
        persister.fail_set(true);
        assert!(save(&persister, &[metadata(b"x", 1)]).is_err());
    }
}
