// SPDX-License-Identifier: Apache-2.0

//! Persistence schema definitions for checkpoints.
//!
//! Currently supports:
//! - legacy: a JSON stream holding a count followed by that many entries
//!   with capitalised field names (no version field)
//! - v1: a single JSON document with a version field

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize};

use crate::fingerprint::Fingerprint;
use crate::reader::Metadata;

/// Key used to store known files state in the persister
pub const KNOWN_FILES_KEY: &str = "knownFiles";

/// Current schema version for persisted state
pub const PERSISTED_STATE_VERSION: u8 = 1;

/// Persisted state for all known files (v1)
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStateV1 {
    /// Schema version (always 1 for this format)
    pub version: u8,
    pub files: Vec<Metadata>,
}

impl Default for PersistedStateV1 {
    fn default() -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            files: Vec::new(),
        }
    }
}

/// Legacy persisted entry for a single file
#[derive(Debug, Deserialize)]
pub struct PersistedEntryLegacy {
    #[serde(rename = "Fingerprint")]
    pub fingerprint: LegacyFingerprint,
    #[serde(rename = "Offset", default)]
    pub offset: u64,
    #[serde(rename = "FileAttributes", default, deserialize_with = "string_attributes")]
    pub file_attributes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyFingerprint {
    #[serde(alias = "FirstBytes", deserialize_with = "legacy_bytes")]
    pub first_bytes: Vec<u8>,
}

impl From<PersistedEntryLegacy> for Metadata {
    fn from(entry: PersistedEntryLegacy) -> Self {
        Metadata {
            fingerprint: Fingerprint::from_bytes(entry.fingerprint.first_bytes),
            offset: entry.offset,
            file_attributes: entry.file_attributes,
        }
    }
}

// Empty byte slices were written as null
fn legacy_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(encoded) => STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom),
    }
}

// Attribute values were arbitrary JSON; only strings are kept
fn string_attributes<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<HashMap<String, String>, D::Error> {
    let raw = Option::<HashMap<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k, s)),
            _ => None,
        })
        .collect())
}
