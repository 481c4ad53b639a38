// SPDX-License-Identifier: Apache-2.0

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// Default number of leading bytes used to identify a file.
pub const DEFAULT_FINGERPRINT_SIZE: usize = 1000;

/// A fingerprint identifies a file by the first N bytes of its content.
/// This allows tracking files even if they are renamed or moved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// The first N bytes of the file, base64 encoded when serialized
    #[serde(
        serialize_with = "serialize_bytes",
        deserialize_with = "deserialize_bytes"
    )]
    first_bytes: Vec<u8>,
}

impl Fingerprint {
    /// Create a new fingerprint from a file
    pub fn new(file: &mut File, size: usize) -> io::Result<Self> {
        let mut buf = Vec::with_capacity(size);

        // Seek to the beginning of the file
        file.seek(SeekFrom::Start(0))?;

        // A single read() may return short, so keep reading until `size` or EOF
        file.take(size as u64).read_to_end(&mut buf)?;

        Ok(Self { first_bytes: buf })
    }

    /// Create a fingerprint from raw bytes (for deserialization)
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { first_bytes: bytes }
    }

    /// Get the fingerprint bytes
    pub fn bytes(&self) -> &[u8] {
        &self.first_bytes
    }

    /// Get the length of the fingerprint
    pub fn len(&self) -> usize {
        self.first_bytes.len()
    }

    /// Check if the fingerprint is empty
    pub fn is_empty(&self) -> bool {
        self.first_bytes.is_empty()
    }

    /// Two fingerprints are equal when the shorter one is a prefix of the
    /// longer one. Empty fingerprints are never equal to anything.
    pub fn equal(&self, other: &Fingerprint) -> bool {
        let len = self.first_bytes.len().min(other.first_bytes.len());
        if len == 0 {
            return false;
        }

        self.first_bytes[..len] == other.first_bytes[..len]
    }

    /// Check if this fingerprint starts with another fingerprint.
    /// This is used to track files as they grow - a new fingerprint
    /// that starts with an old one likely represents the same file
    /// after it has grown.
    pub fn starts_with(&self, other: &Fingerprint) -> bool {
        let other_len = other.first_bytes.len();

        // Empty fingerprints never match
        if other_len == 0 {
            return false;
        }

        // If the other fingerprint is longer, it can't be a prefix
        if other_len > self.first_bytes.len() {
            return false;
        }

        self.first_bytes[..other_len] == other.first_bytes[..other_len]
    }
}

fn serialize_bytes<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

fn deserialize_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}
