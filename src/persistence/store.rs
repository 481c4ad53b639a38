// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Scoped key/value storage for checkpoints
pub trait Persister: Send + Sync {
    /// Get the value stored under `key`, None if nothing was stored
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
}

/// JSON helpers on top of any [`Persister`]
pub trait PersisterExt: Persister {
    /// Returns Ok(None) if the key doesn't exist, Err if it exists but does
    /// not deserialize into `T`.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes)
    }
}

impl<P: Persister + ?Sized> PersisterExt for P {}

/// Mock persister for testing
#[cfg(test)]
pub struct MockPersister {
    data: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
    fail_get: std::sync::atomic::AtomicBool,
    fail_set: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MockPersister {
    /// Create an empty mock persister
    pub fn new() -> Self {
        Self {
            data: std::sync::Mutex::new(std::collections::HashMap::new()),
            fail_get: std::sync::atomic::AtomicBool::new(false),
            fail_set: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Make every `get` fail
    pub fn fail_get(&self, fail: bool) {
        self.fail_get
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Make every `set` fail
    pub fn fail_set(&self, fail: bool) {
        self.fail_set
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Raw bytes stored under `key`
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(key).cloned()
    }
}

#[cfg(test)]
impl Persister for MockPersister {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.fail_get.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::error::Error::Persistence("mock get failure".to_string()));
        }
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if self.fail_set.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::error::Error::Persistence("mock set failure".to_string()));
        }
        self.data.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
}
