//! Scalar JSON key-value persistence.
//!
//! Single-key writes only; callers must not assume atomicity across keys.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::ClientResult;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> ClientResult<Option<Value>>;
    fn set(&self, key: &str, value: &Value) -> ClientResult<()>;
}

/// Durable store backed by a sled tree.
#[derive(Debug)]
pub struct SledStore {
    db: sled::Db,
    values: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> ClientResult<Self> {
        let db = sled::open(path)?;
        let values = db.open_tree("kv")?;
        Ok(Self { db, values })
    }

    pub fn flush(&self) -> ClientResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> ClientResult<Option<Value>> {
        Ok(self
            .values
            .get(key.as_bytes())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    fn set(&self, key: &str, value: &Value) -> ClientResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.values.insert(key.as_bytes(), bytes)?;
        // Secrets must be on disk before the matching action is submitted.
        self.flush()
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> ClientResult<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> ClientResult<()> {
        self.values.lock().insert(key.to_string(), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sled_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.set("a", &json!({"x": 1})).unwrap();
        }
        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!({"x": 1})));
        assert_eq!(store.get("b").unwrap(), None);
    }

    #[test]
    fn memory_store_overwrites() {
        let store = MemoryStore::new();
        store.set("k", &json!(1)).unwrap();
        store.set("k", &json!(2)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!(2)));
        assert_eq!(store.len(), 1);
    }
}
