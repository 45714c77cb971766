//! Plaintext recovery for published commitments.
//!
//! Entries are namespaced by `(account, contract)` and never expire. The
//! coordinator writes an entry before the action that publishes its
//! commitment is submitted, so a crash between the two never strands a
//! commitment we cannot open.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shroud_crypto::{Commitment, Salt};
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::kv::{KeyValueStore, MemoryStore, SledStore};
use crate::types::{Address, Location};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEntry {
    pub location: Location,
    pub salt: Salt,
}

#[derive(Clone)]
pub struct SecretStore {
    kv: Arc<dyn KeyValueStore>,
}

impl SecretStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Opens (or creates) a sled database at `path`.
    pub fn open(path: impl AsRef<Path>) -> ClientResult<Self> {
        Ok(Self::new(Arc::new(SledStore::open(path)?)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Records the opening of `commitment` and indexes it under the namespace.
    ///
    /// The entry is written before the index so a reader that finds the
    /// commitment in the index can always load it.
    pub fn put(
        &self,
        commitment: &Commitment,
        location: Location,
        salt: Salt,
        account: &Address,
        contract: &Address,
    ) -> ClientResult<()> {
        let entry = SecretEntry { location, salt };
        self.kv.set(
            &entry_key(account, contract, commitment),
            &serde_json::to_value(entry)?,
        )?;

        let index_key = index_key(account, contract);
        let mut index = self.load_index(&index_key)?;
        if !index.contains(commitment) {
            index.push(*commitment);
            self.kv.set(&index_key, &serde_json::to_value(&index)?)?;
        }
        debug!(%account, %contract, %commitment, "stored secret");
        Ok(())
    }

    /// # Arguments
    ///
    /// * `commitment` - digest as published on chain
    /// * `account` - owner of the secret
    /// * `contract` - game contract the secret belongs to
    pub fn get(
        &self,
        commitment: &Commitment,
        account: &Address,
        contract: &Address,
    ) -> ClientResult<SecretEntry> {
        match self.kv.get(&entry_key(account, contract, commitment))? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Err(ClientError::UnknownCommitment(*commitment)),
        }
    }

    pub fn contains(
        &self,
        commitment: &Commitment,
        account: &Address,
        contract: &Address,
    ) -> ClientResult<bool> {
        Ok(self
            .kv
            .get(&entry_key(account, contract, commitment))?
            .is_some())
    }

    /// Every entry under the namespace, in insertion order.
    pub fn list(
        &self,
        account: &Address,
        contract: &Address,
    ) -> ClientResult<Vec<(Commitment, SecretEntry)>> {
        let index = self.load_index(&index_key(account, contract))?;
        let mut out = Vec::with_capacity(index.len());
        for commitment in index {
            let entry = self.get(&commitment, account, contract)?;
            out.push((commitment, entry));
        }
        Ok(out)
    }

    fn load_index(&self, key: &str) -> ClientResult<Vec<Commitment>> {
        match self.kv.get(key)? {
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }
}

fn entry_key(account: &Address, contract: &Address, commitment: &Commitment) -> String {
    format!("secret/{account}/{contract}/{commitment}")
}

fn index_key(account: &Address, contract: &Address) -> String {
    format!("secrets/{account}/{contract}")
}
