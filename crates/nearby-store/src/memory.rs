//! In-memory implementation of the credential store.
//!
//! Used by tests and by clients that do not want credentials to outlive
//! the process.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::traits::{CredentialKey, CredentialStore};

/// In-memory credential store. Thread-safe via RwLock.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<BTreeMap<CredentialKey, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::InvalidData(format!("lock poisoned: {e}"))
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: CredentialKey) -> Result<Option<String>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.get(&key).cloned())
    }

    async fn put(&self, entries: &[(CredentialKey, String)]) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        for (key, value) in entries {
            inner.insert(*key, value.clone());
        }
        Ok(())
    }

    async fn remove(&self, keys: &[CredentialKey]) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        for key in keys {
            inner.remove(key);
        }
        Ok(())
    }
}
