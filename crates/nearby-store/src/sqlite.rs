//! SQLite implementation of the credential store.
//!
//! rusqlite with bundled SQLite, made async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{CredentialKey, CredentialStore};

/// SQLite-backed credential store.
///
/// Thread-safe via an internal Mutex; every operation runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteCredentialStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCredentialStore {
    /// Open (or create) a database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {e}")),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get(&self, key: CredentialKey) -> Result<Option<String>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM credentials WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn put(&self, entries: &[(CredentialKey, String)]) -> Result<()> {
        let entries = entries.to_vec();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let now = now_millis();
            for (key, value) in &entries {
                tx.execute(
                    "INSERT INTO credentials (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                    updated_at = excluded.updated_at",
                    params![key.as_str(), value, now],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, keys: &[CredentialKey]) -> Result<()> {
        let keys = keys.to_vec();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for key in &keys {
                tx.execute("DELETE FROM credentials WHERE key = ?1", params![key.as_str()])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

impl SqliteCredentialStore {
    /// Every key currently stored. Rows with unknown keys are reported as
    /// invalid data rather than skipped.
    pub async fn keys(&self) -> Result<Vec<CredentialKey>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM credentials ORDER BY key")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            names
                .into_iter()
                .map(|name| {
                    CredentialKey::parse(&name)
                        .ok_or_else(|| StoreError::InvalidData(format!("unknown key {name:?}")))
                })
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{CredentialStoreExt, StoredTokens};

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = SqliteCredentialStore::open_memory().unwrap();
        store
            .put(&[
                (CredentialKey::AccessToken, "a1".into()),
                (CredentialKey::RefreshToken, "r1".into()),
            ])
            .await
            .unwrap();

        assert_eq!(
            store.get(CredentialKey::AccessToken).await.unwrap().as_deref(),
            Some("a1")
        );
        assert_eq!(store.keys().await.unwrap().len(), 2);

        store.remove(&[CredentialKey::AccessToken]).await.unwrap();
        assert_eq!(store.get(CredentialKey::AccessToken).await.unwrap(), None);
        assert_eq!(store.keys().await.unwrap(), vec![CredentialKey::RefreshToken]);
    }

    #[tokio::test]
    async fn test_overwrite_rotates_both() {
        let store = SqliteCredentialStore::open_memory().unwrap();
        store
            .save_tokens(&StoredTokens::new("a1", Some("r1".into())))
            .await
            .unwrap();
        store
            .save_tokens(&StoredTokens::new("a2", Some("r2".into())))
            .await
            .unwrap();

        let loaded = store.load_tokens().await.unwrap().unwrap();
        assert_eq!(loaded, StoredTokens::new("a2", Some("r2".into())));
    }

    #[tokio::test]
    async fn test_tokens_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.db");

        {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store
                .save_tokens(&StoredTokens::new("a1", Some("r1".into())))
                .await
                .unwrap();
        }

        let store = SqliteCredentialStore::open(&path).unwrap();
        let loaded = store.load_tokens().await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "a1");
        assert_eq!(loaded.refresh_token.as_deref(), Some("r1"));

        store.clear_tokens().await.unwrap();
        drop(store);

        let store = SqliteCredentialStore::open(&path).unwrap();
        assert!(store.load_tokens().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_key_is_invalid_data() {
        let store = SqliteCredentialStore::open_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO credentials (key, value, updated_at) VALUES ('expires_at', 'x', 0)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(matches!(
            store.keys().await,
            Err(StoreError::InvalidData(_))
        ));
    }
}
