//! # Nearby Store
//!
//! Durable persistence for the current session's tokens. The store is a
//! passive sink: the session manager writes to it after every successful
//! authenticate or refresh and clears it on logout, and only reads it once
//! on cold start.
//!
//! ## Key Types
//!
//! - [`CredentialStore`] - The async key/value trait
//! - [`CredentialStoreExt`] - Token-pair helpers on top of it
//! - [`SqliteCredentialStore`] - SQLite-backed persistent storage
//! - [`MemoryCredentialStore`] - In-memory storage for tests and ephemeral clients
//!
//! ## Usage
//!
//! ```rust,no_run
//! use nearby_store::{CredentialStoreExt, SqliteCredentialStore, StoredTokens};
//!
//! async fn example() -> nearby_store::Result<()> {
//!     let store = SqliteCredentialStore::open("credentials.db")?;
//!     store
//!         .save_tokens(&StoredTokens::new("access", Some("refresh".into())))
//!         .await?;
//!     let tokens = store.load_tokens().await?;
//!     assert!(tokens.is_some());
//!     Ok(())
//! }
//! ```
//!
//! Exactly two keys are ever persisted, [`CredentialKey::AccessToken`] and
//! [`CredentialKey::RefreshToken`]. Expiry and identity are not stored.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryCredentialStore;
pub use sqlite::SqliteCredentialStore;
pub use traits::{CredentialKey, CredentialStore, CredentialStoreExt, StoredTokens};
